use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process settings, read from the environment (optionally seeded from `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// One WAL file per business lives here.
    pub data_dir: PathBuf,
    /// Prometheus listener; disabled when unset.
    pub metrics_port: Option<u16>,
    /// Commits between WAL compactions.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub job_concurrency: usize,
    pub job_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            job_concurrency: 4,
            job_queue_capacity: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| parse::<u64>(&v));
        Self {
            bind: lookup("RESERVD_BIND").unwrap_or(defaults.bind),
            port: lookup("RESERVD_PORT")
                .and_then(|v| parse(&v))
                .unwrap_or(defaults.port),
            data_dir: lookup("RESERVD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("RESERVD_METRICS_PORT").and_then(|v| parse(&v)),
            compact_threshold: parsed("RESERVD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed("RESERVD_SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            job_concurrency: lookup("RESERVD_JOB_CONCURRENCY")
                .and_then(|v| parse(&v))
                .filter(|n| *n > 0)
                .unwrap_or(defaults.job_concurrency),
            job_queue_capacity: lookup("RESERVD_JOB_QUEUE_CAPACITY")
                .and_then(|v| parse(&v))
                .filter(|n| *n > 0)
                .unwrap_or(defaults.job_queue_capacity),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}
