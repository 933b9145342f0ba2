use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Directory, DraftCache, Engine, EngineShared};
use crate::jobs::JobQueue;
use crate::limits::*;
use crate::model::BusinessId;
use crate::reaper;

/// Manages per-business engines. Each business gets its own Engine + WAL +
/// compactor; the ownership directory and draft cache are shared.
pub struct TenantManager {
    engines: DashMap<BusinessId, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    shared: EngineShared,
    shutdown: CancellationToken,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, jobs: JobQueue, shutdown: CancellationToken) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            shared: EngineShared {
                directory: Arc::new(Directory::new()),
                drafts: Arc::new(DraftCache::default()),
                jobs,
            },
            shutdown,
        }
    }

    pub fn get(&self, business_id: BusinessId) -> Option<Arc<Engine>> {
        self.engines.get(&business_id).map(|e| e.value().clone())
    }

    /// Get or lazily create the engine for a business.
    pub fn get_or_create(&self, business_id: BusinessId) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.get(business_id) {
            return Ok(engine);
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two racing callers may both get here; the entry API keeps the first.
        let entry = self.engines.entry(business_id);
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{business_id}.wal"));
        let engine = Arc::new(Engine::new(business_id, wal_path, self.shared.clone())?);

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold, shutdown).await;
        });

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    /// Open every business that already has a WAL in the data directory, so
    /// the ownership directory is complete and the sweep sees their orders.
    pub fn load_existing(&self) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wal") {
                continue;
            }
            let Some(business_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Ulid::from_string(s).ok())
            else {
                warn!("skipping unrecognised WAL file {}", path.display());
                continue;
            };
            self.get_or_create(business_id)?;
            loaded += 1;
        }
        info!(loaded, "businesses loaded from data directory");
        Ok(loaded)
    }

    pub fn engines(&self) -> Vec<Arc<Engine>> {
        self.engines.iter().map(|e| e.value().clone()).collect()
    }

    pub fn drafts(&self) -> &DraftCache {
        &self.shared.drafts
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
