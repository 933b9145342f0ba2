pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod jobs;
pub mod limits;
pub mod model;
pub mod money;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod tenant;
pub mod wal;
