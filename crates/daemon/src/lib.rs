//! Service wiring for the bag cache manager.
//!
//! This crate provides:
//! - Configuration loading from a TOML file and `BAGCACHE_` environment variables
//! - Construction of the data and head-bag caches, restorer, queue and monitor
//! - A watchdog that revives the background workers

pub mod config;
pub mod state;

pub use config::load_config;
pub use state::AppState;
