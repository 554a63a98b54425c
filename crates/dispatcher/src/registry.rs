//! Process-wide registry of running worker pools, keyed by queue name.
//!
//! Producers and the CLI both reach pools through here, so a pool started
//! once is shared instead of duplicated.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::worker::WorkerPool;

static POOLS: Lazy<DashMap<String, Arc<WorkerPool>>> = Lazy::new(DashMap::new);

/// Register a pool under `queue_name`. Returns the pool already registered
/// under that name instead, if any.
pub fn register(queue_name: &str, pool: Arc<WorkerPool>) -> Arc<WorkerPool> {
    let entry = POOLS
        .entry(queue_name.to_string())
        .or_insert_with(|| {
            debug!(target: "dispatcher", queue = queue_name, "worker pool registered");
            pool
        });
    entry.clone()
}

pub fn get(queue_name: &str) -> Option<Arc<WorkerPool>> {
    POOLS.get(queue_name).map(|entry| entry.clone())
}

/// Remove and return a pool, typically right before shutting it down.
pub fn deregister(queue_name: &str) -> Option<Arc<WorkerPool>> {
    POOLS.remove(queue_name).map(|(_, pool)| pool)
}
