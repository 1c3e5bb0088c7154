//! Background decay sweep over every registered map.

use super::map::SqlMap;
use super::sqlite::acquire_lock;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Maps registered with a store, keyed by sanitized table name.
pub type MapRegistry = Mutex<HashMap<String, SqlMap>>;

/// Sweeps the cache of every open map in `registry`.
///
/// The registry lock is held only long enough to clone the handles; each map
/// then sweeps under its own cache lock. Returns the number of evicted
/// entries.
pub fn sweep_all(registry: &MapRegistry) -> usize {
    let maps: Vec<SqlMap> = acquire_lock(registry).values().cloned().collect();
    maps.iter()
        .filter(|map| !map.is_closed())
        .map(SqlMap::sweep_cache)
        .sum()
}

/// Spawns the periodic sweeper on `handle`.
///
/// The task holds only a weak reference to the registry and exits on its own
/// once the store is gone; teardown aborts it explicitly.
pub fn spawn(handle: &Handle, registry: Weak<MapRegistry>, period: Duration) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            let evicted = sweep_all(&registry);
            tracing::debug!(evicted, "Cache decay sweep finished");
        }
    })
}

/// A running sweeper task.
///
/// Inside a tokio runtime the task is spawned there. Otherwise the sweeper
/// brings a one-worker runtime of its own, so synchronous hosts get periodic
/// sweeps too.
pub struct Sweeper {
    task: JoinHandle<()>,
    runtime: Option<Runtime>,
}

impl Sweeper {
    /// Starts sweeping `registry` every `period`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if no runtime is current and a
    /// private one cannot be built.
    pub fn start(registry: Weak<MapRegistry>, period: Duration) -> Result<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self {
                task: spawn(&handle, registry, period),
                runtime: None,
            });
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sqlmap-sweeper")
            .enable_time()
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "start_sweeper".to_string(),
                cause: e.to_string(),
            })?;
        let task = spawn(runtime.handle(), registry, period);
        Ok(Self {
            task,
            runtime: Some(runtime),
        })
    }

    /// Returns `true` if the sweeper runs on its own runtime.
    #[must_use]
    pub const fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Aborts the task and releases the private runtime, if any.
    ///
    /// Never blocks, so it is safe to call from async code.
    pub fn stop(self) {
        self.task.abort();
        if let Some(runtime) = self.runtime {
            runtime.shutdown_background();
        }
    }
}
