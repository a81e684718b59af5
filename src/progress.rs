// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Cooperative cancellation and the parallelism policy.
//!

use crate::{Backend, FilterError, LayerDescriptor, config::config};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

/// Cooperative cancellation token. Cloned into every worker; long loops
/// poll it between layers and before expensive subqueries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, un-canceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; callable from any thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// TRUE once cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: error out of the current operation when canceled.
    pub fn check(&self) -> Result<(), FilterError> {
        if self.is_canceled() {
            Err(FilterError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// How the per-target fan-out runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// Independent workers, bounded by the worker cap.
    Parallel {
        /// Maximum concurrent workers.
        max_workers: usize,
    },
    /// One layer at a time with a pause in between (lets SQLite drop its
    /// write lock).
    Sequential {
        /// Pause between layers.
        inter_layer_delay: Duration,
    },
}

/// Default worker cap: `min(4, cpus - 1)`, never below 1.
pub fn default_worker_cap() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|x| x.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, 4)
}

/// Decide the policy for a set of resolved targets.
///
/// Parallel execution needs every target on a database backend, no two
/// targets sharing a SQLite file (single-writer limit), and enough layers
/// to be worth the fan-out. The in-process OGR path rides host geometry
/// calls that are not thread-safe, so its presence forces sequential.
pub fn execution_policy(targets: &[&LayerDescriptor]) -> ExecutionPolicy {
    let sequential = ExecutionPolicy::Sequential {
        inter_layer_delay: Duration::from_millis(config().sequential_interlayer_delay_ms()),
    };

    if targets.len() < config().parallel_min_layers() {
        return sequential;
    }
    if !targets.iter().all(|t| t.backend.effective().is_database()) {
        return sequential;
    }
    // No two SpatiaLite targets may share one database file.
    let mut sqlite_files: Vec<&str> = targets
        .iter()
        .filter(|t| t.backend.effective() == Backend::SpatiaLite)
        .filter_map(|t| t.database_path.as_deref())
        .collect();
    sqlite_files.sort_unstable();
    let unique = {
        let mut deduped = sqlite_files.clone();
        deduped.dedup();
        deduped.len()
    };
    if unique != sqlite_files.len() {
        return sequential;
    }

    ExecutionPolicy::Parallel {
        max_workers: default_worker_cap(),
    }
}
