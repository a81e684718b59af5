// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Subset-application queue.
//!
//! Everything that mutates a host layer (subset string, reload, extent,
//! repaint) is unsafe off the UI thread. Workers enqueue
//! [`PendingSubsetRequest`]s from anywhere; the queue drains them in a
//! single runnable dispatched to the host's [`UiExecutor`]. Oversized
//! expressions are applied in a second, slightly delayed drain so the UI
//! can breathe between repaints.
//!

use crate::{
    analyzer::analyze,
    config::config,
    host::{HostLayer, UiExecutor},
    layer::Backend,
};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One queued subset mutation.
pub struct PendingSubsetRequest {
    /// The layer to mutate.
    pub layer: Arc<dyn HostLayer>,
    /// The new subset string; empty clears the filter.
    pub expression: String,
    /// Effective backend, for the reload policy.
    pub backend: Backend,
}

impl std::fmt::Debug for PendingSubsetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSubsetRequest")
            .field("layer", &self.layer.id())
            .field("expression_len", &self.expression.len())
            .finish()
    }
}

/// Outcome of one application, reported back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Layer the application targeted.
    pub layer_id: String,
    /// TRUE when the host accepted the subset.
    pub applied: bool,
    /// Host-side failure description, when not applied.
    pub error: Option<String>,
}

/// The queue. One per engine; accepts from any thread.
pub struct SubsetQueue {
    executor: Arc<dyn UiExecutor>,
    pending: Mutex<Vec<PendingSubsetRequest>>,
}

impl std::fmt::Debug for SubsetQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsetQueue").finish()
    }
}

impl SubsetQueue {
    /// Constructor.
    pub fn new(executor: Arc<dyn UiExecutor>) -> Self {
        SubsetQueue {
            executor,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue one mutation. Callable from any thread.
    pub fn enqueue(&self, request: PendingSubsetRequest) {
        self.pending.lock().expect("queue lock").push(request);
    }

    /// Drain everything queued so far through the UI executor and wait
    /// for the outcomes. Requests whose expression exceeds the configured
    /// size are deferred to a second runnable dispatched ~100 ms later.
    pub async fn drain(&self) -> Vec<ApplyOutcome> {
        let drained: Vec<PendingSubsetRequest> =
            std::mem::take(&mut *self.pending.lock().expect("queue lock"));
        if drained.is_empty() {
            return Vec::new();
        }

        let defer_bytes = config().large_expression_defer_bytes();
        let (normal, oversized): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .partition(|r| r.expression.len() <= defer_bytes);

        let mut outcomes = Vec::new();
        if !normal.is_empty() {
            outcomes.extend(self.dispatch_batch(normal).await);
        }
        if !oversized.is_empty() {
            debug!(
                "deferring {} oversized subset application(s)",
                oversized.len()
            );
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            outcomes.extend(self.dispatch_batch(oversized).await);
        }
        outcomes
    }

    async fn dispatch_batch(&self, batch: Vec<PendingSubsetRequest>) -> Vec<ApplyOutcome> {
        let (tx, rx) = oneshot::channel();
        self.executor.dispatch(Box::new(move || {
            let outcomes: Vec<ApplyOutcome> = batch.iter().map(apply_one).collect();
            // Receiver dropped means the request was abandoned; nothing to
            // roll back, the mutations stand.
            let _ = tx.send(outcomes);
        }));
        match rx.await {
            Ok(x) => x,
            Err(_) => {
                warn!("UI executor dropped the apply batch");
                Vec::new()
            }
        }
    }
}

// The single runnable body: everything here runs on the UI thread.
fn apply_one(request: &PendingSubsetRequest) -> ApplyOutcome {
    let layer = &request.layer;
    let layer_id = layer.id().to_owned();

    if !layer.is_valid() {
        return ApplyOutcome {
            layer_id,
            applied: false,
            error: Some("Layer is no longer valid".to_owned()),
        };
    }

    let census = analyze(&request.expression);
    layer.block_signals(true);

    // Identical-string skip: only force the refresh machinery.
    let applied = if layer.subset_string() == request.expression {
        debug!("{layer_id}: identical subset, skipping re-apply");
        true
    } else {
        layer.set_subset_string(&request.expression)
    };

    if applied {
        // Complex filters leave stale provider caches behind; force the
        // matching reload per backend.
        if census.is_complex() {
            match request.backend.effective() {
                Backend::PostgreSql => layer.reload_data(),
                Backend::SpatiaLite => layer.reload(),
                _ => {}
            }
        }
        let small_enough = layer
            .feature_count()
            .is_none_or(|n| n < config().max_features_for_update_extents());
        if small_enough {
            layer.update_extents();
        }
    }

    layer.block_signals(false);
    if applied {
        layer.trigger_repaint();
    }

    ApplyOutcome {
        layer_id,
        applied,
        error: if applied {
            None
        } else {
            Some("Host rejected the subset string".to_owned())
        },
    }
}
