// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Contract with the external GIS host: layers, the UI-thread executor and
//! task reporting.
//!
//! The engine never owns layers. It reads metadata and feature snapshots
//! through [`HostLayer`], and mutates subset strings only through runnables
//! handed to the host's [`UiExecutor`] (see the subset-application queue).
//!

use crate::FilterError;
use core::fmt;
use geos::Geometry;
use std::sync::Arc;

/// One feature: its id and its GEOS geometry.
#[derive(Debug)]
pub struct Feature {
    /// Host feature id.
    pub fid: i64,
    /// The feature's geometry.
    pub geom: Geometry,
}

impl Feature {
    /// Constructor.
    pub fn new(fid: i64, geom: Geometry) -> Self {
        Feature { fid, geom }
    }
}

impl Clone for Feature {
    fn clone(&self) -> Self {
        Feature {
            fid: self.fid,
            geom: self.geom.clone(),
        }
    }
}

/// What the orchestrator consumes from a host layer.
///
/// Split of thread affinities, mirroring the host's own rules:
/// * metadata accessors (`provider_type`, CRS info, field names, counts)
///   are callable from any thread;
/// * `features()` is worker-safe only for memory layers and read-only
///   snapshots;
/// * everything that mutates (`set_subset_string`, `reload*`,
///   `update_extents`, `trigger_repaint`) must run on the host's UI thread.
pub trait HostLayer: Send + Sync {
    /// Host layer id.
    fn id(&self) -> &str;

    /// Human-readable layer name, for messages.
    fn name(&self) -> String {
        self.id().to_owned()
    }

    /// Provider string; e.g. `postgres`, `spatialite`, `ogr`, `memory`.
    fn provider_type(&self) -> String;

    /// TRUE while the host still considers the layer usable.
    fn is_valid(&self) -> bool;

    /// CRS authority id; e.g. `EPSG:2154`.
    fn crs_auth_id(&self) -> String;

    /// TRUE when the CRS units are degrees.
    fn crs_is_geographic(&self) -> bool;

    /// Schema of the backing table, when the provider has one.
    fn source_schema(&self) -> Option<String>;

    /// Backing table (or layer) name.
    fn source_table(&self) -> String;

    /// Geometry column name.
    fn geometry_column(&self) -> String;

    /// Primary key column name.
    fn primary_key(&self) -> String;

    /// TRUE when the pk column is numeric.
    fn primary_key_is_numeric(&self) -> bool;

    /// Field names in layer order.
    fn fields(&self) -> Vec<String>;

    /// Cheap feature-count estimate, `None` when unknown.
    fn feature_count(&self) -> Option<u64>;

    /// Physical database file for SQLite-family providers.
    fn database_path(&self) -> Option<String> {
        None
    }

    /// Layer extent as `[xmin, ymin, xmax, ymax]`, when known.
    fn extent(&self) -> Option<[f64; 4]>;

    /// Current subset string; empty when unfiltered.
    fn subset_string(&self) -> String;

    /// Replace the subset string. UI thread only.
    fn set_subset_string(&self, subset: &str) -> bool;

    /// Ids currently selected in the host UI. UI thread only.
    fn selected_feature_ids(&self) -> Vec<i64>;

    /// Enumerate features, optionally restricted to the given ids.
    /// Worker-safe for memory layers and read-only snapshots.
    fn features(&self, ids: Option<&[i64]>) -> Result<Vec<Feature>, FilterError>;

    /// Evaluate a host-native numeric expression against one feature.
    /// Drives expression-valued buffer distances. Hosts without an
    /// expression engine leave the default in place.
    fn evaluate_numeric_expression(&self, _expression: &str, _fid: i64) -> Option<f64> {
        None
    }

    /// Force a data reload (PostgreSQL-style `reloadData`). UI thread only.
    fn reload_data(&self);

    /// Full reload. UI thread only.
    fn reload(&self);

    /// Recompute the cached extent. UI thread only.
    fn update_extents(&self);

    /// Schedule a repaint. UI thread only.
    fn trigger_repaint(&self);

    /// Suppress the layer's change signals around a mutation. UI thread only.
    fn block_signals(&self, blocked: bool);
}

/// Resolves layer ids to live host layers and exposes the few pieces of
/// project-level state the engine needs.
pub trait HostRegistry: Send + Sync {
    /// Look a layer up by id.
    fn layer(&self, id: &str) -> Option<Arc<dyn HostLayer>>;

    /// The project's configured CRS authority id.
    fn project_crs_auth_id(&self) -> String;

    /// TRUE when the project CRS is geographic.
    fn project_crs_is_geographic(&self) -> bool;
}

/// Accepts runnables for execution on the host's UI thread.
///
/// The host GIS mutates layers only from its UI thread; this is the single
/// seam through which the engine reaches it.
pub trait UiExecutor: Send + Sync {
    /// Queue a runnable for execution on the UI thread.
    fn dispatch(&self, runnable: Box<dyn FnOnce() + Send>);
}

/// Runs runnables inline on the calling thread.
///
/// Useful for headless hosts and tests, where there is no event loop to
/// defer to.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl UiExecutor for InlineExecutor {
    fn dispatch(&self, runnable: Box<dyn FnOnce() + Send>) {
        runnable();
    }
}

/// Message-bar severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something degraded but the operation continued.
    Warning,
    /// The operation (or one target) failed.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Task reporting surface: description, progress and the message bar.
pub trait TaskReporter: Send + Sync {
    /// Describe the current phase.
    fn description(&self, text: &str);

    /// Report progress, 0..=100.
    fn progress(&self, pct: u8);

    /// Push a message-bar entry.
    fn push_message(&self, category: &str, text: &str, severity: Severity);
}

/// Reporter that forwards everything to `tracing`. The default for
/// headless use and tests.
#[derive(Debug, Default)]
pub struct LogReporter;

impl TaskReporter for LogReporter {
    fn description(&self, text: &str) {
        tracing::info!("task: {text}");
    }

    fn progress(&self, pct: u8) {
        tracing::debug!("progress: {pct}%");
    }

    fn push_message(&self, category: &str, text: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!("[{category}] {text}"),
            Severity::Warning => tracing::warn!("[{category}] {text}"),
            Severity::Critical => tracing::error!("[{category}] {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_inline_executor_runs() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        InlineExecutor.dispatch(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    #[traced_test]
    fn test_feature_clone_preserves_fid() {
        let g = Geometry::new_from_wkt("POINT (1 2)").unwrap();
        let f = Feature::new(42, g);
        let f2 = f.clone();
        assert_eq!(f2.fid, 42);
    }
}
