// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Process-scoped caches: prepared source geometry and built expressions.
//!
//! Both are fingerprint-keyed, bounded, and side-effect-free on lookup.
//! Repeat requests inside a session skip the expensive pipelines entirely.
//!

use crate::{
    Backend, BufferSpec, CentroidFlags, Predicate, config::config,
    geometry::PreparedSourceGeometry,
};
use moka::sync::Cache;
use std::sync::Arc;
use tracing::debug;

/// Stable fingerprint of a source selection: layer, sorted ids, buffer
/// parameters, centroid flag, reprojection target.
pub fn geometry_fingerprint(
    source_layer_id: &str,
    feature_ids: &[i64],
    buffer: Option<&BufferSpec>,
    use_centroids: bool,
    reprojection_target: Option<&str>,
) -> String {
    let mut sorted = feature_ids.to_vec();
    sorted.sort_unstable();
    let ids = sorted
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let buffer_part = match buffer {
        Some(b) => format!("{:?}|{}|{:?}|{}", b.distance, b.segments, b.end_cap, b.dissolve),
        None => "none".to_owned(),
    };
    let digest = md5::compute(
        format!(
            "{source_layer_id}\x1f{ids}\x1f{buffer_part}\x1f{use_centroids}\x1f{}",
            reprojection_target.unwrap_or("-")
        )
        .as_bytes(),
    );
    format!("{digest:x}")
}

/// Fingerprint of a fully built target expression.
#[allow(clippy::too_many_arguments)]
pub fn expression_fingerprint(
    target_layer_id: &str,
    predicates: &[Predicate],
    buffer: Option<&BufferSpec>,
    source_hash: &str,
    backend: Backend,
    source_filter: Option<&str>,
    centroids: CentroidFlags,
) -> String {
    let mut preds: Vec<String> = predicates.iter().map(|p| p.to_string()).collect();
    preds.sort();
    let buffer_part = match buffer {
        Some(b) => format!("{:?}|{}|{:?}|{}", b.distance, b.segments, b.end_cap, b.dissolve),
        None => "none".to_owned(),
    };
    let filter_hash = match source_filter {
        Some(f) => format!("{:x}", md5::compute(f.as_bytes())),
        None => "-".to_owned(),
    };
    let digest = md5::compute(
        format!(
            "{target_layer_id}\x1f{}\x1f{buffer_part}\x1f{source_hash}\x1f{backend}\x1f{filter_hash}\x1f{}|{}",
            preds.join(","),
            centroids.source,
            centroids.distant,
        )
        .as_bytes(),
    );
    format!("{digest:x}")
}

/// The two engine caches, shared by every request in the process.
pub struct EngineCaches {
    geometry: Cache<String, Arc<PreparedSourceGeometry>>,
    expression: Cache<String, String>,
}

impl std::fmt::Debug for EngineCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCaches").finish()
    }
}

impl Default for EngineCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCaches {
    /// Constructor with the configured bounds.
    pub fn new() -> Self {
        EngineCaches {
            geometry: Cache::new(config().geometry_cache_size()),
            expression: Cache::new(config().expression_cache_size()),
        }
    }

    /// Look a prepared geometry up. Side-effect-free.
    pub fn geometry(&self, fingerprint: &str) -> Option<Arc<PreparedSourceGeometry>> {
        let hit = self.geometry.get(fingerprint);
        if hit.is_some() {
            debug!("geometry cache hit");
        }
        hit
    }

    /// Store a prepared geometry. Mandatory before returning a fresh one.
    pub fn store_geometry(&self, fingerprint: String, prepared: Arc<PreparedSourceGeometry>) {
        self.geometry.insert(fingerprint, prepared);
    }

    /// Drop every cached geometry derived from one source layer. Called
    /// when that layer's subset changes.
    pub fn invalidate_geometry(&self) {
        self.geometry.invalidate_all();
    }

    /// Look a built expression up. Side-effect-free.
    pub fn expression(&self, fingerprint: &str) -> Option<String> {
        let hit = self.expression.get(fingerprint);
        if hit.is_some() {
            debug!("expression cache hit");
        }
        hit
    }

    /// Store a built expression.
    pub fn store_expression(&self, fingerprint: String, expression: String) {
        self.expression.insert(fingerprint, expression);
    }

    /// Drop every cached expression. Called on project change.
    pub fn clear_expressions(&self) {
        self.expression.invalidate_all();
    }
}
