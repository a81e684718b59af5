// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Configuration parameters affecting the behaviour of this library.
//!
//! Every threshold is read once from the environment (`dotenvy`) and frozen
//! in a process-wide Singleton. See `.env.template` for the documented
//! defaults.
//!

use dotenvy::var;
use std::sync::OnceLock;

/// Default schema housing session-scoped materialized views.
pub const DEFAULT_TEMP_SCHEMA: &str = "filtermate_temp";
/// Schema used when creating [`DEFAULT_TEMP_SCHEMA`] is denied.
pub const FALLBACK_TEMP_SCHEMA: &str = "public";

#[derive(Debug)]
pub struct Config {
    source_fid_mv_threshold: usize,
    fid_range_threshold: usize,
    max_inline_fids: usize,
    max_wkt_length: usize,
    wkt_precision_geographic: u32,
    wkt_precision_projected: u32,
    long_query_warning_ms: u64,
    very_long_query_warning_ms: u64,
    max_features_for_update_extents: u64,
    parallel_min_layers: usize,
    temp_schema: String,
    mv_orphan_max_age_hours: u64,
    optimizer_cache_size: u64,
    geometry_cache_size: u64,
    expression_cache_size: u64,
    large_expression_defer_bytes: usize,
    sequential_interlayer_delay_ms: u64,
    pg_appname: String,
}

static CONFIG: OnceLock<Config> = OnceLock::new();
/// This library configuration Singleton.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

fn var_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    var(key)
        .ok()
        .and_then(|x| x.parse::<T>().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_fid_mv_threshold: var_or("SOURCE_FID_MV_THRESHOLD", 50),
            fid_range_threshold: var_or("FID_RANGE_THRESHOLD", 20),
            max_inline_fids: var_or("MAX_INLINE_FIDS", 30),
            max_wkt_length: var_or("MAX_WKT_LENGTH", 100_000),
            wkt_precision_geographic: var_or("WKT_PRECISION_GEOGRAPHIC", 8),
            wkt_precision_projected: var_or("WKT_PRECISION_PROJECTED", 3),
            long_query_warning_ms: var_or("LONG_QUERY_WARNING_MS", 10_000),
            very_long_query_warning_ms: var_or("VERY_LONG_QUERY_WARNING_MS", 30_000),
            max_features_for_update_extents: var_or("MAX_FEATURES_FOR_UPDATE_EXTENTS", 50_000),
            parallel_min_layers: var_or("PARALLEL_MIN_LAYERS", 2),
            temp_schema: var("TEMP_SCHEMA").unwrap_or(DEFAULT_TEMP_SCHEMA.to_owned()),
            mv_orphan_max_age_hours: var_or("MV_ORPHAN_MAX_AGE_HOURS", 24),
            optimizer_cache_size: var_or("OPTIMIZER_CACHE_SIZE", 50),
            geometry_cache_size: var_or("GEOMETRY_CACHE_SIZE", 32),
            expression_cache_size: var_or("EXPRESSION_CACHE_SIZE", 256),
            large_expression_defer_bytes: var_or("LARGE_EXPRESSION_DEFER_BYTES", 100_000),
            sequential_interlayer_delay_ms: var_or("SEQUENTIAL_INTERLAYER_DELAY_MS", 250),
            pg_appname: var("PG_APPNAME").unwrap_or("filtermate".to_owned()),
        }
    }
}

impl Config {
    /// FID count beyond which an inline `IN` list inside an `EXISTS` is
    /// promoted to a session materialized view.
    pub fn source_fid_mv_threshold(&self) -> usize {
        self.source_fid_mv_threshold
    }

    /// Minimum FID-list length considered for a range rewrite.
    pub fn fid_range_threshold(&self) -> usize {
        self.fid_range_threshold
    }

    /// FID count at or below which an inline list is kept as-is.
    pub fn max_inline_fids(&self) -> usize {
        self.max_inline_fids
    }

    /// WKT length budget beyond which adaptive simplification kicks in.
    pub fn max_wkt_length(&self) -> usize {
        self.max_wkt_length
    }

    /// Number of decimal digits serialized for geographic coordinates.
    pub fn wkt_precision_geographic(&self) -> u32 {
        self.wkt_precision_geographic
    }

    /// Number of decimal digits serialized for projected coordinates.
    pub fn wkt_precision_projected(&self) -> u32 {
        self.wkt_precision_projected
    }

    /// Duration after which a still-running query earns a warning.
    pub fn long_query_warning_ms(&self) -> u64 {
        self.long_query_warning_ms
    }

    /// Duration after which a still-running query earns a louder warning.
    pub fn very_long_query_warning_ms(&self) -> u64 {
        self.very_long_query_warning_ms
    }

    /// Feature count above which extent updates are skipped after applying
    /// a subset.
    pub fn max_features_for_update_extents(&self) -> u64 {
        self.max_features_for_update_extents
    }

    /// Minimum number of target layers before parallel fan-out is considered.
    pub fn parallel_min_layers(&self) -> usize {
        self.parallel_min_layers
    }

    /// Schema housing session-scoped materialized views.
    pub fn temp_schema(&self) -> &str {
        &self.temp_schema
    }

    /// Age beyond which an orphaned materialized view is collected.
    pub fn mv_orphan_max_age_hours(&self) -> u64 {
        self.mv_orphan_max_age_hours
    }

    /// Bound on the optimizer's memoization cache.
    pub fn optimizer_cache_size(&self) -> u64 {
        self.optimizer_cache_size
    }

    /// Bound on the prepared-source-geometry cache.
    pub fn geometry_cache_size(&self) -> u64 {
        self.geometry_cache_size
    }

    /// Bound on the built-expression cache.
    pub fn expression_cache_size(&self) -> u64 {
        self.expression_cache_size
    }

    /// Serialized-expression size beyond which a subset application is
    /// deferred to a later drain.
    pub fn large_expression_defer_bytes(&self) -> usize {
        self.large_expression_defer_bytes
    }

    /// Pause between sequential per-layer applications, giving SQLite time
    /// to release its write lock.
    pub fn sequential_interlayer_delay_ms(&self) -> u64 {
        self.sequential_interlayer_delay_ms
    }

    /// `application_name` reported on PostgreSQL connections.
    pub fn pg_appname(&self) -> &str {
        &self.pg_appname
    }
}
