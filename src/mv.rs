// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Session-scoped materialized views.
//!
//! Views cache intermediate result sets between filter steps. Names embed
//! the session and content hashes, so the same content under the same
//! session always resolves to the same view and `CREATE ... IF NOT EXISTS`
//! makes creation idempotent. A SQLite-backed manager produces the
//! equivalent `TEMP TABLE`s with an rtree index.
//!

use crate::{
    Backend, BufferSpec, FilterError,
    backend::SqlRunner,
    config::{FALLBACK_TEMP_SCHEMA, config},
};
use core::fmt;
use jiff::Timestamp;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// What a session view caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvKind {
    /// The driving source selection, with a pre-computed buffer column.
    SourceSelection,
    /// A buffered source geometry on its own.
    BufferedSource,
    /// The consolidated source set shared by several spatial targets.
    FilterChain,
    /// A step result in a multi-step plan.
    Plain,
}

impl MvKind {
    /// Name fragment; the wire convention is
    /// `fm_temp_(source|buffered|filter_chain|mv)_<8hex>_<8hex>`.
    pub fn token(self) -> &'static str {
        match self {
            MvKind::SourceSelection => "source",
            MvKind::BufferedSource => "buffered",
            MvKind::FilterChain => "filter_chain",
            MvKind::Plain => "mv",
        }
    }
}

impl fmt::Display for MvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// First 8 hex digits of the md5 of a session id.
pub fn session_hash(session_id: &str) -> String {
    let digest = md5::compute(session_id.as_bytes());
    format!("{digest:x}")[..8].to_owned()
}

/// First 8 hex digits of the md5 of the content signature: sorted fids,
/// buffer parameters, centroid flag.
pub fn content_hash(fids: &[i64], buffer: Option<&BufferSpec>, centroid: bool) -> String {
    let mut sorted = fids.to_vec();
    sorted.sort_unstable();
    let fid_part = sorted
        .iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let buffer_part = match buffer {
        Some(b) => format!("{:?}|{}|{:?}|{}", b.distance, b.segments, b.end_cap, b.dissolve),
        None => "none".to_owned(),
    };
    let digest = md5::compute(format!("{fid_part}|{buffer_part}|{centroid}").as_bytes());
    format!("{digest:x}")[..8].to_owned()
}

/// Deterministic view name: `fm_temp_<kind>_<sessionHash>_<contentHash>`.
pub fn mv_name(kind: MvKind, session_id: &str, content_hash8: &str) -> String {
    format!(
        "fm_temp_{}_{}_{}",
        kind.token(),
        session_hash(session_id),
        content_hash8
    )
}

/// Extract the session-hash component of a conventionally named view.
pub fn parse_session_hash(view_name: &str) -> Option<&str> {
    let rest = view_name.strip_prefix("fm_temp_")?;
    let rest = ["source_", "buffered_", "filter_chain_", "mv_"]
        .iter()
        .find_map(|t| rest.strip_prefix(t))?;
    let (hash, tail) = rest.split_at_checked(8)?;
    if hash.chars().all(|c| c.is_ascii_hexdigit()) && tail.starts_with('_') {
        Some(hash)
    } else {
        None
    }
}

/// One view the manager is asked to materialize.
#[derive(Debug, Clone)]
pub struct MaterializedView {
    /// Schema the view lands in.
    pub schema: String,
    /// Conventional name.
    pub name: String,
    /// What it caches.
    pub kind: MvKind,
    /// Content-hash component of the name.
    pub content_hash: String,
    /// The full `CREATE` statement (schema-qualified, `IF NOT EXISTS`).
    pub create_sql: String,
    /// Geometry columns to index.
    pub geometry_columns: Vec<String>,
    /// Primary-key column the view exposes.
    pub pk_column: String,
}

impl MaterializedView {
    /// `"schema"."name"`.
    pub fn qualified_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.name)
    }

    /// Describe a `source_selection` view pre-computing `ST_Buffer` over
    /// the driving fids (PostgreSQL).
    pub fn source_selection(
        session_id: &str,
        source_schema: &str,
        source_table: &str,
        geom_column: &str,
        fid_column: &str,
        fids: &[i64],
        buffer_distance: &str,
        buffer_style: &str,
    ) -> Self {
        let schema = config().temp_schema().to_owned();
        let hash = {
            let mut sorted = fids.to_vec();
            sorted.sort_unstable();
            let fid_part = sorted
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let digest = md5::compute(
                format!("{fid_part}|{buffer_distance}|{buffer_style}").as_bytes(),
            );
            format!("{digest:x}")[..8].to_owned()
        };
        let name = mv_name(MvKind::SourceSelection, session_id, &hash);
        let fid_list = fids
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let create_sql = format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS \"{schema}\".\"{name}\" AS \
             SELECT \"{fid_column}\", \"{geom_column}\" AS geom, \
             ST_Buffer(\"{geom_column}\", {buffer_distance}, '{buffer_style}') AS geom_buffered \
             FROM \"{source_schema}\".\"{source_table}\" \
             WHERE \"{fid_column}\" IN ({fid_list}) WITH DATA"
        );
        MaterializedView {
            schema,
            name,
            kind: MvKind::SourceSelection,
            content_hash: hash,
            create_sql,
            geometry_columns: vec!["geom".into(), "geom_buffered".into()],
            pk_column: fid_column.to_owned(),
        }
    }

    /// Describe a `filter_chain` view consolidating a shared source
    /// restriction referenced by several targets.
    pub fn filter_chain(
        session_id: &str,
        source_schema: &str,
        source_table: &str,
        geom_column: &str,
        pk_column: &str,
        source_filter: &str,
    ) -> Self {
        let schema = config().temp_schema().to_owned();
        let digest = md5::compute(
            format!("{source_schema}.{source_table}|{source_filter}").as_bytes(),
        );
        let hash = format!("{digest:x}")[..8].to_owned();
        let name = mv_name(MvKind::FilterChain, session_id, &hash);
        let create_sql = format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS \"{schema}\".\"{name}\" AS \
             SELECT \"{pk_column}\", \"{geom_column}\" AS geom \
             FROM \"{source_schema}\".\"{source_table}\" \
             WHERE {source_filter} WITH DATA"
        );
        MaterializedView {
            schema,
            name,
            kind: MvKind::FilterChain,
            content_hash: hash,
            create_sql,
            geometry_columns: vec!["geom".into()],
            pk_column: pk_column.to_owned(),
        }
    }
}

/// Owns the lifecycle of one session's temp views on one database.
pub struct MvManager {
    runner: Arc<dyn SqlRunner>,
    backend: Backend,
    session_id: String,
    schema_fell_back: AtomicBool,
    // Creation times of views made by this process; feeds the orphan GC's
    // age check.
    created: Mutex<HashMap<String, Timestamp>>,
}

impl fmt::Debug for MvManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MvManager")
            .field("backend", &self.backend)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl MvManager {
    /// Constructor. `backend` must be a database backend.
    pub fn new(runner: Arc<dyn SqlRunner>, backend: Backend, session_id: &str) -> Self {
        MvManager {
            runner,
            backend,
            session_id: session_id.to_owned(),
            schema_fell_back: AtomicBool::new(false),
            created: Mutex::new(HashMap::new()),
        }
    }

    /// This manager's session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // Run one statement, reconnect-and-retry semantics folded into a
    // single transparent retry on transient failure.
    async fn execute_with_retry(&self, sql: &str) -> Result<u64, FilterError> {
        match self.runner.execute(sql).await {
            Ok(x) => Ok(x),
            Err(x) if x.is_transient() => {
                warn!("transient failure, retrying once: {x}");
                self.runner.execute(sql).await
            }
            Err(x) => Err(x),
        }
    }

    /// Make sure the temp schema exists, falling back to `public` (warned
    /// once per session) when creation is denied. Returns the schema that
    /// is actually usable.
    pub async fn ensure_schema(&self) -> Result<String, FilterError> {
        if self.backend != Backend::PostgreSql {
            // SQLite has no schemas; temp tables land in the temp database.
            return Ok(String::new());
        }
        let schema = config().temp_schema().to_owned();
        let sql = format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\"");
        match self.execute_with_retry(&sql).await {
            Ok(_) => Ok(schema),
            Err(x) => {
                if !self.schema_fell_back.swap(true, Ordering::SeqCst) {
                    warn!(
                        "Could not create schema '{schema}' ({x}); falling back to \
                         '{FALLBACK_TEMP_SCHEMA}'"
                    );
                }
                Ok(FALLBACK_TEMP_SCHEMA.to_owned())
            }
        }
    }

    /// Materialize a view: create, index its geometry columns, analyze.
    /// Idempotent thanks to the naming convention + `IF NOT EXISTS`.
    pub async fn ensure(&self, mv: &MaterializedView) -> Result<(), FilterError> {
        self.ensure_schema().await?;
        match self.backend {
            Backend::PostgreSql => {
                self.execute_with_retry(&mv.create_sql).await?;
                for col in &mv.geometry_columns {
                    let sql = format!(
                        "CREATE INDEX IF NOT EXISTS \"{}_{col}_gist\" ON {} USING GIST (\"{col}\")",
                        mv.name,
                        mv.qualified_name()
                    );
                    self.execute_with_retry(&sql).await?;
                }
                let sql = format!("ANALYZE {}", mv.qualified_name());
                self.execute_with_retry(&sql).await?;
            }
            Backend::SpatiaLite => {
                // TEMP TABLE + rtree; no ANALYZE equivalent required.
                self.execute_with_retry(&mv.create_sql).await?;
                for col in &mv.geometry_columns {
                    let sql = format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS \"rtree_{}_{col}\" \
                         USING rtree(id, minx, maxx, miny, maxy)",
                        mv.name
                    );
                    self.execute_with_retry(&sql).await?;
                }
            }
            _ => {
                return Err(FilterError::BackendUnavailable(
                    "Materialized views need a database backend".into(),
                ));
            }
        }
        self.created
            .lock()
            .expect("mv registry lock")
            .insert(mv.name.clone(), Timestamp::now());
        info!("ensured {} view {}", mv.kind, mv.qualified_name());
        Ok(())
    }

    async fn list_temp_views(&self) -> Result<Vec<String>, FilterError> {
        let sql = match self.backend {
            Backend::PostgreSql => format!(
                "SELECT matviewname FROM pg_matviews WHERE schemaname = '{}' \
                 AND matviewname LIKE 'fm_temp_%'",
                config().temp_schema()
            ),
            _ => "SELECT name FROM sqlite_master WHERE type = 'table' \
                  AND name LIKE 'fm_temp_%'"
                .to_owned(),
        };
        self.runner.fetch_strings(&sql).await
    }

    async fn drop_one(&self, name: &str) -> Result<(), FilterError> {
        let sql = match self.backend {
            Backend::PostgreSql => format!(
                "DROP MATERIALIZED VIEW IF EXISTS \"{}\".\"{name}\"",
                config().temp_schema()
            ),
            _ => format!("DROP TABLE IF EXISTS \"{name}\""),
        };
        self.execute_with_retry(&sql).await?;
        self.created.lock().expect("mv registry lock").remove(name);
        Ok(())
    }

    /// Drop every view whose name embeds this session's hash. Part of
    /// request cleanup, cancellation included.
    pub async fn drop_session(&self) -> Result<u32, FilterError> {
        let mine = session_hash(&self.session_id);
        let mut dropped = 0u32;
        for name in self.list_temp_views().await? {
            if parse_session_hash(&name) == Some(mine.as_str()) {
                self.drop_one(&name).await?;
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!("dropped {dropped} session view(s) for session hash {mine}");
        }
        Ok(dropped)
    }

    /// Drop views whose session hash matches no live session and whose
    /// known age exceeds `max_age`. Views created by dead processes have
    /// no recorded age and are collected as soon as their session dies.
    pub async fn drop_orphans(
        &self,
        live_sessions: &[&str],
        max_age: Duration,
    ) -> Result<u32, FilterError> {
        let live: Vec<String> = live_sessions.iter().map(|x| session_hash(x)).collect();
        let now = Timestamp::now();
        let mut dropped = 0u32;
        for name in self.list_temp_views().await? {
            let Some(hash) = parse_session_hash(&name) else {
                continue;
            };
            if live.iter().any(|x| x.as_str() == hash) {
                continue;
            }
            let young = {
                let registry = self.created.lock().expect("mv registry lock");
                registry.get(&name).is_some_and(|t| {
                    let age = now.as_second() - t.as_second();
                    age >= 0 && (age as u64) < max_age.as_secs()
                })
            };
            if young {
                debug!("orphan candidate {name} is younger than the threshold; kept");
                continue;
            }
            self.drop_one(&name).await?;
            dropped += 1;
        }
        if dropped > 0 {
            info!("collected {dropped} orphan view(s)");
        }
        Ok(dropped)
    }
}
