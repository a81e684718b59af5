// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Per-backend artifacts: SQL runners, capability probes, and the
//! expression builders turning a prepared source geometry into each
//! dialect's predicate body.
//!

mod ogr;
mod pg;
mod sqlite;

pub use ogr::*;
pub use pg::*;
pub use sqlite::*;

use crate::{Backend, FilterError, config::config};
use async_trait::async_trait;
use sqlx::{
    AssertSqlSafe, FromRow, PgPool, Pool, Sqlite,
    postgres::{PgConnectOptions, PgPoolOptions},
    sqlite::SqliteConnectOptions,
};
use std::str::FromStr;
use tracing::debug;

// structure to read back a textual value.
#[derive(Debug, FromRow)]
struct Pragma(String);

/// Executes dynamic SQL against one physical database. The materialized
/// view manager and the capability probes go through this seam; tests
/// install a recording implementation.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    /// Execute a statement, returning the affected-row count.
    async fn execute(&self, sql: &str) -> Result<u64, FilterError>;

    /// Fetch the first column of every row as text.
    async fn fetch_strings(&self, sql: &str) -> Result<Vec<String>, FilterError>;
}

/// [`SqlRunner`] over a PostgreSQL pool.
#[derive(Debug)]
pub struct PgRunner {
    pool: PgPool,
}

impl PgRunner {
    /// Connect a pool the usual way and verify PostGIS is installed.
    pub async fn connect(url: &str) -> Result<Self, FilterError> {
        let pool_opts = url
            .parse::<PgConnectOptions>()?
            .application_name(config().pg_appname());
        let pool = PgPoolOptions::new().connect_with(pool_opts).await?;

        // An OK result from PostGIS_Version() is the whole capability probe.
        let pragma = sqlx::query_as::<_, Pragma>("SELECT PostGIS_Version();")
            .fetch_one(&pool)
            .await
            .map_err(|x| {
                let msg = format!("PostGIS extension not usable: {x}");
                FilterError::BackendUnavailable(msg.into())
            })?;
        debug!("PostGIS Version = {}", pragma.0);

        Ok(Self { pool })
    }

    /// Wrap an existing pool; the caller vouches for PostGIS.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return this pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SqlRunner for PgRunner {
    async fn execute(&self, sql: &str) -> Result<u64, FilterError> {
        debug!("-- sql = {sql}");
        let safe_sql = AssertSqlSafe(sql.to_owned());
        let done = sqlx::query(safe_sql).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn fetch_strings(&self, sql: &str) -> Result<Vec<String>, FilterError> {
        debug!("-- sql = {sql}");
        let safe_sql = AssertSqlSafe(sql.to_owned());
        let rows = sqlx::query_as::<_, Pragma>(safe_sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|x| x.0).collect())
    }
}

/// [`SqlRunner`] over a SQLite pool with the SpatiaLite extension loaded.
#[derive(Debug)]
pub struct SqliteRunner {
    pool: Pool<Sqlite>,
}

impl SqliteRunner {
    /// Connect to a SQLite database file and verify SpatiaLite loads.
    pub async fn connect(url: &str) -> Result<Self, FilterError> {
        // IMPORTANT - this is UNSAFE but there is no way around it: the
        // SpatiaLite functions only exist once the extension is loaded.
        let pool_opts =
            unsafe { SqliteConnectOptions::from_str(url)?.extension("mod_spatialite") };
        let pool = sqlx::pool::PoolOptions::new()
            .connect_with(pool_opts)
            .await?;

        let pragma = sqlx::query_as::<_, Pragma>("SELECT spatialite_version();")
            .fetch_one(&pool)
            .await
            .map_err(|x| {
                let msg = format!("SpatiaLite extension not usable: {x}");
                FilterError::BackendUnavailable(msg.into())
            })?;
        debug!("SpatiaLite Version = {}", pragma.0);

        Ok(Self { pool })
    }

    /// Wrap an existing pool; the caller vouches for SpatiaLite.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Return this pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl SqlRunner for SqliteRunner {
    async fn execute(&self, sql: &str) -> Result<u64, FilterError> {
        debug!("-- sql = {sql}");
        let safe_sql = AssertSqlSafe(sql.to_owned());
        let done = sqlx::query(safe_sql).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn fetch_strings(&self, sql: &str) -> Result<Vec<String>, FilterError> {
        debug!("-- sql = {sql}");
        let safe_sql = AssertSqlSafe(sql.to_owned());
        let rows = sqlx::query_as::<_, Pragma>(safe_sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|x| x.0).collect())
    }
}

/// Refuse a forced backend whose capability probe cannot pass. Inferred
/// backends (no runner configured) ride the in-process paths instead of
/// failing here.
pub fn verify_forced_backend(
    backend: Backend,
    has_pg_runner: bool,
    has_sqlite_runner: bool,
) -> Result<(), FilterError> {
    match backend.effective() {
        Backend::PostgreSql if !has_pg_runner => Err(FilterError::BackendUnavailable(
            "Backend 'postgresql' was forced but no PostGIS connection is configured".into(),
        )),
        Backend::SpatiaLite if !has_sqlite_runner => Err(FilterError::BackendUnavailable(
            "Backend 'spatialite' was forced but no SpatiaLite connection is configured".into(),
        )),
        _ => Ok(()),
    }
}
