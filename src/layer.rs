// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Backend identification + the per-request layer descriptor.
//!

use crate::{FilterError, host::HostLayer};
use core::fmt;

/// Concrete spatial-query executor tied to a storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// PostgreSQL w/ the PostGIS extension.
    PostgreSql,
    /// SQLite w/ the SpatiaLite extension.
    SpatiaLite,
    /// Anything driven through OGR-style drivers; filtered in-process.
    Ogr,
    /// In-memory scratch layers. Treated as [`Backend::Ogr`] downstream.
    Memory,
}

impl Backend {
    /// Map a host provider string to a backend. Unknown providers land on
    /// the OGR path which makes no assumption about the driver's SQL.
    pub fn from_provider(provider: &str) -> Self {
        match provider.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Backend::PostgreSql,
            "spatialite" => Backend::SpatiaLite,
            "memory" => Backend::Memory,
            _ => Backend::Ogr,
        }
    }

    /// Parse a forced-backend name from the request envelope.
    pub fn parse_forced(name: &str) -> Result<Self, FilterError> {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::PostgreSql),
            "spatialite" => Ok(Backend::SpatiaLite),
            "ogr" => Ok(Backend::Ogr),
            "memory" => Ok(Backend::Memory),
            _ => {
                let msg = format!("Unknown backend '{name}'");
                Err(FilterError::Input(msg.into()))
            }
        }
    }

    /// Normalize to one of the three executable backends. Memory layers
    /// ride the in-process OGR path.
    pub fn effective(self) -> Self {
        match self {
            Backend::Memory => Backend::Ogr,
            x => x,
        }
    }

    /// TRUE for backends that execute SQL in an external database.
    pub fn is_database(self) -> bool {
        matches!(self, Backend::PostgreSql | Backend::SpatiaLite)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Backend::PostgreSql => "postgresql",
            Backend::SpatiaLite => "spatialite",
            Backend::Ogr => "ogr",
            Backend::Memory => "memory",
        };
        write!(f, "{s}")
    }
}

/// Everything downstream code needs to know about one layer, resolved once
/// per request. Immutable for the request's lifetime; the underlying layer
/// is owned by the external host.
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
    /// Host layer id.
    pub layer_id: String,
    /// Effective backend; resolved once, read everywhere.
    pub backend: Backend,
    /// Schema, when the backend has one.
    pub schema: Option<String>,
    /// Table (or layer) name in the storage engine.
    pub table: String,
    /// Geometry column name.
    pub geometry_column: String,
    /// Primary key column name.
    pub primary_key: String,
    /// TRUE when the pk is numeric (affects quoting of `IN` lists).
    pub primary_key_is_numeric: bool,
    /// CRS authority id; e.g. `EPSG:4326`.
    pub crs_auth_id: String,
    /// TRUE when CRS units are degrees.
    pub crs_is_geographic: bool,
    /// SRID numeric component of the CRS, when derivable.
    pub srid: Option<u32>,
    /// Authoritative field names, in layer order.
    pub field_names: Vec<String>,
    /// Host's cheap feature-count estimate, when known.
    pub feature_count_hint: Option<u64>,
    /// Physical database file for SQLite-family backends; used by the
    /// parallelism policy to respect the single-writer limit.
    pub database_path: Option<String>,
}

impl LayerDescriptor {
    /// Resolve a descriptor from a host layer, honouring a forced backend
    /// when present.
    pub fn resolve(
        layer: &dyn HostLayer,
        forced_backend: Option<&str>,
    ) -> Result<Self, FilterError> {
        let backend = match forced_backend {
            Some(name) => Backend::parse_forced(name)?,
            None => Backend::from_provider(&layer.provider_type()),
        }
        .effective();

        let crs_auth_id = layer.crs_auth_id();
        let srid = crs_auth_id
            .rsplit(':')
            .next()
            .and_then(|x| x.parse::<u32>().ok());

        Ok(LayerDescriptor {
            layer_id: layer.id().to_owned(),
            backend,
            schema: layer.source_schema(),
            table: layer.source_table(),
            geometry_column: layer.geometry_column(),
            primary_key: layer.primary_key(),
            primary_key_is_numeric: layer.primary_key_is_numeric(),
            crs_auth_id,
            crs_is_geographic: layer.crs_is_geographic(),
            srid,
            field_names: layer.fields(),
            feature_count_hint: layer.feature_count(),
            database_path: layer.database_path(),
        })
    }

    /// `"schema"."table"` or `"table"` when schema-less.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(s) => format!("\"{}\".\"{}\"", s, self.table),
            None => format!("\"{}\"", self.table),
        }
    }
}
