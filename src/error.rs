// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Errors raised from this library.
//!

use std::borrow::Cow;
use thiserror::Error;

/// Variants of error raised from this library.
///
/// The first group wraps errors bubbling up from third-party crates. The
/// second group carries the engine's own failure taxonomy: a request that is
/// self-inconsistent, a backend missing a required extension, a source
/// geometry that could not be prepared, a dialect that rejected a generated
/// expression, and so on.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Data serialization/deserialization + I/O errors.
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),

    /// Database (`sqlx`) related error.
    #[error("SQL error: {0}")]
    SQL(#[from] sqlx::Error),

    /// Geometry (`geos`) related error.
    #[error("Geos error: {0}")]
    Geos(#[from] geos::Error),

    /// CRS construction error.
    #[error("CRS creation error: {0}")]
    CRS(#[from] proj::ProjCreateError),

    /// Coordinate transformation (`proj`) related error.
    #[error("Proj error: {0}")]
    Proj(#[from] proj::ProjError),

    /// JSON (`serde`) related error raised when decoding host payloads.
    #[error("Json [Try]From error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request is self-inconsistent; e.g. no selection, or a source
    /// layer id that does not resolve. No layer was mutated.
    #[error("Invalid request: {0}")]
    Input(Cow<'static, str>),

    /// A forced backend lacks a required extension or cannot be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(Cow<'static, str>),

    /// The repair ladder was exhausted on the source, or a buffer was
    /// requested in units the source CRS cannot express.
    #[error("Geometry preparation failed: {0}")]
    GeometryPreparation(Cow<'static, str>),

    /// A backend rejected the generated expression for one target layer.
    #[error("Dialect rejected expression for layer '{layer}': {reason}")]
    DialectExecution {
        /// Id of the target layer whose backend refused the expression.
        layer: String,
        /// What the backend reported.
        reason: String,
    },

    /// Connection lost or lock conflict. Retried once where the contract
    /// allows it; reaching the caller means the retry failed too.
    #[error("Transient database error: {0}")]
    Transient(Cow<'static, str>),

    /// A subset string whose parentheses cannot be balanced without
    /// rewriting operand positions.
    #[error("Malformed expression: {0}")]
    MalformedExpression(Cow<'static, str>),

    /// Cooperative cancellation was observed. Not a user-visible error.
    #[error("Operation canceled")]
    Canceled,

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(Cow<'static, str>),
}

impl FilterError {
    /// TRUE when retrying the failed operation once is worth attempting.
    pub fn is_transient(&self) -> bool {
        match self {
            FilterError::Transient(_) => true,
            FilterError::SQL(x) => matches!(
                x,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}
