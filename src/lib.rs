// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Multi-backend spatial filter engine.
//!
//! The next paragraphs explain in more details the elements of this project
//! as well as the rationale behind some of the decisions that shaped its
//! components.
//!
//! # Requests
//!
//! The kernel of this project is the [`FilterRequest`]: a declarative
//! envelope naming a source layer, how its driving selection is determined,
//! the target layers to filter by spatial relation to it, and the optional
//! buffer and centroid twists. Requests are plain data and `serde`
//! deserializable, so a host can hand them over as JSON:
//! ```rust
//! use filtermate::prelude::*;
//! # use std::error::Error;
//!
//! # fn test() -> Result<(), Box<dyn Error>> {
//! let request: FilterRequest = serde_json::from_str(r#"
//! {
//!   "action": "filter",
//!   "source_layer_id": "towns",
//!   "selection": { "expression": "\"population\" > 10000" },
//!   "targets": [
//!     { "layer_id": "roads", "predicates": ["intersects"], "combine": "and" }
//!   ],
//!   "buffer": { "distance": 50.0, "segments": 5, "end_cap": "round", "dissolve": true },
//!   "session_id": "a1b2c3",
//!   "project_uuid": "7c9e6679-7425-40de-944b-e07fc1f90ae7"
//! }"#)?;
//! request.validate()?;
//! #     Ok(())
//! # }
//! ```
//!
//! # The expression pipeline
//!
//! Subset strings round-trip through the GIS host, picking up
//! locale-translated connectives and non-boolean display clauses along the
//! way. [`sanitize_subset_string`] scrubs them; [`qualify_field_names`] and
//! [`translate_geometry_functions`] move an expression into the target
//! dialect; [`combine_with_subset`] joins a new filter onto whatever the
//! layer already carries. The [`CombinedQueryOptimizer`] then
//! pattern-matches the combinations multi-step filtering produces and
//! rewrites them for lower cost; its rewrites are a bounded set of narrow
//! regex-level patterns, deliberately not a SQL parser, and anything
//! unrecognized passes through untouched.
//!
//! # Geometry preparation
//!
//! [`GeometryPreparer`] turns the driving selection into exactly one
//! [`PreparedSourceGeometry`]: a table reference when source and target
//! both live in PostgreSQL, an in-memory snapshot for the OGR path, or a
//! dissolved WKT literal everyone can consume. Invalid features walk a
//! repair ladder (`make_valid`, the zero-width-buffer trick, simplify,
//! convex hull, bounding box), buffers fall back from the
//! collection-at-once path to per-feature buffering plus union, and
//! oversized WKT is ground down by [`simplify_adaptive`] until it fits the
//! configured budget. The heavy lifting rides the [geos][1] and [proj][2]
//! crates.
//!
//! # Backends
//!
//! Each target layer resolves to one [`Backend`] once, and everything
//! downstream reads only that. PostgreSQL targets get `ST_`-prefixed
//! predicates and an `EXISTS` correlated subquery for large selections;
//! SpatiaLite takes unprefixed functions over a `GeomFromText` literal;
//! OGR targets cannot express spatial joins in their subset strings at
//! all, so the relation is evaluated in-process and lands as a plain
//! `fid IN (...)` list.
//!
//! # Orchestration
//!
//! [`FilterEngine::run`] sequences the whole thing: source first, then the
//! distant layers, with per-target failure isolation and a partial-success
//! report naming the casualties. Host mutations never happen off the UI
//! thread; they funnel through a queue drained by a single runnable handed
//! to the host's [`UiExecutor`]. Session-scoped materialized views cache
//! intermediate result sets between steps and are garbage-collected when
//! their session dies.
//!
//! # Third-party crates
//!
//! In addition to `geos`, `proj` and `sqlx` already mentioned, the most
//! important ones...
//!
//! 1. Logging + errors:
//!    * [tracing][3]: structured logging throughout.
//!    * [thiserror][4]: the [`FilterError`] taxonomy.
//!
//! 2. Pattern rewrites:
//!    * [regex][5]: the bounded rewrite set of the sanitizer and optimizer.
//!
//! 3. Caching + hashing:
//!    * [moka][6]: bounded caches w/ LRU-style eviction.
//!    * [md5][7]: the wire-exact view-name hash components.
//!
//! 4. Async runtime:
//!    * [tokio][8] + [futures][9]: request execution and database fan-out.
//!
//! [1]: https://crates.io/crates/geos
//! [2]: https://crates.io/crates/proj
//! [3]: https://crates.io/crates/tracing
//! [4]: https://crates.io/crates/thiserror
//! [5]: https://crates.io/crates/regex
//! [6]: https://crates.io/crates/moka
//! [7]: https://crates.io/crates/md5
//! [8]: https://crates.io/crates/tokio
//! [9]: https://crates.io/crates/futures
//!

mod analyzer;
mod backend;
mod cache;
mod config;
mod error;
mod expression;
mod geometry;
mod history;
mod host;
mod layer;
mod mv;
mod optimizer;
mod orchestrator;
mod plan;
mod progress;
mod queue;
mod request;
mod sanitize;

#[cfg(test)]
mod testing;

pub use analyzer::*;
pub use backend::*;
pub use cache::*;
pub use config::{Config, config};
pub use error::FilterError;
pub use expression::*;
pub use geometry::*;
pub use history::*;
pub use host::*;
pub use layer::*;
pub use mv::*;
pub use optimizer::*;
pub use orchestrator::*;
pub use plan::*;
pub use progress::*;
pub use queue::*;
pub use request::*;
pub use sanitize::*;

pub mod prelude;
