// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Group imports of many common traits and types by adding a glob import
//! for use by clients of this library.
//!

pub use super::analyzer::*;
pub use super::backend::*;
pub use super::cache::*;
pub use super::error::*;
pub use super::expression::*;
pub use super::geometry::*;
pub use super::history::*;
pub use super::host::*;
pub use super::layer::*;
pub use super::mv::*;
pub use super::optimizer::*;
pub use super::orchestrator::*;
pub use super::plan::*;
pub use super::progress::*;
pub use super::queue::*;
pub use super::request::*;
pub use super::sanitize::*;
