// SPDX-License-Identifier: Apache-2.0

//! Universal invariants of the engine, tested through the public API.
//!

mod test_combine;
mod test_fid_range;
mod test_naming;
mod test_sanitizer;
mod test_sessions;
mod test_threading;
mod test_wkt;
