// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driving the engine against the mock host.
//!

/// Simple attribute filter, OGR target.
mod test_1;

/// PostgreSQL pair with a buffer: source-selection view promotion.
mod test_2;

/// Multi-step plan: two spatial predicates then an attribute.
mod test_3;

/// Large FID list on a SpatiaLite target: range conversion + ordering.
mod test_4;

/// Geographic CRS with a large buffer: loud unit-mismatch failure.
mod test_5;

/// Cancellation mid-fan-out: applied targets stay, the rest untouched.
mod test_6;
