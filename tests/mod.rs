// SPDX-License-Identifier: Apache-2.0

//! Engine test suite: universal invariants + end-to-end scenarios.
//!

// Common test harnesses: mock host layers, registries, executors, runners.
mod utils;

/// Universal invariants: sanitizer idempotence, combination associativity,
/// deterministic view naming, WKT budgets, tolerance monotonicity,
/// FID-range soundness, UI-thread exclusivity, session isolation.
mod props;

/// End-to-end scenarios driving [`FilterEngine`] against the mock host.
mod scenarios;
