// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Multi-step filter planner.
//!
//! Splits a composite expression on its top-level `AND`s, classifies each
//! conjunct, and orders the steps so the cheapest large reductions run
//! first: spatial, then simple attribute comparisons, then the complex
//! remainder. The planner only recommends; the caller decides whether to
//! execute the steps as successive applications or collapse them back
//! into one expression.
//!

use core::fmt;
use tracing::debug;

/// Estimated reduction and cost constants, per operation class.
const SPATIAL_REDUCTION_PCT: f64 = 70.0;
const SIMPLE_ATTR_REDUCTION_PCT: f64 = 40.0;
const COMPLEX_REDUCTION_PCT: f64 = 20.0;
const SPATIAL_MS_PER_1K: f64 = 50.0;
const SIMPLE_ATTR_MS_PER_1K: f64 = 5.0;
const COMPLEX_MS_PER_1K: f64 = 15.0;

// Function names marking a conjunct as spatial; prefixed and host forms.
const SPATIAL_FUNCTIONS: [&str; 21] = [
    "ST_INTERSECTS",
    "ST_CONTAINS",
    "ST_WITHIN",
    "ST_OVERLAPS",
    "ST_CROSSES",
    "ST_TOUCHES",
    "ST_DISJOINT",
    "ST_DWITHIN",
    "ST_BUFFER",
    "ST_ENVELOPE",
    "INTERSECTS",
    "CONTAINS",
    "WITHIN",
    "OVERLAPS",
    "CROSSES",
    "TOUCHES",
    "DISJOINT",
    "BUFFER",
    "GEOM_FROM_WKT",
    "GEOMFROMTEXT",
    "$GEOMETRY",
];

// Function names marking an attribute conjunct as complex.
const COMPLEX_FUNCTIONS: [&str; 14] = [
    "REGEXP_MATCH",
    "REGEXP_REPLACE",
    "SUBSTR",
    "LENGTH",
    "CONCAT",
    "UPPER",
    "LOWER",
    "TO_STRING",
    "TO_INT",
    "COALESCE",
    "CASE",
    "WHEN",
    "ARRAY_",
    "MAP_",
];

/// Classification of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationType {
    /// Spatial predicate; highest reduction, runs first.
    Spatial,
    /// Plain field comparison; cheap, runs next.
    Attribute,
    /// Function-heavy conjunct; unpredictable, runs last.
    PostProcess,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Spatial => write!(f, "spatial"),
            OperationType::Attribute => write!(f, "attribute"),
            OperationType::PostProcess => write!(f, "post_process"),
        }
    }
}

/// One element of a multi-step plan.
#[derive(Debug, Clone)]
pub struct FilterStep {
    /// 1-indexed position in the plan.
    pub step_number: usize,
    /// The conjunct this step applies.
    pub expression: String,
    /// What kind of work it is.
    pub operation_type: OperationType,
    /// Estimated share of features removed, 0..=100.
    pub estimated_reduction_pct: f64,
    /// Estimated execution cost in milliseconds.
    pub estimated_cost_ms: u64,
}

/// Split an expression on its top-level `AND`s, respecting parentheses and
/// string literals.
pub fn split_top_level_and(expression: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_literal = false;
    let mut current = String::new();
    let upper: Vec<char> = expression.chars().collect();
    let mut i = 0usize;

    while i < upper.len() {
        let c = upper[i];
        match c {
            '\'' => {
                in_literal = !in_literal;
                current.push(c);
            }
            '(' if !in_literal => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_literal => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            'A' | 'a' if !in_literal && depth == 0 => {
                // A top-level AND must be a standalone word.
                let rest: String = upper[i..].iter().take(4).collect();
                let boundary_before = current
                    .chars()
                    .next_back()
                    .is_none_or(|p| !p.is_alphanumeric() && p != '_');
                let after = upper.get(i + 3);
                let boundary_after =
                    after.is_none_or(|p| !p.is_alphanumeric() && *p != '_');
                if rest.to_ascii_uppercase().starts_with("AND")
                    && boundary_before
                    && boundary_after
                {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        parts.push(trimmed.to_owned());
                    }
                    current.clear();
                    i += 3;
                    continue;
                }
                current.push(c);
            }
            _ => current.push(c),
        }
        i += 1;
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_owned());
    }
    parts
}

/// Classify one conjunct.
pub fn classify(conjunct: &str) -> OperationType {
    let upper = conjunct.to_uppercase();
    if SPATIAL_FUNCTIONS
        .iter()
        .any(|f| upper.contains(&format!("{f}(")) || upper.contains(*f) && f.starts_with('$'))
    {
        return OperationType::Spatial;
    }
    if COMPLEX_FUNCTIONS.iter().any(|f| upper.contains(f)) {
        return OperationType::PostProcess;
    }
    OperationType::Attribute
}

fn reduction_for(op: OperationType) -> f64 {
    match op {
        OperationType::Spatial => SPATIAL_REDUCTION_PCT,
        OperationType::Attribute => SIMPLE_ATTR_REDUCTION_PCT,
        OperationType::PostProcess => COMPLEX_REDUCTION_PCT,
    }
}

fn cost_for(op: OperationType, feature_count: u64) -> u64 {
    let per_1k = match op {
        OperationType::Spatial => SPATIAL_MS_PER_1K,
        OperationType::Attribute => SIMPLE_ATTR_MS_PER_1K,
        OperationType::PostProcess => COMPLEX_MS_PER_1K,
    };
    let thousands = (feature_count as f64 / 1000.0).max(1.0);
    (per_1k * thousands).round() as u64
}

/// Decompose a composite expression into ordered steps.
///
/// Single conjuncts (or single-class compositions that would gain nothing)
/// come back as one step. Cumulative reductions shrink the feature count
/// each subsequent step is costed against.
pub fn decompose(expression: &str, feature_count: u64) -> Vec<FilterStep> {
    let conjuncts = split_top_level_and(expression);
    if conjuncts.len() <= 1 {
        let op = classify(expression);
        return vec![FilterStep {
            step_number: 1,
            expression: expression.trim().to_owned(),
            operation_type: op,
            estimated_reduction_pct: reduction_for(op),
            estimated_cost_ms: cost_for(op, feature_count),
        }];
    }

    let mut classified: Vec<(OperationType, String)> = conjuncts
        .into_iter()
        .map(|c| (classify(&c), c))
        .collect();
    // Spatial first, attribute next, post-process last; stable within a
    // class to keep the author's ordering.
    classified.sort_by_key(|(op, _)| *op);

    let mut remaining = feature_count;
    let steps: Vec<FilterStep> = classified
        .into_iter()
        .enumerate()
        .map(|(ndx, (op, expression))| {
            let reduction = reduction_for(op);
            let cost = cost_for(op, remaining);
            remaining = ((remaining as f64) * (1.0 - reduction / 100.0)).round() as u64;
            let excerpt: String = expression.chars().take(60).collect();
            debug!(
                "step {}: {op} '{excerpt}' (~{reduction}% reduction, ~{cost}ms, {remaining} left)",
                ndx + 1,
            );
            FilterStep {
                step_number: ndx + 1,
                expression,
                operation_type: op,
                estimated_reduction_pct: reduction,
                estimated_cost_ms: cost,
            }
        })
        .collect();
    steps
}
