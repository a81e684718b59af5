// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Read-only census of a subset string.
//!
//! The optimizer uses it for cheap pre-checks before firing its heavier
//! detectors; the subset-application queue uses it to decide whether a
//! freshly applied filter warrants a forced data reload.
//!

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

fn re(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("invalid analyzer pattern")
}

static SESSION_MV_NAME: LazyLock<Regex> =
    LazyLock::new(|| re(r"\b(?:fm_temp_|filtermate_)\w+"));
static EXISTS_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"\bEXISTS\s*\("));
static ST_BUFFER: LazyLock<Regex> = LazyLock::new(|| re(r"\bST_Buffer\s*\("));
static IN_LIST: LazyLock<Regex> = LazyLock::new(|| re(r"\bIN\s*\(\s*([\d\s,]+)\)"));
static SPATIAL_FN: LazyLock<Regex> = LazyLock::new(|| {
    re(r"\b(?:ST_)?(?:Intersects|Contains|Within|Touches|Overlaps|Crosses|Disjoint|Equals|DWithin|Covers|CoveredBy)\s*\(")
});

/// In-list size at which a filter counts as complex.
const COMPLEX_IN_LIST_LEN: usize = 100;

/// What the census found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubsetCensus {
    /// A session materialized view is referenced by name.
    pub references_session_mv: bool,
    /// Number of `EXISTS (` blocks.
    pub exists_blocks: usize,
    /// Number of `ST_Buffer(` calls.
    pub buffer_calls: usize,
    /// Number of spatial-function calls (prefixed or not).
    pub spatial_calls: usize,
    /// Lengths of every numeric `IN (...)` list, in order of appearance.
    pub in_list_lengths: Vec<usize>,
}

impl SubsetCensus {
    /// Longest numeric `IN` list seen.
    pub fn max_in_list(&self) -> usize {
        self.in_list_lengths.iter().copied().max().unwrap_or(0)
    }

    /// TRUE when applying this subset warrants a forced reload: any
    /// `EXISTS`, `ST_Buffer`, session-MV reference, or an `IN` list with
    /// hundreds of ids.
    pub fn is_complex(&self) -> bool {
        self.references_session_mv
            || self.exists_blocks > 0
            || self.buffer_calls > 0
            || self.max_in_list() >= COMPLEX_IN_LIST_LEN
    }
}

/// Walk one subset string and count the patterns of interest.
pub fn analyze(subset: &str) -> SubsetCensus {
    if subset.trim().is_empty() {
        return SubsetCensus::default();
    }
    let in_list_lengths = IN_LIST
        .captures_iter(subset)
        .map(|c| c[1].split(',').filter(|x| !x.trim().is_empty()).count())
        .collect();
    SubsetCensus {
        references_session_mv: SESSION_MV_NAME.is_match(subset),
        exists_blocks: EXISTS_BLOCK.find_iter(subset).count(),
        buffer_calls: ST_BUFFER.find_iter(subset).count(),
        spatial_calls: SPATIAL_FN.find_iter(subset).count(),
        in_list_lengths,
    }
}
