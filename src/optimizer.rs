// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Combined query optimizer.
//!
//! Successive filters naively compose as `(old) AND (new)`, which makes
//! the backend evaluate every condition for every feature. The optimizer
//! pattern-matches the handful of combinations multi-step filtering
//! actually produces and rewrites them into cheaper shapes: driving the
//! query off an existing session view, promoting huge inline FID lists to
//! an indexed view with a pre-computed buffer, collapsing dense FID lists
//! to range checks, and putting the FID test first where the engine
//! short-circuits left to right.
//!
//! The rewrites are deliberately regex-level: a bounded set of narrow
//! patterns, not a SQL parser. Anything unrecognized is left untouched.
//!

use crate::{
    Backend, FilterError, LayerDescriptor,
    config::config,
    mv::{MaterializedView, parse_session_hash},
    sanitize::dedupe_in_clauses,
};
use moka::sync::Cache;
use regex::{Regex, RegexBuilder};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

fn re(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("invalid optimizer pattern")
}

// "fid" IN (SELECT "pk" FROM "schema"."fm_temp_..."), session views only.
static MV_IN: LazyLock<Regex> = LazyLock::new(|| {
    re(r#""?(\w+)"?\s+IN\s*\(\s*SELECT\s+"?(\w+)"?\s+FROM\s+"?(\w+)"?\s*\.\s*"?((?:fm_temp_|filtermate_)\w+)"?\s*\)"#)
});

// EXISTS (SELECT 1 FROM "schema"."table" AS alias WHERE ST_Pred("t"."g", <src>) [AND <extra>])
static EXISTS_SPATIAL: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"EXISTS\s*\(\s*SELECT\s+1\s+FROM\s+"?(\w+)"?\s*\.\s*"?(\w+)"?\s+AS\s+(\w+)\s+WHERE\s+(ST_\w+)\s*\(\s*"?(\w+)"?\s*\.\s*"?(\w+)"?\s*,\s*(.+?)\s*\)\s*(?:AND\s+(.+?))?\s*\)"#)
});

// EXISTS whose source geometry is ST_Buffer(...) and whose extra clause is
// an inline FID list; the promotion candidate.
static EXISTS_BUFFER_FID: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"EXISTS\s*\(\s*SELECT\s+1\s+FROM\s+"([^"]+)"\s*\.\s*"([^"]+)"\s+AS\s+(\w+)\s+WHERE\s+(ST_\w+)\s*\(\s*"([^"]+)"\s*\.\s*"([^"]+)"\s*,\s*ST_Buffer\s*\(\s*\w+\s*\.\s*"([^"]+)"\s*,\s*([^,)]+?)\s*(?:,\s*'([^']+)')?\s*\)\s*\)\s*AND\s*\(\s*\w+\s*\.\s*"(\w+)"\s+IN\s*\(\s*([\d\s,]+)\s*\)\s*\)\s*\)"#)
});

// "fid" IN (1, 2, 3) - integers only.
static FID_LIST: LazyLock<Regex> =
    LazyLock::new(|| re(r#""?(\w+)"?\s+IN\s*\(\s*((?:\d+\s*,\s*)*\d+)\s*\)"#));

// Formatting-only redundancy.
static DOUBLE_PARENS: LazyLock<Regex> = LazyLock::new(|| re(r"\(\s*(\([^()]+\))\s*\)"));
static EMPTY_PARENS: LazyLock<Regex> = LazyLock::new(|| re(r"\(\s*\)"));
static WS: LazyLock<Regex> = LazyLock::new(|| re(r"\s+"));

/// What the optimizer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationKind {
    /// Nothing applied; expression is the plain combination.
    None,
    /// Query rewritten to drive off an existing session view.
    MvReuse,
    /// FID-list handling (ordering, inlining decisions).
    FidList,
    /// FID list collapsed to a range check.
    Range,
    /// Subqueries merged into a single driving query.
    SubqueryMerge,
    /// Formatting-only simplification.
    Simplify,
    /// Served from the memo cache.
    CacheHit,
    /// A source-selection view must be created first.
    SourceMv,
}

/// An optimizer verdict: the expression to use, plus whatever must be
/// materialized before it is valid.
#[derive(Debug, Clone)]
pub struct OptimizedExpression {
    /// The rewritten (or passed-through) expression.
    pub expression: String,
    /// Which rewrite fired.
    pub kind: OptimizationKind,
    /// Expected speedup multiplier; 1.0 when nothing fired.
    pub estimated_speedup: f64,
    /// Human-readable account of the rewrite.
    pub hint: String,
    /// View to create before the expression is usable.
    pub pending_mv: Option<MaterializedView>,
}

#[derive(Debug, Clone)]
struct MvRef {
    pk: String,
    schema: String,
    view: String,
}

#[derive(Debug, Clone)]
struct ExistsRef {
    schema: String,
    table: String,
    predicate: String,
    source_geom_expr: String,
}

/// Pattern-matching rewriter over combinations of an existing subset and a
/// new expression. Verdicts are memoized under an LRU-bounded cache.
pub struct CombinedQueryOptimizer {
    session_id: String,
    memo: Cache<String, Arc<OptimizedExpression>>,
}

impl std::fmt::Debug for CombinedQueryOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedQueryOptimizer")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl CombinedQueryOptimizer {
    /// Constructor.
    pub fn new(session_id: &str) -> Self {
        CombinedQueryOptimizer {
            session_id: session_id.to_owned(),
            memo: Cache::new(config().optimizer_cache_size()),
        }
    }

    /// Optimize the combination `old_subset <operator> new_expression` for
    /// one target. Returns `None` when no rewrite applies and the caller
    /// should fall back to the manual combination path.
    pub fn optimize(
        &self,
        old_subset: &str,
        new_expression: &str,
        operator: &str,
        target: &LayerDescriptor,
    ) -> Result<Option<OptimizedExpression>, FilterError> {
        if old_subset.trim().is_empty() || new_expression.trim().is_empty() {
            return Ok(None);
        }

        let memo_key = {
            let digest =
                md5::compute(format!("{old_subset}\x1f{new_expression}\x1f{operator}"));
            format!("{digest:x}")
        };
        if let Some(hit) = self.memo.get(&memo_key) {
            debug!("optimizer memo hit");
            let mut out = (*hit).clone();
            out.kind = OptimizationKind::CacheHit;
            return Ok(Some(out));
        }

        let result = match target.backend.effective() {
            Backend::PostgreSql => self.optimize_pg(old_subset, new_expression, operator, target),
            _ => self.optimize_lite(old_subset, new_expression, operator),
        };

        if let Some(out) = &result {
            info!(
                "query optimized ({:?}): ~{:.1}x speedup expected",
                out.kind, out.estimated_speedup
            );
            self.memo.insert(memo_key, Arc::new(out.clone()));
        }
        Ok(result)
    }

    // ---- PostgreSQL strategies, in order of effectiveness. ----

    fn optimize_pg(
        &self,
        old_subset: &str,
        new_expression: &str,
        operator: &str,
        target: &LayerDescriptor,
    ) -> Option<OptimizedExpression> {
        if operator.eq_ignore_ascii_case("AND") {
            if let Some(out) = self.try_source_mv(old_subset, new_expression, target) {
                return Some(out);
            }
            if let Some(out) = self.try_mv_reuse(old_subset, new_expression, target) {
                return Some(out);
            }
        }
        self.try_simplify(old_subset, new_expression, operator)
    }

    // SpatiaLite/OGR get the FID-level rewrites plus ordering and cleanup.
    fn optimize_lite(
        &self,
        old_subset: &str,
        new_expression: &str,
        operator: &str,
    ) -> Option<OptimizedExpression> {
        if operator.eq_ignore_ascii_case("AND")
            && let Some(out) = self.try_fid_rewrites(old_subset, new_expression)
        {
            return Some(out);
        }
        self.try_simplify(old_subset, new_expression, operator)
    }

    fn detect_mv(&self, expression: &str) -> Option<MvRef> {
        let caps = MV_IN.captures(expression)?;
        let view = caps[4].to_owned();
        // Only our own naming convention (or a legacy spelling) counts.
        if parse_session_hash(&view).is_none() && !view.starts_with("filtermate_") {
            return None;
        }
        Some(MvRef {
            pk: caps[1].to_owned(),
            schema: caps[3].to_owned(),
            view,
        })
    }

    fn detect_exists(&self, expression: &str) -> Option<ExistsRef> {
        let caps = EXISTS_SPATIAL.captures(expression)?;
        Some(ExistsRef {
            schema: caps[1].to_owned(),
            table: caps[2].to_owned(),
            predicate: caps[4].to_owned(),
            source_geom_expr: caps[7].to_owned(),
        })
    }

    // MV_REUSE: (pk IN mv) AND (EXISTS spatial) -> one query driven by the
    // view, so the spatial predicate only ever sees already-kept rows.
    fn try_mv_reuse(
        &self,
        old_subset: &str,
        new_expression: &str,
        target: &LayerDescriptor,
    ) -> Option<OptimizedExpression> {
        let mv = self.detect_mv(old_subset)?;
        let exists = self.detect_exists(new_expression)?;

        let source_geom = rewrite_alias(&exists.source_geom_expr, "__src");
        let expression = format!(
            "\"{pk}\" IN (SELECT mv.\"{pk}\" FROM \"{schema}\".\"{view}\" AS mv \
             WHERE EXISTS (SELECT 1 FROM \"{sschema}\".\"{stable}\" AS __src \
             WHERE {pred}(mv.\"{geom}\", {source_geom})))",
            pk = mv.pk,
            schema = mv.schema,
            view = mv.view,
            sschema = exists.schema,
            stable = exists.table,
            pred = exists.predicate,
            geom = target.geometry_column,
        );
        Some(OptimizedExpression {
            expression: squeeze(&expression),
            kind: OptimizationKind::MvReuse,
            estimated_speedup: 10.0,
            hint: format!(
                "Reused session view '{}' as the driving set; the spatial predicate \
                 now only evaluates its rows",
                mv.view
            ),
            pending_mv: None,
        })
    }

    // SOURCE_MV: (pk IN mv) AND (EXISTS ... ST_Buffer ... AND fid IN (big
    // list)) -> materialize the source selection with its buffer
    // pre-computed and indexed, then drive off both views.
    fn try_source_mv(
        &self,
        old_subset: &str,
        new_expression: &str,
        target: &LayerDescriptor,
    ) -> Option<OptimizedExpression> {
        let mv = self.detect_mv(old_subset)?;
        let caps = EXISTS_BUFFER_FID.captures(new_expression)?;

        let source_schema = caps[1].to_owned();
        let source_table = caps[2].to_owned();
        let predicate = caps[4].to_owned();
        let source_geom_col = caps[7].to_owned();
        let buffer_distance = caps[8].trim().to_owned();
        let buffer_style = caps
            .get(9)
            .map(|x| x.as_str().to_owned())
            .unwrap_or_else(|| "quad_segs=5".to_owned());
        let fid_column = caps[10].to_owned();
        let fids: Vec<i64> = caps[11]
            .split(',')
            .filter_map(|x| x.trim().parse().ok())
            .collect();
        if fids.is_empty() {
            return None;
        }

        if fids.len() > config().source_fid_mv_threshold() {
            let source_mv = MaterializedView::source_selection(
                &self.session_id,
                &source_schema,
                &source_table,
                &source_geom_col,
                &fid_column,
                &fids,
                &buffer_distance,
                &buffer_style,
            );
            let expression = format!(
                "\"{pk}\" IN (SELECT mv.\"{pk}\" FROM \"{schema}\".\"{view}\" AS mv \
                 WHERE EXISTS (SELECT 1 FROM {src} AS __src \
                 WHERE {predicate}(mv.\"{geom}\", __src.geom_buffered)))",
                pk = mv.pk,
                schema = mv.schema,
                view = mv.view,
                src = source_mv.qualified_name(),
                geom = target.geometry_column,
            );
            info!(
                "promoting {} inline fids to source view {}",
                fids.len(),
                source_mv.name
            );
            return Some(OptimizedExpression {
                expression: squeeze(&expression),
                kind: OptimizationKind::SourceMv,
                estimated_speedup: 20.0,
                hint: format!(
                    "Source view with pre-computed buffer ({} fids -> {})",
                    fids.len(),
                    source_mv.name
                ),
                pending_mv: Some(source_mv),
            });
        }

        // Small list: keep it inline but still pre-compute the buffer once
        // per source row inside a derived table.
        let fid_list = fids
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let expression = format!(
            "\"{pk}\" IN (SELECT mv.\"{pk}\" FROM \"{schema}\".\"{view}\" AS mv \
             WHERE EXISTS (SELECT 1 FROM (SELECT \"{sgeom}\", \
             ST_Buffer(\"{sgeom}\", {buffer_distance}, '{buffer_style}') AS geom_buffered \
             FROM \"{sschema}\".\"{stable}\" WHERE \"{fidcol}\" IN ({fid_list})) AS __src \
             WHERE {predicate}(mv.\"{geom}\", __src.geom_buffered)))",
            pk = mv.pk,
            schema = mv.schema,
            view = mv.view,
            sgeom = source_geom_col,
            sschema = source_schema,
            stable = source_table,
            fidcol = fid_column,
            geom = target.geometry_column,
        );
        Some(OptimizedExpression {
            expression: squeeze(&expression),
            kind: OptimizationKind::SubqueryMerge,
            estimated_speedup: 10.0,
            hint: format!(
                "Restructured query with pre-computed buffer ({} fids inline)",
                fids.len()
            ),
            pending_mv: None,
        })
    }

    // FID_RANGE + FID_ORDER for engines that evaluate left to right.
    fn try_fid_rewrites(
        &self,
        old_subset: &str,
        new_expression: &str,
    ) -> Option<OptimizedExpression> {
        // Which side carries the FID list?
        let (fid_side, other_side, fid_in_old) = match (
            FID_LIST.captures(old_subset),
            FID_LIST.captures(new_expression),
        ) {
            (Some(_), _) => (old_subset, new_expression, true),
            (None, Some(_)) => (new_expression, old_subset, false),
            _ => return None,
        };
        let caps = FID_LIST.captures(fid_side).expect("just matched");
        let field = caps[1].to_owned();
        let fids: Vec<i64> = caps[2]
            .split(',')
            .filter_map(|x| x.trim().parse().ok())
            .collect();

        let (fid_clause, kind, speedup, hint) = match fid_range_expression(&field, &fids) {
            Some(range) => {
                let rewritten = fid_side.replace(&caps[0], &range);
                (
                    rewritten,
                    OptimizationKind::Range,
                    2.0,
                    format!("Converted {} fids to a range expression", fids.len()),
                )
            }
            None => (
                fid_side.to_owned(),
                OptimizationKind::FidList,
                1.5,
                "Placed the FID predicate first for short-circuit evaluation".to_owned(),
            ),
        };

        // No reordering gain when the FID side was already first.
        if kind == OptimizationKind::FidList && fid_in_old {
            return None;
        }

        let expression = dedupe_in_clauses(&format!("({fid_clause}) AND ({other_side})"));
        Some(OptimizedExpression {
            expression: squeeze(&expression),
            kind,
            estimated_speedup: speedup,
            hint,
            pending_mv: None,
        })
    }

    // Formatting-only cleanup. Fires only when it changes something.
    fn try_simplify(
        &self,
        old_subset: &str,
        new_expression: &str,
        operator: &str,
    ) -> Option<OptimizedExpression> {
        let combined = format!("({old_subset}) {operator} ({new_expression})");
        let mut simplified = combined.clone();
        loop {
            let next = DOUBLE_PARENS.replace_all(&simplified, "$1").into_owned();
            if next == simplified {
                break;
            }
            simplified = next;
        }
        simplified = EMPTY_PARENS.replace_all(&simplified, "").into_owned();
        simplified = squeeze(&simplified);
        if simplified == squeeze(&combined) {
            return None;
        }
        Some(OptimizedExpression {
            expression: simplified,
            kind: OptimizationKind::Simplify,
            estimated_speedup: 1.1,
            hint: "Removed redundant parentheses and whitespace".to_owned(),
            pending_mv: None,
        })
    }
}

/// Rewrite `(field >= a AND field <= b [AND field NOT IN (gaps)])` from a
/// dense-enough FID list. `None` when the rewrite would not pay off.
pub fn fid_range_expression(field: &str, fids: &[i64]) -> Option<String> {
    if fids.len() < config().fid_range_threshold() {
        return None;
    }
    let mut sorted = fids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let min = *sorted.first()?;
    let max = *sorted.last()?;
    let span = (max - min + 1) as usize;
    let coverage = sorted.len() as f64 / span as f64;
    if coverage < 0.5 {
        return None;
    }

    let mut gaps = Vec::new();
    let mut expect = min;
    for x in &sorted {
        while expect < *x {
            gaps.push(expect);
            expect += 1;
        }
        expect = *x + 1;
    }

    if gaps.is_empty() {
        Some(format!("(\"{field}\" >= {min} AND \"{field}\" <= {max})"))
    } else if gaps.len() * 4 < sorted.len() {
        let gap_list = gaps
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "(\"{field}\" >= {min} AND \"{field}\" <= {max} AND \"{field}\" NOT IN ({gap_list}))"
        ))
    } else {
        None
    }
}

// Swap whatever alias the detected EXISTS used for the one our rewrite
// introduces.
fn rewrite_alias(source_geom_expr: &str, alias: &str) -> String {
    static ALIAS: LazyLock<Regex> = LazyLock::new(|| re(r"\b\w+\s*\.\s*"));
    ALIAS
        .replace_all(source_geom_expr, format!("{alias}."))
        .into_owned()
}

fn squeeze(s: &str) -> String {
    WS.replace_all(s, " ").trim().to_owned()
}
