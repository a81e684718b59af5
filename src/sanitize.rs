// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Subset-string sanitizer.
//!
//! Host-facing subset strings round-trip through the GIS host, which may
//! inject display-only sub-expressions (a `COALESCE` of a field with a
//! placeholder, a rule-based `CASE` whose legs return `true`/`false`) and
//! locale-translated connectives. None of those survive as a SQL `WHERE`
//! clause. The sanitizer runs three idempotent phases: operator
//! normalization, removal of non-boolean clauses, and cleanup.
//!

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

fn re(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("invalid sanitizer pattern")
}

fn re_dotall(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("invalid sanitizer pattern")
}

// Locale connectives normalized to canonical SQL. Whitespace-delimited
// (a quoted single-letter identifier like `"y"` must survive); applied
// outside string literals only.
static LOCALE_OPERATORS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // FR
        (re(r"\s+ET\s+NON\s+"), " AND NOT "),
        (re(r"\s+ET\s+"), " AND "),
        (re(r"\s+OU\s+"), " OR "),
        (re(r"\s+NON\s+"), " NOT "),
        // DE
        (re(r"\s+UND\s+NICHT\s+"), " AND NOT "),
        (re(r"\s+UND\s+"), " AND "),
        (re(r"\s+ODER\s+"), " OR "),
        (re(r"\s+NICHT\s+"), " NOT "),
        // ES
        (re(r"\s+Y\s+NO\s+"), " AND NOT "),
        (re(r"\s+Y\s+"), " AND "),
        (re(r"\s+O\s+"), " OR "),
        (re(r"\s+NO\s+"), " NOT "),
        // IT / PT share E; PT uses OU like FR, IT uses O like ES.
        (re(r"\s+E\s+NON\s+"), " AND NOT "),
        (re(r"\s+E\s+"), " AND "),
        (re(r"\s+NÃO\s+"), " NOT "),
    ]
});

// Display expressions: AND/OR ( COALESCE("field", 'literal') ) with or
// without a table prefix, spaces tolerated everywhere.
static COALESCE_CLAUSES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        re(r#"(?:^|\s+)(?:AND|OR)\s+\(\s*COALESCE\s*\(\s*"[^"]+"\s*(?:\.\s*"[^"]+"\s*)?,\s*'[^']*'\s*\)\s*\)"#),
        re(r#"(?:^|\s+)(?:AND|OR)\s+\(\s*COALESCE\s*\([^()]*(?:\([^()]*\)[^()]*)*\)\s*\)"#),
    ]
});

// Rule-based symbology: AND ( [SELECT] CASE WHEN ... THEN true ... END ).
static CASE_CLAUSES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        re_dotall(r"\s*(?:AND|OR)\s+\(\s*SELECT\s+CASE\s+(?:WHEN\s+.+?THEN\s+(?:true|false)\s*)+(?:ELSE\s+.+?)?\s*END\s*\)+"),
        re_dotall(r"\s*(?:AND|OR)\s+\(\s*CASE\s+(?:WHEN\s+.+?THEN\s+(?:true|false)\s*)+(?:ELSE\s+.+?)?\s*END\s*\)+"),
    ]
});

// Standalone display expression opening the string.
static LEADING_COALESCE: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"^\s*\(\s*COALESCE\s*\([^()]*(?:\([^()]*\)[^()]*)*\)\s*\)\s*(?:AND|OR)?"#)
});

// Bare field references used as booleans: AND ( "field" ) with no
// comparison following. Also the "table"."field" and "field"::type forms.
// The no-comparison-follows check happens in code: `regex` has no lookahead.
static NON_BOOLEAN_FIELDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        re(r#"\s+(?:AND|OR)\s+\(\s*"[^"]+"\s*\.\s*"[^"]+"\s*\)"#),
        re(r#"\s+(?:AND|OR)\s+\(\s*"[^"]+"(?:::\w+)?\s*\)"#),
    ]
});

// Drop any NON_BOOLEAN_FIELDS match that is not followed by a comparison
// operator.
fn remove_non_boolean_fields(s: &str) -> String {
    let mut result = s.to_owned();
    for pattern in NON_BOOLEAN_FIELDS.iter() {
        loop {
            let candidate = pattern
                .find_iter(&result)
                .map(|m| (m.start(), m.end()))
                .find(|(_, end)| {
                    let tail = result[*end..].trim_start();
                    !tail.starts_with(['=', '<', '>', '!'])
                });
            match candidate {
                Some((start, end)) => {
                    info!(
                        "Removing non-boolean field clause: '{}'",
                        clip(&result[start..end])
                    );
                    result.replace_range(start..end, "");
                }
                None => break,
            }
        }
    }
    result
}

static DUP_AND: LazyLock<Regex> = LazyLock::new(|| re(r"\s+AND\s+AND\s+"));
static DUP_OR: LazyLock<Regex> = LazyLock::new(|| re(r"\s+OR\s+OR\s+"));
static TRAILING_OP: LazyLock<Regex> = LazyLock::new(|| re(r"\s+(AND|OR|NOT)\s*$"));
static LEADING_OP: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*(AND|OR)\s+"));
static WS: LazyLock<Regex> = LazyLock::new(|| re(r"\s+"));

/// Outcome of a sanitizer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// The sanitized text; equals the input when `malformed` is set.
    pub text: String,
    /// TRUE when the cleanup phase could not balance parentheses without
    /// rewriting operand positions. The input is returned unchanged and
    /// the caller annotates the request.
    pub malformed: bool,
}

impl Sanitized {
    fn clean(text: String) -> Self {
        Sanitized {
            text,
            malformed: false,
        }
    }
}

/// Split an expression into alternating non-literal/literal segments so
/// rewrites never touch quoted strings. Literal segments keep their quotes.
fn split_literals(s: &str) -> Vec<(bool, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_literal = false;
    for c in s.chars() {
        if c == '\'' {
            current.push(c);
            if in_literal {
                out.push((true, std::mem::take(&mut current)));
                in_literal = false;
            } else {
                let head = current.split_off(current.len() - 1);
                if !current.is_empty() {
                    out.push((false, std::mem::take(&mut current)));
                }
                current = head;
                in_literal = true;
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push((in_literal, current));
    }
    out
}

// Apply the locale-operator table outside string literals.
fn normalize_operators(s: &str) -> String {
    split_literals(s)
        .into_iter()
        .map(|(literal, segment)| {
            if literal {
                segment
            } else {
                let mut x = segment;
                for (pattern, replacement) in LOCALE_OPERATORS.iter() {
                    if pattern.is_match(&x) {
                        debug!("Normalizing locale operator to '{replacement}'");
                        x = pattern.replace_all(&x, *replacement).into_owned();
                    }
                }
                x
            }
        })
        .collect()
}

/// Remove non-boolean display expressions and normalize a subset string
/// into something every SQL backend will accept as a `WHERE` body.
///
/// Idempotent: `sanitize(sanitize(x).text)` equals `sanitize(x)`.
pub fn sanitize_subset_string(subset: &str) -> Sanitized {
    if subset.trim().is_empty() {
        return Sanitized::clean(String::new());
    }

    // P0 - operator normalization.
    let mut sanitized = normalize_operators(subset);

    // P1 - removal of non-boolean clauses.
    for pattern in COALESCE_CLAUSES.iter() {
        if let Some(m) = pattern.find(&sanitized) {
            info!("Removing display coalesce clause: '{}'", clip(m.as_str()));
            sanitized = pattern.replace_all(&sanitized, "").into_owned();
        }
    }
    for pattern in CASE_CLAUSES.iter() {
        if let Some(m) = pattern.find(&sanitized) {
            info!("Removing style CASE clause: '{}'", clip(m.as_str()));
            sanitized = pattern.replace_all(&sanitized, "").into_owned();
        }
    }
    if let Some(m) = LEADING_COALESCE.find(&sanitized) {
        info!("Removing leading coalesce clause: '{}'", clip(m.as_str()));
        sanitized = LEADING_COALESCE.replace(&sanitized, "").into_owned();
    }
    sanitized = remove_non_boolean_fields(&sanitized);

    // P2 - cleanup. Trim trailing excess parens only, never add any.
    let open = sanitized.matches('(').count();
    let close = sanitized.matches(')').count();
    if close > open {
        let excess = close - open;
        let tail_parens = sanitized
            .trim_end()
            .chars()
            .rev()
            .take_while(|c| *c == ')')
            .count();
        if tail_parens >= excess {
            let trimmed = sanitized.trim_end();
            sanitized = trimmed[..trimmed.len() - excess].to_owned();
            info!("Removed {excess} excess closing parentheses");
        } else {
            warn!("Cannot balance parentheses without rewriting; keeping input");
            return Sanitized {
                text: subset.to_owned(),
                malformed: true,
            };
        }
    } else if open > close {
        warn!("Cannot balance parentheses without rewriting; keeping input");
        return Sanitized {
            text: subset.to_owned(),
            malformed: true,
        };
    }

    sanitized = WS.replace_all(&sanitized, " ").trim().to_owned();
    sanitized = DUP_AND.replace_all(&sanitized, " AND ").into_owned();
    sanitized = DUP_OR.replace_all(&sanitized, " OR ").into_owned();
    sanitized = TRAILING_OP.replace_all(&sanitized, "").into_owned();
    sanitized = LEADING_OP.replace_all(&sanitized, "").into_owned();

    if sanitized != subset {
        debug!(
            "Subset sanitized from '{}' to '{}'",
            clip(subset),
            clip(&sanitized)
        );
    }

    Sanitized::clean(sanitized)
}

// Pattern matching "field" IN (...) or "table"."field" IN (...). Shared w/
// the optimizer.
static IN_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| re(r#""([^"]+)"(?:\s*\.\s*"([^"]+)")?\s+IN\s*\(([^()]+)\)"#));

/// Remove duplicate `IN` clauses on the same field, keeping the first.
///
/// Multi-step filtering composes expressions like
/// `(A AND fid IN (1,2,3)) AND (fid IN (1,2,3))`; the later copies cannot
/// further restrict the result and only slow the backend down.
pub fn dedupe_in_clauses(expression: &str) -> String {
    let matches: Vec<_> = IN_CLAUSE.find_iter(expression).collect();
    if matches.len() <= 1 {
        return expression.to_owned();
    }

    let mut seen: Vec<String> = Vec::new();
    let mut drop_spans: Vec<(usize, usize)> = Vec::new();
    for m in &matches {
        let caps = IN_CLAUSE.captures(m.as_str()).expect("match re-captures");
        let field_key = match caps.get(2) {
            Some(f) => format!("\"{}\".\"{}\"", &caps[1], f.as_str()),
            None => format!("\"{}\"", &caps[1]),
        };
        if seen.contains(&field_key) {
            drop_spans.push(expand_to_connective(expression, m.start(), m.end()));
            info!("Dropping duplicate IN clause for {field_key}");
        } else {
            seen.push(field_key);
        }
    }

    if drop_spans.is_empty() {
        return expression.to_owned();
    }

    let mut result = expression.to_owned();
    for (start, end) in drop_spans.into_iter().rev() {
        result.replace_range(start..end, "");
    }

    // Clean up whatever the removals left behind.
    let mut result = WS.replace_all(&result, " ").trim().to_owned();
    result = result.replace("( )", "").replace("()", "");
    result = DUP_AND.replace_all(&result, " AND ").into_owned();
    result = re(r"\(\s*AND\s+").replace_all(&result, "(").into_owned();
    result = re(r"\s+AND\s*\)").replace_all(&result, ")").into_owned();
    result = TRAILING_OP.replace_all(&result, "").into_owned();
    result.trim().to_owned()
}

// Widen a clause span to swallow its leading ` AND (` (and the matching
// close paren) so the removal keeps the expression well-formed.
fn expand_to_connective(s: &str, start: usize, end: usize) -> (usize, usize) {
    let before = &s[..start];
    let and_open = re(r"(?:\s+AND\s+\(\s*|\s+AND\s+)$");
    match and_open.find(before) {
        Some(m) => {
            let had_paren = m.as_str().contains('(');
            let mut close = end;
            if had_paren {
                // Step past the close paren matching the one we swallowed.
                let bytes = s.as_bytes();
                let mut i = end;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c == ')' {
                        close = i + 1;
                        break;
                    }
                    if !c.is_whitespace() {
                        break;
                    }
                    i += 1;
                }
            }
            (m.start(), close)
        }
        None => (start, end),
    }
}

const SPATIAL_PREDICATE_NAMES: [&str; 11] = [
    "ST_INTERSECTS",
    "ST_CONTAINS",
    "ST_WITHIN",
    "ST_TOUCHES",
    "ST_OVERLAPS",
    "ST_CROSSES",
    "ST_DISJOINT",
    "ST_EQUALS",
    "ST_DWITHIN",
    "ST_COVERS",
    "ST_COVEREDBY",
];

/// Extract only the spatial clauses of a source subset for reuse as the
/// inner filter of an `EXISTS` subquery, stripping style/display clauses
/// first. Returns `None` when no spatial predicate survives or the
/// remainder is unbalanced.
pub fn extract_spatial_clauses(filter_expr: &str) -> Option<String> {
    if filter_expr.trim().is_empty() {
        return None;
    }
    let upper = filter_expr.to_uppercase();
    if !SPATIAL_PREDICATE_NAMES.iter().any(|p| upper.contains(p)) {
        debug!("extract_spatial_clauses: no spatial predicates in filter");
        return None;
    }

    let mut cleaned = filter_expr.to_owned();
    for pattern in CASE_CLAUSES.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    for pattern in COALESCE_CLAUSES.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }

    let mut cleaned = WS.replace_all(&cleaned, " ").trim().to_owned();
    cleaned = TRAILING_OP.replace_all(&cleaned, "").into_owned();
    cleaned = LEADING_OP.replace_all(&cleaned, "").into_owned();

    // Peel redundant outer parentheses.
    loop {
        let t = cleaned.trim();
        if !(t.starts_with('(') && t.ends_with(')')) {
            break;
        }
        let mut depth = 0usize;
        let mut outer = true;
        for (i, c) in t.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 && i < t.len() - 1 {
                        outer = false;
                        break;
                    }
                }
                _ => {}
            }
        }
        if outer && depth == 0 {
            cleaned = t[1..t.len() - 1].trim().to_owned();
        } else {
            break;
        }
    }

    let upper = cleaned.to_uppercase();
    if !SPATIAL_PREDICATE_NAMES.iter().any(|p| upper.contains(p)) {
        debug!("extract_spatial_clauses: spatial predicates removed during cleaning");
        return None;
    }
    if cleaned.matches('(').count() != cleaned.matches(')').count() {
        warn!("extract_spatial_clauses: unbalanced parentheses after extraction");
        return None;
    }

    Some(cleaned)
}

fn clip(s: &str) -> &str {
    let end = s
        .char_indices()
        .nth(80)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}
