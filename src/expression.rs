// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Expression builder: identifier qualification, dialect translation,
//! feature-id lists, and combination with a layer's prior subset.
//!

use crate::{
    Backend, LayerDescriptor,
    sanitize::{Sanitized, sanitize_subset_string},
};
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;
use tracing::debug;

/// A primary-key value; quoting in generated SQL depends on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PkValue {
    /// Numeric value, rendered unquoted.
    Int(i64),
    /// Textual value, single-quoted with doubled internal quotes.
    Text(String),
}

impl PkValue {
    fn to_sql(&self) -> String {
        match self {
            PkValue::Int(x) => x.to_string(),
            PkValue::Text(x) => format!("'{}'", x.replace('\'', "''")),
        }
    }
}

impl From<i64> for PkValue {
    fn from(value: i64) -> Self {
        PkValue::Int(value)
    }
}

// Host-native geometry functions translated per dialect. PostGIS wants the
// ST_ prefix; SpatiaLite keeps the bare form; OGR passes either through.
static HOST_GEOM_FUNCTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let word = |name: &str| {
        RegexBuilder::new(&format!(r"\b{name}\s*\("))
            .case_insensitive(true)
            .build()
            .expect("invalid translation pattern")
    };
    vec![
        (word("intersects"), "ST_Intersects("),
        (word("contains"), "ST_Contains("),
        (word("within"), "ST_Within("),
        (word("touches"), "ST_Touches("),
        (word("overlaps"), "ST_Overlaps("),
        (word("crosses"), "ST_Crosses("),
        (word("disjoint"), "ST_Disjoint("),
    ]
});

/// Translate host-native (unprefixed) geometry functions into the target
/// dialect's spelling. SpatiaLite and OGR keep the unprefixed forms.
pub fn translate_geometry_functions(expression: &str, backend: Backend) -> String {
    match backend.effective() {
        Backend::PostgreSql => {
            // `\b` cannot match after the underscore of an `ST_` prefix, so
            // already-translated calls are naturally left alone.
            let mut x = expression.to_owned();
            for (pattern, replacement) in HOST_GEOM_FUNCTIONS.iter() {
                x = pattern.replace_all(&x, *replacement).into_owned();
            }
            x
        }
        _ => expression.to_owned(),
    }
}

/// Rewrite identifier occurrences to the authoritative column case.
/// PostgreSQL folds unquoted identifiers to lowercase; an expression typed
/// against the host's display case would otherwise fail with
/// "column ... does not exist".
pub fn normalize_column_case(expression: &str, authoritative: &[String]) -> String {
    let mut result = expression.to_owned();
    for actual in authoritative {
        let quoted = RegexBuilder::new(&format!(r#""{}""#, regex::escape(actual)))
            .case_insensitive(true)
            .build()
            .expect("invalid case pattern");
        result = quoted
            .replace_all(&result, format!("\"{actual}\"").as_str())
            .into_owned();
    }
    result
}

/// Qualify bare column names for the target dialect.
///
/// PostgreSQL gets `"table"."field"`; SpatiaLite and OGR get `"field"`
/// only (OGR drivers reject table-qualified names in subset strings). The
/// special column `fid` stays unquoted for OGR.
pub fn qualify_field_names(
    expression: &str,
    descriptor: &LayerDescriptor,
) -> String {
    let mut result = expression.to_owned();
    if descriptor.backend.effective() == Backend::PostgreSql {
        result = normalize_column_case(&result, &descriptor.field_names);
    }

    let mut names: Vec<&str> = descriptor.field_names.iter().map(|x| x.as_str()).collect();
    if !descriptor.primary_key.is_empty() && !names.contains(&descriptor.primary_key.as_str()) {
        names.push(descriptor.primary_key.as_str());
    }

    match descriptor.backend.effective() {
        Backend::PostgreSql => {
            // Skip when the expression already carries the table name.
            if result.contains(&descriptor.table) {
                return result;
            }
            for name in names {
                let quoted = format!("\"{name}\"");
                let qualified = format!("\"{}\".\"{name}\"", descriptor.table);
                if result.contains(&quoted) {
                    result = result.replace(&quoted, &qualified);
                } else {
                    let bare = format!(" {name} ");
                    if result.contains(&bare) {
                        result = result.replace(&bare, &format!(" {qualified} "));
                    }
                }
            }
            result
        }
        _ => {
            for name in names {
                if name == "fid" && descriptor.backend.effective() == Backend::Ogr {
                    continue;
                }
                let quoted = format!("\"{name}\"");
                if result.contains(&quoted) {
                    continue;
                }
                let bare = format!(" {name} ");
                if result.contains(&bare) {
                    result = result.replace(&bare, &format!(" {quoted} "));
                }
            }
            result
        }
    }
}

/// Build a backend-appropriate `IN` expression from primary-key values.
pub fn build_fid_expression(values: &[PkValue], descriptor: &LayerDescriptor) -> String {
    if values.is_empty() {
        return String::new();
    }
    let list = values
        .iter()
        .map(PkValue::to_sql)
        .collect::<Vec<_>>()
        .join(", ");

    let pk = &descriptor.primary_key;
    match descriptor.backend.effective() {
        // OGR drivers want bare `fid`; anything else double-quoted.
        Backend::Ogr if pk == "fid" => format!("fid IN ({list})"),
        Backend::Ogr | Backend::SpatiaLite | Backend::Memory => format!("\"{pk}\" IN ({list})"),
        Backend::PostgreSql => {
            format!("\"{}\".\"{pk}\" IN ({list})", descriptor.table)
        }
    }
}

static WHERE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"\bWHERE\b")
        .case_insensitive(true)
        .build()
        .expect("invalid WHERE pattern")
});

/// Combine a new expression with a layer's existing subset.
///
/// The old subset is sanitized first. When it embeds a `WHERE` (driver-SQL
/// subsets sometimes carry a full `SELECT`), the combination keeps the
/// prefix and extends the `WHERE` tail; otherwise both operands are
/// parenthesized.
pub fn combine_with_subset(new_expression: &str, old_subset: &str, operator: &str) -> String {
    if old_subset.trim().is_empty() {
        return new_expression.to_owned();
    }

    let Sanitized { text: old, .. } = sanitize_subset_string(old_subset);
    if old.is_empty() {
        return new_expression.to_owned();
    }

    match WHERE_TOKEN.find(&old) {
        Some(m) => {
            let prefix = old[..m.start()].trim_end();
            let mut tail = old[m.end()..].trim().to_owned();
            // A driver-generated tail often over-closes; drop one trailing
            // paren so the appended clause stays inside the WHERE.
            if tail.ends_with("))") {
                tail.pop();
            }
            let combined = format!("{prefix} WHERE {tail} {operator} {new_expression}");
            debug!("Combined (WHERE-form): {combined}");
            combined
        }
        None => format!("( {old} ) {operator} ( {new_expression} )"),
    }
}
