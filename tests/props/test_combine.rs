// SPDX-License-Identifier: Apache-2.0

//! Combination invariants: `combine` is associative modulo parentheses.
//!

use filtermate::combine_with_subset;
use tracing_test::traced_test;

// Collapse to the tokens that decide logical meaning: operands and
// connectives, parens and whitespace dropped.
fn logical_tokens(s: &str) -> Vec<String> {
    s.replace(['(', ')'], " ")
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

#[test]
#[traced_test]
fn test_and_combination_associative_modulo_parens() {
    let a = r#""a" = 1"#;
    let b = r#""b" = 2"#;
    let c = r#""c" = 3"#;

    let left = combine_with_subset(c, &combine_with_subset(b, a, "AND"), "AND");
    let right = combine_with_subset(&combine_with_subset(c, b, "AND"), a, "AND");

    assert_eq!(logical_tokens(&left), logical_tokens(&right));
    // Both sides stay well-formed.
    for x in [&left, &right] {
        assert_eq!(x.matches('(').count(), x.matches(')').count());
    }
}

#[test]
#[traced_test]
fn test_combination_preserves_operands() {
    let combined = combine_with_subset(r#""new" = 1"#, r#""old" = 0"#, "AND NOT");
    assert!(combined.contains(r#""old" = 0"#));
    assert!(combined.contains(r#""new" = 1"#));
    assert!(combined.contains("AND NOT"));
}
