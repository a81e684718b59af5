// SPDX-License-Identifier: Apache-2.0

//! Sanitizer invariants.
//!
//! Given:
//!     * A corpus of subset strings as the host produces them, including
//!       locale connectives, display coalesce clauses, rule-based CASE
//!       fragments, and unbalanced parentheses.
//! Then:
//!     * sanitize(sanitize(x)) == sanitize(x) for every corpus member;
//!     * boolean-valued clauses survive verbatim while non-boolean display
//!       clauses disappear;
//!     * inputs whose parentheses cannot be balanced come back unchanged
//!       and flagged.
//!

use filtermate::sanitize_subset_string;
use tracing_test::traced_test;

const CORPUS: [&str; 10] = [
    r#""population" > 10000"#,
    r#""a" = 1 ET "b" = 2 OU "c" = 3"#,
    r#""a" = 1 UND NICHT "b" = 2"#,
    r#""pop" > 10 AND ( COALESCE( "LABEL", '<NULL>' ) )"#,
    r#""pop" > 10 AND ( SELECT CASE WHEN 'AV' = left("t"."f", 2) THEN true ELSE false END )"#,
    r#""pop" > 10 AND ( "label" )"#,
    r#"("pop" > 10)))"#,
    r#"  "a"  =  1   AND   AND  "b" = 2 "#,
    r#""name" = 'ET OU NON'"#,
    r#"EXISTS (SELECT 1 FROM "public"."towns" AS __source WHERE ST_Intersects("roads"."geom", __source."geom"))"#,
];

#[test]
#[traced_test]
fn test_idempotence_over_corpus() {
    for input in CORPUS {
        let once = sanitize_subset_string(input);
        let twice = sanitize_subset_string(&once.text);
        assert_eq!(once.text, twice.text, "sanitize not idempotent for {input:?}");
        assert_eq!(once.malformed, twice.malformed);
    }
}

#[test]
#[traced_test]
fn test_boolean_clauses_survive() {
    for input in [
        r#""population" > 10000"#,
        r#""a" = 1 AND "b" = 2"#,
        r#""type" IN ('city', 'town') OR "pop" >= 5"#,
    ] {
        let got = sanitize_subset_string(input);
        assert_eq!(got.text, input, "boolean clause was altered");
        assert!(!got.malformed);
    }
}

#[test]
#[traced_test]
fn test_non_boolean_clauses_removed() {
    let got = sanitize_subset_string(
        r#""pop" > 10 AND ( COALESCE( "LABEL", '<NULL>' ) ) AND "a" = 1"#,
    );
    assert!(!got.text.to_uppercase().contains("COALESCE"));
    assert!(got.text.contains(r#""pop" > 10"#));
    assert!(got.text.contains(r#""a" = 1"#));
}

#[test]
#[traced_test]
fn test_unbalanced_input_flagged_and_unchanged() {
    let input = r#"((("pop" > 10)"#;
    let got = sanitize_subset_string(input);
    assert!(got.malformed);
    assert_eq!(got.text, input);
}
