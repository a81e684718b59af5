// SPDX-License-Identifier: Apache-2.0

//! Materialized-view naming invariants.
//!
//! The name function is deterministic per `(session, content)`, injective
//! over distinct content, and every produced name obeys the wire
//! convention `fm_temp_(source|buffered|filter_chain|mv)_<8hex>_<8hex>`.
//!

use filtermate::{MvKind, content_hash, mv_name};
use regex::Regex;
use tracing_test::traced_test;

#[test]
#[traced_test]
fn test_same_content_same_name() {
    let h1 = content_hash(&[5, 3, 1], None, false);
    let h2 = content_hash(&[1, 3, 5], None, false);
    assert_eq!(h1, h2);
    assert_eq!(
        mv_name(MvKind::SourceSelection, "sess", &h1),
        mv_name(MvKind::SourceSelection, "sess", &h2),
    );
}

#[test]
#[traced_test]
fn test_different_content_different_name() {
    let h1 = content_hash(&[1, 2, 3], None, false);
    let h2 = content_hash(&[1, 2, 3, 4], None, false);
    assert_ne!(h1, h2);
    assert_ne!(
        mv_name(MvKind::Plain, "sess", &h1),
        mv_name(MvKind::Plain, "sess", &h2),
    );
}

#[test]
#[traced_test]
fn test_wire_convention() {
    let convention =
        Regex::new(r"^fm_temp_(source|buffered|filter_chain|mv)_[0-9a-f]{8}_[0-9a-f]{8}$")
            .unwrap();
    for kind in [
        MvKind::SourceSelection,
        MvKind::BufferedSource,
        MvKind::FilterChain,
        MvKind::Plain,
    ] {
        for session in ["a", "session-12", "7c9e6679"] {
            let name = mv_name(kind, session, &content_hash(&[1], None, true));
            assert!(convention.is_match(&name), "{name} violates the convention");
        }
    }
}
