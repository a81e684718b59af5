// SPDX-License-Identifier: Apache-2.0

//! Session isolation and orphan collection.
//!
//! Two sessions never observe (or drop) each other's views, and a
//! canceled session followed by a GC pass leaves zero session-owned
//! views behind.
//!

use crate::utils::RecordingRunner;
use filtermate::{Backend, MvKind, MvManager, content_hash, mv_name, session_hash};
use std::{sync::Arc, time::Duration};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_drop_session_ignores_other_sessions() {
    let mine = mv_name(MvKind::Plain, "session-a", &content_hash(&[1, 2], None, false));
    let theirs = mv_name(MvKind::Plain, "session-b", &content_hash(&[1, 2], None, false));

    let runner = Arc::new(RecordingRunner::default());
    runner.set_names(&[mine.clone(), theirs.clone()]);

    let manager = MvManager::new(runner.clone(), Backend::PostgreSql, "session-a");
    let dropped = manager.drop_session().await.unwrap();
    assert_eq!(dropped, 1);

    let drops: Vec<String> = runner
        .executed()
        .into_iter()
        .filter(|x| x.starts_with("DROP"))
        .collect();
    assert_eq!(drops.len(), 1);
    assert!(drops[0].contains(&mine));
    assert!(!drops.iter().any(|x| x.contains(&theirs)));
}

#[tokio::test]
#[traced_test]
async fn test_session_hashes_do_not_collide() {
    assert_ne!(session_hash("session-a"), session_hash("session-b"));
    let a = mv_name(MvKind::FilterChain, "session-a", "00112233");
    let b = mv_name(MvKind::FilterChain, "session-b", "00112233");
    assert_ne!(a, b);
}

#[tokio::test]
#[traced_test]
async fn test_gc_reclaims_dead_sessions_only() {
    let dead = mv_name(MvKind::SourceSelection, "dead", &content_hash(&[7], None, false));
    let live = mv_name(MvKind::SourceSelection, "live", &content_hash(&[7], None, false));

    let runner = Arc::new(RecordingRunner::default());
    runner.set_names(&[dead.clone(), live.clone()]);

    let manager = MvManager::new(runner.clone(), Backend::PostgreSql, "gc");
    let dropped = manager
        .drop_orphans(&["live"], Duration::from_secs(24 * 3600))
        .await
        .unwrap();
    assert_eq!(dropped, 1);

    let drops: Vec<String> = runner
        .executed()
        .into_iter()
        .filter(|x| x.starts_with("DROP"))
        .collect();
    assert!(drops[0].contains(&dead));
    assert!(!drops.iter().any(|x| x.contains(&live)));
}
