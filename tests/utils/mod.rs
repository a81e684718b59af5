// SPDX-License-Identifier: Apache-2.0

//! Test harnesses and artifacts: scriptable host layers, a registry over
//! them, a UI executor pinned to its own thread, and a SQL runner that
//! records statements instead of executing them.
//!

#![allow(dead_code)]

use async_trait::async_trait;
use filtermate::prelude::*;
use geos::Geometry;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread::{self, ThreadId},
};

/// A scriptable host layer recording every mutation and the thread each
/// mutation arrived on.
pub(crate) struct MockLayer {
    id: String,
    provider: String,
    valid: AtomicBool,
    crs_auth_id: String,
    geographic: bool,
    db_path: Option<String>,
    subset: Mutex<String>,
    features: Mutex<Vec<(i64, String)>>,
    selected: Mutex<Vec<i64>>,
    set_subset_calls: AtomicUsize,
    mutation_threads: Mutex<Vec<ThreadId>>,
}

impl MockLayer {
    pub(crate) fn new(id: &str, provider: &str) -> Self {
        MockLayer {
            id: id.to_owned(),
            provider: provider.to_owned(),
            valid: AtomicBool::new(true),
            crs_auth_id: "EPSG:2154".to_owned(),
            geographic: false,
            db_path: None,
            subset: Mutex::new(String::new()),
            features: Mutex::new(Vec::new()),
            selected: Mutex::new(Vec::new()),
            set_subset_calls: AtomicUsize::new(0),
            mutation_threads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_crs(mut self, auth_id: &str, geographic: bool) -> Self {
        self.crs_auth_id = auth_id.to_owned();
        self.geographic = geographic;
        self
    }

    pub(crate) fn with_db_path(mut self, path: &str) -> Self {
        self.db_path = Some(path.to_owned());
        self
    }

    pub(crate) fn with_features(self, features: &[(i64, &str)]) -> Self {
        *self.features.lock().unwrap() = features
            .iter()
            .map(|(fid, wkt)| (*fid, (*wkt).to_owned()))
            .collect();
        self
    }

    pub(crate) fn with_selection(self, fids: &[i64]) -> Self {
        *self.selected.lock().unwrap() = fids.to_vec();
        self
    }

    pub(crate) fn set_subset_calls(&self) -> usize {
        self.set_subset_calls.load(Ordering::SeqCst)
    }

    /// Threads that performed any mutation on this layer.
    pub(crate) fn mutation_threads(&self) -> Vec<ThreadId> {
        self.mutation_threads.lock().unwrap().clone()
    }

    fn note_mutation(&self) {
        self.mutation_threads
            .lock()
            .unwrap()
            .push(thread::current().id());
    }
}

impl HostLayer for MockLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider_type(&self) -> String {
        self.provider.clone()
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn crs_auth_id(&self) -> String {
        self.crs_auth_id.clone()
    }

    fn crs_is_geographic(&self) -> bool {
        self.geographic
    }

    fn source_schema(&self) -> Option<String> {
        match self.provider.as_str() {
            "postgres" | "postgresql" => Some("public".to_owned()),
            _ => None,
        }
    }

    fn source_table(&self) -> String {
        self.id.clone()
    }

    fn geometry_column(&self) -> String {
        "geom".to_owned()
    }

    fn primary_key(&self) -> String {
        "fid".to_owned()
    }

    fn primary_key_is_numeric(&self) -> bool {
        true
    }

    fn fields(&self) -> Vec<String> {
        vec!["population".to_owned(), "name".to_owned(), "type".to_owned()]
    }

    fn feature_count(&self) -> Option<u64> {
        Some(self.features.lock().unwrap().len() as u64)
    }

    fn database_path(&self) -> Option<String> {
        self.db_path.clone()
    }

    fn extent(&self) -> Option<[f64; 4]> {
        Some([0.0, 0.0, 100.0, 100.0])
    }

    fn subset_string(&self) -> String {
        self.subset.lock().unwrap().clone()
    }

    fn set_subset_string(&self, subset: &str) -> bool {
        self.note_mutation();
        self.set_subset_calls.fetch_add(1, Ordering::SeqCst);
        *self.subset.lock().unwrap() = subset.to_owned();
        true
    }

    fn selected_feature_ids(&self) -> Vec<i64> {
        self.selected.lock().unwrap().clone()
    }

    fn features(&self, ids: Option<&[i64]>) -> Result<Vec<Feature>, FilterError> {
        let all = self.features.lock().unwrap();
        let mut out = Vec::new();
        for (fid, wkt) in all.iter() {
            if ids.is_none_or(|wanted| wanted.contains(fid)) {
                out.push(Feature::new(*fid, Geometry::new_from_wkt(wkt)?));
            }
        }
        Ok(out)
    }

    fn reload_data(&self) {
        self.note_mutation();
    }

    fn reload(&self) {
        self.note_mutation();
    }

    fn update_extents(&self) {
        self.note_mutation();
    }

    fn trigger_repaint(&self) {
        self.note_mutation();
    }

    fn block_signals(&self, _blocked: bool) {}
}

/// Registry over a fixed set of mock layers.
#[derive(Default)]
pub(crate) struct MockRegistry {
    layers: HashMap<String, Arc<MockLayer>>,
    project_crs: String,
    project_geographic: bool,
}

impl MockRegistry {
    pub(crate) fn new() -> Self {
        MockRegistry {
            layers: HashMap::new(),
            project_crs: "EPSG:2154".to_owned(),
            project_geographic: false,
        }
    }

    pub(crate) fn with(mut self, layer: Arc<MockLayer>) -> Self {
        self.layers.insert(layer.id().to_owned(), layer);
        self
    }
}

impl HostRegistry for MockRegistry {
    fn layer(&self, id: &str) -> Option<Arc<dyn HostLayer>> {
        self.layers.get(id).map(|x| x.clone() as Arc<dyn HostLayer>)
    }

    fn project_crs_auth_id(&self) -> String {
        self.project_crs.clone()
    }

    fn project_crs_is_geographic(&self) -> bool {
        self.project_geographic
    }
}

/// A UI executor backed by one dedicated thread, the way a host event loop
/// would be. Exposes its thread id so tests can assert mutation affinity.
pub(crate) struct UiThreadExecutor {
    sender: mpsc::Sender<Box<dyn FnOnce() + Send>>,
    thread_id: ThreadId,
}

impl UiThreadExecutor {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
        let (id_tx, id_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = id_tx.send(thread::current().id());
            while let Ok(runnable) = receiver.recv() {
                runnable();
            }
        });
        let thread_id = id_rx.recv().expect("executor thread id");
        UiThreadExecutor { sender, thread_id }
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

impl UiExecutor for UiThreadExecutor {
    fn dispatch(&self, runnable: Box<dyn FnOnce() + Send>) {
        let _ = self.sender.send(runnable);
    }
}

/// Reporter that counts target-progress ticks and can cancel a token once
/// enough landed.
pub(crate) struct CancelingReporter {
    token: CancelToken,
    cancel_at_tick: usize,
    ticks: AtomicUsize,
}

impl CancelingReporter {
    pub(crate) fn new(token: CancelToken, cancel_at_tick: usize) -> Self {
        CancelingReporter {
            token,
            cancel_at_tick,
            ticks: AtomicUsize::new(0),
        }
    }
}

impl TaskReporter for CancelingReporter {
    fn description(&self, _text: &str) {}

    fn progress(&self, pct: u8) {
        // Per-target ticks live in the 30..100 band.
        if (30..100).contains(&pct) {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if tick >= self.cancel_at_tick {
                self.token.cancel();
            }
        }
    }

    fn push_message(&self, _category: &str, _text: &str, _severity: Severity) {}
}

/// [`SqlRunner`] recording every statement instead of executing it.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    pub(crate) executed: Mutex<Vec<String>>,
    pub(crate) fetched: Mutex<Vec<String>>,
    pub(crate) names: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub(crate) fn set_names(&self, names: &[String]) {
        *self.names.lock().unwrap() = names.to_vec();
    }
}

#[async_trait]
impl SqlRunner for RecordingRunner {
    async fn execute(&self, sql: &str) -> Result<u64, FilterError> {
        self.executed.lock().unwrap().push(sql.to_owned());
        Ok(0)
    }

    async fn fetch_strings(&self, sql: &str) -> Result<Vec<String>, FilterError> {
        self.fetched.lock().unwrap().push(sql.to_owned());
        Ok(self.names.lock().unwrap().clone())
    }
}

/// The usual engine wiring: mock registry, inline executor, log reporter.
pub(crate) fn engine(registry: MockRegistry) -> FilterEngine {
    FilterEngine::new(
        Arc::new(registry),
        Arc::new(InlineExecutor),
        Arc::new(LogReporter),
    )
}

/// A filter request skeleton; tests adjust the fields they exercise.
pub(crate) fn request(source: &str, targets: &[(&str, Predicate)]) -> FilterRequest {
    FilterRequest {
        action: FilterAction::Filter,
        source_layer_id: source.to_owned(),
        selection: Selection::AllVisible,
        targets: targets
            .iter()
            .map(|(id, p)| TargetSpec {
                layer_id: (*id).to_owned(),
                predicates: vec![*p],
                combine: CombineOp::Replace,
            })
            .collect(),
        buffer: None,
        use_centroids: CentroidFlags::default(),
        forced_backends: HashMap::new(),
        session_id: "test-session".to_owned(),
        project_uuid: "11111111-2222-3333-4444-555555555555".to_owned(),
    }
}
