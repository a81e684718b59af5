// SPDX-License-Identifier: Apache-2.0

//! In-process mock host used by unit tests. The scenario tests under
//! `tests/` carry their own richer copy.
//!

#![allow(dead_code)]

use crate::{
    FilterError,
    backend::SqlRunner,
    host::{Feature, HostLayer, HostRegistry},
};
use async_trait::async_trait;
use geos::Geometry;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// A scriptable host layer recording every mutation.
pub(crate) struct MockLayer {
    id: String,
    provider: String,
    valid: AtomicBool,
    crs_auth_id: String,
    geographic: bool,
    subset: Mutex<String>,
    features: Mutex<Vec<(i64, String)>>,
    selected: Mutex<Vec<i64>>,
    set_subset_calls: AtomicUsize,
    reload_calls: AtomicUsize,
    reload_data_calls: AtomicUsize,
    repaint_calls: AtomicUsize,
    pub(crate) db_path: Option<String>,
}

impl MockLayer {
    pub(crate) fn new(id: &str, provider: &str) -> Self {
        MockLayer {
            id: id.to_owned(),
            provider: provider.to_owned(),
            valid: AtomicBool::new(true),
            crs_auth_id: "EPSG:2154".to_owned(),
            geographic: false,
            subset: Mutex::new(String::new()),
            features: Mutex::new(Vec::new()),
            selected: Mutex::new(Vec::new()),
            set_subset_calls: AtomicUsize::new(0),
            reload_calls: AtomicUsize::new(0),
            reload_data_calls: AtomicUsize::new(0),
            repaint_calls: AtomicUsize::new(0),
            db_path: None,
        }
    }

    pub(crate) fn with_crs(mut self, auth_id: &str, geographic: bool) -> Self {
        self.crs_auth_id = auth_id.to_owned();
        self.geographic = geographic;
        self
    }

    pub(crate) fn with_features(self, features: &[(i64, &str)]) -> Self {
        *self.features.lock().expect("features lock") = features
            .iter()
            .map(|(fid, wkt)| (*fid, (*wkt).to_owned()))
            .collect();
        self
    }

    pub(crate) fn with_selection(self, fids: &[i64]) -> Self {
        *self.selected.lock().expect("selection lock") = fids.to_vec();
        self
    }

    pub(crate) fn invalid(self) -> Self {
        self.valid.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_subset_calls(&self) -> usize {
        self.set_subset_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reload_data_calls(&self) -> usize {
        self.reload_data_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn repaint_calls(&self) -> usize {
        self.repaint_calls.load(Ordering::SeqCst)
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
        Some(self.features.lock().expect("features lock").len() as u64)
    }

    fn database_path(&self) -> Option<String> {
        self.db_path.clone()
    }

    fn extent(&self) -> Option<[f64; 4]> {
        Some([0.0, 0.0, 100.0, 100.0])
    }

    fn subset_string(&self) -> String {
        self.subset.lock().expect("subset lock").clone()
    }

    fn set_subset_string(&self, subset: &str) -> bool {
        self.set_subset_calls.fetch_add(1, Ordering::SeqCst);
        *self.subset.lock().expect("subset lock") = subset.to_owned();
        true
    }

    fn selected_feature_ids(&self) -> Vec<i64> {
        self.selected.lock().expect("selection lock").clone()
    }

    fn features(&self, ids: Option<&[i64]>) -> Result<Vec<Feature>, FilterError> {
        let all = self.features.lock().expect("features lock");
        let mut out = Vec::new();
        for (fid, wkt) in all.iter() {
            if ids.is_none_or(|wanted| wanted.contains(fid)) {
                out.push(Feature::new(*fid, Geometry::new_from_wkt(wkt)?));
            }
        }
        Ok(out)
    }

    fn reload_data(&self) {
        self.reload_data_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn reload(&self) {
        self.reload_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn update_extents(&self) {}

    fn trigger_repaint(&self) {
        self.repaint_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn block_signals(&self, _blocked: bool) {}
}

/// Registry over a fixed set of mock layers.
#[derive(Default)]
pub(crate) struct MockRegistry {
    layers: HashMap<String, Arc<MockLayer>>,
}

impl MockRegistry {
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
        "EPSG:2154".to_owned()
    }

    fn project_crs_is_geographic(&self) -> bool {
        false
    }
}

/// [`SqlRunner`] that records statements instead of executing them.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    pub(crate) executed: Mutex<Vec<String>>,
    pub(crate) names: Mutex<Vec<String>>,
}

#[async_trait]
impl SqlRunner for RecordingRunner {
    async fn execute(&self, sql: &str) -> Result<u64, FilterError> {
        self.executed.lock().expect("runner lock").push(sql.to_owned());
        Ok(0)
    }

    async fn fetch_strings(&self, _sql: &str) -> Result<Vec<String>, FilterError> {
        Ok(self.names.lock().expect("runner lock").clone())
    }
}
