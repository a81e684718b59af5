// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Filter orchestration.
//!
//! One request runs as: filter the source layer, prepare its geometry,
//! then build and apply a backend-specific expression per target layer,
//! recording every applied subset in the history log. Source filtering
//! happens-before distant filtering; per-target order is not observable.
//! Failures isolate per target and the request reports partial success
//! rather than unwinding work already applied.
//!

use crate::{
    Backend, FilterAction, FilterError, FilterRequest, LayerDescriptor, Selection,
    analyzer::analyze,
    backend::{
        PgExpressionBuilder, SpatialiteExpressionBuilder, SqlRunner, build_ogr_expression,
        select_by_location, verify_forced_backend,
    },
    cache::{EngineCaches, expression_fingerprint, geometry_fingerprint},
    config::config,
    expression::{
        PkValue, build_fid_expression, combine_with_subset, qualify_field_names,
        translate_geometry_functions,
    },
    geometry::{GeometryPreparer, PreparedSourceGeometry, PrepareSpec},
    history::HistoryLog,
    host::{HostLayer, HostRegistry, Severity, TaskReporter, UiExecutor},
    mv::{MaterializedView, MvManager},
    optimizer::CombinedQueryOptimizer,
    progress::{CancelToken, ExecutionPolicy, execution_policy},
    queue::{ApplyOutcome, PendingSubsetRequest, SubsetQueue},
    sanitize::{extract_spatial_clauses, sanitize_subset_string},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How one request ended.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Layers whose subset was applied.
    pub applied_layers: Vec<String>,
    /// Layers that failed, with the reason.
    pub failed_layers: Vec<(String, String)>,
    /// TRUE when some targets failed while others succeeded.
    pub partial: bool,
    /// TRUE when the request was canceled mid-flight.
    pub canceled: bool,
    /// User-facing summary.
    pub message: String,
}

impl FilterOutcome {
    fn success(applied: Vec<String>, message: String) -> Self {
        FilterOutcome {
            applied_layers: applied,
            failed_layers: Vec::new(),
            partial: false,
            canceled: false,
            message,
        }
    }
}

/// The engine: owns the seams to the host and the databases, and runs
/// requests end to end.
pub struct FilterEngine {
    registry: Arc<dyn HostRegistry>,
    reporter: Arc<dyn TaskReporter>,
    queue: Arc<SubsetQueue>,
    caches: Arc<EngineCaches>,
    history: Option<Arc<HistoryLog>>,
    pg_runner: Option<Arc<dyn SqlRunner>>,
    sqlite_runner: Option<Arc<dyn SqlRunner>>,
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("has_pg", &self.pg_runner.is_some())
            .field("has_sqlite", &self.sqlite_runner.is_some())
            .finish()
    }
}

impl FilterEngine {
    /// Constructor. The UI executor is the only authority for host
    /// mutations; everything flows through the queue it backs.
    pub fn new(
        registry: Arc<dyn HostRegistry>,
        executor: Arc<dyn UiExecutor>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        FilterEngine {
            registry,
            reporter,
            queue: Arc::new(SubsetQueue::new(executor)),
            caches: Arc::new(EngineCaches::new()),
            history: None,
            pg_runner: None,
            sqlite_runner: None,
        }
    }

    /// Attach a history log.
    pub fn with_history(mut self, history: Arc<HistoryLog>) -> Self {
        self.history = Some(history);
        self
    }

    /// Attach a PostgreSQL runner (enables MV optimizations).
    pub fn with_pg_runner(mut self, runner: Arc<dyn SqlRunner>) -> Self {
        self.pg_runner = Some(runner);
        self
    }

    /// Attach a SQLite runner.
    pub fn with_sqlite_runner(mut self, runner: Arc<dyn SqlRunner>) -> Self {
        self.sqlite_runner = Some(runner);
        self
    }

    /// The host switched projects: cached expressions no longer apply.
    pub fn on_project_changed(&self) {
        self.caches.clear_expressions();
        self.caches.invalidate_geometry();
    }

    /// Undo the last recorded subset for one layer: pop the tail entry and
    /// re-apply whatever preceded it (or clear when nothing did).
    pub async fn undo_last(
        &self,
        project_uuid: &str,
        layer_id: &str,
    ) -> Result<FilterOutcome, FilterError> {
        let history = self.history.as_ref().ok_or_else(|| {
            FilterError::Input("No history log configured; nothing to undo".into())
        })?;
        let layer = self.resolve_layer(layer_id)?;
        let descriptor = LayerDescriptor::resolve(layer.as_ref(), None)?;

        let popped = history.pop_last(project_uuid, layer_id).await?;
        if popped.is_none() {
            return Ok(FilterOutcome::success(
                Vec::new(),
                format!("Nothing recorded for '{layer_id}'"),
            ));
        }
        let prior = history
            .last(project_uuid, layer_id)
            .await?
            .map(|e| e.subset_string)
            .unwrap_or_default();

        self.queue.enqueue(PendingSubsetRequest {
            layer,
            expression: prior,
            backend: descriptor.backend,
        });
        let outcomes = self.queue.drain().await;
        apply_result(&outcomes, layer_id).map_err(|reason| FilterError::DialectExecution {
            layer: layer_id.to_owned(),
            reason,
        })?;
        Ok(FilterOutcome::success(
            vec![layer_id.to_owned()],
            format!("Restored the prior subset of '{layer_id}'"),
        ))
    }

    /// Run one request to completion.
    pub async fn run(
        &self,
        request: FilterRequest,
        cancel: CancelToken,
    ) -> Result<FilterOutcome, FilterError> {
        request.validate()?;
        match request.action {
            FilterAction::Filter => self.run_filter(&request, &cancel).await,
            FilterAction::Unfilter => self.run_unfilter(&request).await,
            FilterAction::Reset => self.run_reset(&request).await,
            FilterAction::Export => self.run_export(&request).await,
        }
    }

    // ---- filter ----

    async fn run_filter(
        &self,
        request: &FilterRequest,
        cancel: &CancelToken,
    ) -> Result<FilterOutcome, FilterError> {
        self.reporter.description("Resolving layers");
        self.reporter.progress(5);

        let source_layer = self.resolve_layer(&request.source_layer_id)?;
        let source = LayerDescriptor::resolve(
            source_layer.as_ref(),
            request.forced_backends.get(&request.source_layer_id).map(String::as_str),
        )?;
        verify_forced_backend(
            source.backend,
            self.pg_runner.is_some(),
            self.sqlite_runner.is_some(),
        )?;

        let mut targets = Vec::new();
        for spec in &request.targets {
            let layer = self.resolve_layer(&spec.layer_id)?;
            let descriptor = LayerDescriptor::resolve(
                layer.as_ref(),
                request.forced_backends.get(&spec.layer_id).map(String::as_str),
            )?;
            verify_forced_backend(
                descriptor.backend,
                self.pg_runner.is_some(),
                self.sqlite_runner.is_some(),
            )?;
            targets.push((spec, layer, descriptor));
        }

        // Step 1 - source filtering. Aborts the whole request on failure.
        cancel.check()?;
        self.reporter.description("Filtering source layer");
        self.reporter.progress(15);
        let selection_ids = self
            .apply_source_filter(request, &source_layer, &source)
            .await?;
        self.caches.invalidate_geometry();

        // Step 2+ happens per target; an empty target list is a valid
        // source-only filter.
        if targets.is_empty() {
            return Ok(FilterOutcome::success(
                vec![source.layer_id.clone()],
                "Source layer filtered".to_owned(),
            ));
        }

        let mv_manager = self.mv_manager(request);
        let source_filter =
            self.derive_source_filter(&source_layer, &source, selection_ids.as_deref());

        // Consolidate a shared source restriction when several spatial
        // targets would otherwise rescan it.
        let filter_chain = self
            .maybe_filter_chain_mv(&mv_manager, request, &source, &targets, &source_filter)
            .await;

        cancel.check()?;
        self.reporter.description("Filtering target layers");
        self.reporter.progress(25);

        let descriptors: Vec<&LayerDescriptor> =
            targets.iter().map(|(_, _, d)| d).collect();
        let policy = execution_policy(&descriptors);
        debug!("execution policy: {policy:?}");

        let optimizer = CombinedQueryOptimizer::new(&request.session_id);
        let mut applied: Vec<String> = Vec::new();
        let mut failed: Vec<(String, String)> = Vec::new();
        let total = targets.len();
        let mut canceled = false;

        match &policy {
            // One layer at a time, pausing in between so a SQLite target
            // can release its write lock before the next one takes it.
            ExecutionPolicy::Sequential { inter_layer_delay } => {
                for (ndx, (spec, layer, descriptor)) in targets.iter().enumerate() {
                    if cancel.is_canceled() {
                        canceled = true;
                        break;
                    }
                    let pct = 30 + ((ndx * 60) / total.max(1)) as u8;
                    self.reporter.progress(pct);
                    if cancel.is_canceled() {
                        canceled = true;
                        break;
                    }

                    let started = std::time::Instant::now();
                    let built = self
                        .build_target_expression(
                            request,
                            &source_layer,
                            &source,
                            spec,
                            layer,
                            descriptor,
                            selection_ids.as_deref(),
                            &source_filter,
                            filter_chain.as_ref(),
                            &optimizer,
                            &mv_manager,
                        )
                        .await;
                    self.warn_if_slow(&descriptor.layer_id, started.elapsed());
                    match built {
                        Ok(expression) => {
                            self.queue.enqueue(PendingSubsetRequest {
                                layer: layer.clone(),
                                expression: expression.clone(),
                                backend: descriptor.backend,
                            });
                            let outcomes = self.queue.drain().await;
                            match apply_result(&outcomes, &descriptor.layer_id) {
                                Ok(()) => {
                                    self.record_history(
                                        request,
                                        &descriptor.layer_id,
                                        &expression,
                                    )
                                    .await;
                                    applied.push(descriptor.layer_id.clone());
                                }
                                Err(reason) => {
                                    self.report_target_failure(&descriptor.layer_id, &reason);
                                    failed.push((descriptor.layer_id.clone(), reason));
                                }
                            }
                        }
                        Err(x @ FilterError::GeometryPreparation(_)) => {
                            // A source that cannot be prepared dooms every
                            // remaining target; abort after cleanup.
                            self.cleanup_session(&mv_manager).await;
                            return Err(x);
                        }
                        Err(x) => {
                            self.report_target_failure(&descriptor.layer_id, &x.to_string());
                            failed.push((descriptor.layer_id.clone(), x.to_string()));
                        }
                    }

                    if ndx + 1 < total {
                        tokio::time::sleep(*inter_layer_delay).await;
                    }
                }
            }
            // Database-only fan-out: the expensive awaits (view creation,
            // capability round-trips) overlap; the applications still land
            // through the single serialized UI runnable.
            ExecutionPolicy::Parallel { .. } => {
                let builds = targets.iter().map(|(spec, layer, descriptor)| async {
                    let started = std::time::Instant::now();
                    let built = self
                        .build_target_expression(
                            request,
                            &source_layer,
                            &source,
                            spec,
                            layer,
                            descriptor,
                            selection_ids.as_deref(),
                            &source_filter,
                            filter_chain.as_ref(),
                            &optimizer,
                            &mv_manager,
                        )
                        .await;
                    self.warn_if_slow(&descriptor.layer_id, started.elapsed());
                    (spec, layer, descriptor, built)
                });
                let built = futures::future::join_all(builds).await;
                self.reporter.progress(70);

                if cancel.is_canceled() {
                    canceled = true;
                } else {
                    let mut pending: Vec<(&LayerDescriptor, String)> = Vec::new();
                    for (_, layer, descriptor, built) in built {
                        match built {
                            Err(x @ FilterError::GeometryPreparation(_)) => {
                                self.cleanup_session(&mv_manager).await;
                                return Err(x);
                            }
                            Ok(expression) => {
                                self.queue.enqueue(PendingSubsetRequest {
                                    layer: layer.clone(),
                                    expression: expression.clone(),
                                    backend: descriptor.backend,
                                });
                                pending.push((descriptor, expression));
                            }
                            Err(x) => {
                                self.report_target_failure(
                                    &descriptor.layer_id,
                                    &x.to_string(),
                                );
                                failed.push((descriptor.layer_id.clone(), x.to_string()));
                            }
                        }
                    }
                    let outcomes = self.queue.drain().await;
                    for (descriptor, expression) in pending {
                        match apply_result(&outcomes, &descriptor.layer_id) {
                            Ok(()) => {
                                self.record_history(request, &descriptor.layer_id, &expression)
                                    .await;
                                applied.push(descriptor.layer_id.clone());
                            }
                            Err(reason) => {
                                self.report_target_failure(&descriptor.layer_id, &reason);
                                failed.push((descriptor.layer_id.clone(), reason));
                            }
                        }
                    }
                }
            }
        }

        if canceled {
            // A canceled request must not leave its views behind.
            self.cleanup_session(&mv_manager).await;
            self.reporter
                .push_message("filter", "Operation canceled", Severity::Info);
            return Ok(FilterOutcome {
                applied_layers: applied,
                failed_layers: failed,
                partial: false,
                canceled: true,
                message: "Operation canceled".to_owned(),
            });
        }

        self.reporter.progress(100);
        let partial = !failed.is_empty() && (!applied.is_empty() || !targets.is_empty());
        let message = if failed.is_empty() {
            format!("Filtered {} layer(s)", applied.len() + 1)
        } else {
            let named: Vec<&str> = failed.iter().take(3).map(|(id, _)| id.as_str()).collect();
            let overflow = failed.len().saturating_sub(3);
            let mut m = format!(
                "Filtered {} layer(s); failed: {}",
                applied.len() + 1,
                named.join(", ")
            );
            if overflow > 0 {
                m.push_str(&format!(" and {overflow} more"));
            }
            self.reporter.push_message("filter", &m, Severity::Warning);
            m
        };

        Ok(FilterOutcome {
            applied_layers: applied,
            failed_layers: failed,
            partial,
            canceled: false,
            message,
        })
    }

    // Apply the source-side filter and return the explicit driving ids,
    // when the selection carries any.
    async fn apply_source_filter(
        &self,
        request: &FilterRequest,
        source_layer: &Arc<dyn HostLayer>,
        source: &LayerDescriptor,
    ) -> Result<Option<Vec<i64>>, FilterError> {
        match &request.selection {
            Selection::FeatureIds(ids) => {
                let values: Vec<PkValue> = ids.iter().map(|x| PkValue::Int(*x)).collect();
                let expression = build_fid_expression(&values, source);
                self.apply_to_source(request, source_layer, source, expression)
                    .await?;
                Ok(Some(ids.clone()))
            }
            Selection::Expression(raw) => {
                let sanitized = sanitize_subset_string(raw);
                if sanitized.malformed {
                    self.reporter.push_message(
                        "filter",
                        "Expression could not be fully sanitized; applying as-is",
                        Severity::Warning,
                    );
                }
                let translated =
                    translate_geometry_functions(&sanitized.text, source.backend);
                let expression = qualify_field_names(&translated, source);
                self.apply_to_source(request, source_layer, source, expression)
                    .await?;
                Ok(None)
            }
            Selection::AllVisible => Ok(None),
        }
    }

    async fn apply_to_source(
        &self,
        request: &FilterRequest,
        source_layer: &Arc<dyn HostLayer>,
        source: &LayerDescriptor,
        expression: String,
    ) -> Result<(), FilterError> {
        self.queue.enqueue(PendingSubsetRequest {
            layer: source_layer.clone(),
            expression: expression.clone(),
            backend: source.backend,
        });
        let outcomes = self.queue.drain().await;
        apply_result(&outcomes, &source.layer_id).map_err(|reason| {
            FilterError::DialectExecution {
                layer: source.layer_id.clone(),
                reason,
            }
        })?;
        self.record_history(request, &source.layer_id, &expression).await;
        Ok(())
    }

    // The source restriction used inside EXISTS-mode queries.
    fn derive_source_filter(
        &self,
        source_layer: &Arc<dyn HostLayer>,
        source: &LayerDescriptor,
        selection_ids: Option<&[i64]>,
    ) -> Option<String> {
        if let Some(ids) = selection_ids {
            let values: Vec<PkValue> = ids.iter().map(|x| PkValue::Int(*x)).collect();
            return Some(build_fid_expression(&values, source));
        }
        let current = source_layer.subset_string();
        if current.trim().is_empty() {
            return None;
        }
        let sanitized = sanitize_subset_string(&current);
        if sanitized.malformed {
            return None;
        }
        // A subset that itself rides a session view or EXISTS cannot be
        // re-embedded verbatim; keep its spatial clauses when it has any.
        if analyze(&sanitized.text).is_complex() {
            return extract_spatial_clauses(&sanitized.text);
        }
        Some(sanitized.text)
    }

    fn mv_manager(&self, request: &FilterRequest) -> Option<MvManager> {
        self.pg_runner.as_ref().map(|runner| {
            MvManager::new(runner.clone(), Backend::PostgreSql, &request.session_id)
        })
    }

    async fn maybe_filter_chain_mv(
        &self,
        mv_manager: &Option<MvManager>,
        request: &FilterRequest,
        source: &LayerDescriptor,
        targets: &[(&crate::TargetSpec, Arc<dyn HostLayer>, LayerDescriptor)],
        source_filter: &Option<String>,
    ) -> Option<MaterializedView> {
        let manager = mv_manager.as_ref()?;
        let filter = source_filter.as_deref()?;
        if source.backend != Backend::PostgreSql {
            return None;
        }
        let pg_targets = targets
            .iter()
            .filter(|(_, _, d)| d.backend == Backend::PostgreSql)
            .count();
        if pg_targets < 2 {
            return None;
        }
        let mv = MaterializedView::filter_chain(
            &request.session_id,
            source.schema.as_deref().unwrap_or("public"),
            &source.table,
            &source.geometry_column,
            &source.primary_key,
            filter,
        );
        match manager.ensure(&mv).await {
            Ok(()) => {
                info!(
                    "filter-chain view {} shared by {pg_targets} targets",
                    mv.name
                );
                Some(mv)
            }
            Err(x) => {
                warn!("filter-chain view creation failed, continuing without: {x}");
                None
            }
        }
    }

    // Build the subset expression for one target layer.
    #[allow(clippy::too_many_arguments)]
    async fn build_target_expression(
        &self,
        request: &FilterRequest,
        source_layer: &Arc<dyn HostLayer>,
        source: &LayerDescriptor,
        spec: &crate::TargetSpec,
        target_layer: &Arc<dyn HostLayer>,
        target: &LayerDescriptor,
        selection_ids: Option<&[i64]>,
        source_filter: &Option<String>,
        filter_chain: Option<&MaterializedView>,
        optimizer: &CombinedQueryOptimizer,
        mv_manager: &Option<MvManager>,
    ) -> Result<String, FilterError> {
        let source_hash = geometry_fingerprint(
            &source.layer_id,
            selection_ids.unwrap_or(&[]),
            request.buffer.as_ref(),
            request.use_centroids.source,
            None,
        );
        let expr_key = expression_fingerprint(
            &target.layer_id,
            &spec.predicates,
            request.buffer.as_ref(),
            &source_hash,
            target.backend,
            source_filter.as_deref(),
            request.use_centroids,
        );
        if let Some(hit) = self.caches.expression(&expr_key) {
            return Ok(hit);
        }

        // Geometry preparation, cache consulted.
        let prepared = match self.caches.geometry(&source_hash) {
            Some(hit) if compatible(&hit, target.backend) => hit,
            _ => {
                let preparer = GeometryPreparer;
                let project_crs = self.registry.project_crs_auth_id();
                let prepare_spec = PrepareSpec {
                    feature_ids: selection_ids,
                    buffer: request.buffer.as_ref(),
                    use_centroids: request.use_centroids.source,
                    target_backend: target.backend,
                    project_crs: &project_crs,
                    project_crs_is_geographic: self.registry.project_crs_is_geographic(),
                };
                let (prepared, stats) = preparer.prepare(
                    source_layer.as_ref(),
                    source,
                    &prepare_spec,
                    source_filter.clone(),
                )?;
                if stats.eroded > 0 {
                    self.reporter.push_message(
                        "filter",
                        &format!("Negative buffer eroded {} feature(s)", stats.eroded),
                        Severity::Warning,
                    );
                }
                let prepared = Arc::new(prepared);
                self.caches
                    .store_geometry(source_hash.clone(), prepared.clone());
                prepared
            }
        };

        // Under a filter chain, PostgreSQL targets read the consolidated
        // view instead of re-scanning the source.
        let effective: PreparedSourceGeometry;
        let prepared_ref: &PreparedSourceGeometry = match (filter_chain, target.backend) {
            (Some(mv), Backend::PostgreSql) => {
                effective = PreparedSourceGeometry::MaterializedViewReference {
                    schema: mv.schema.clone(),
                    view_name: mv.name.clone(),
                    pk_column: mv.pk_column.clone(),
                };
                &effective
            }
            _ => prepared.as_ref(),
        };

        // The buffer is still pending when the prepared form references
        // raw source geometry (a table or a filter-chain view); WKT
        // literals and in-memory layers had it applied in the pipeline.
        let pending_buffer = match prepared_ref {
            PreparedSourceGeometry::TableReference { .. }
            | PreparedSourceGeometry::MaterializedViewReference { .. } => {
                request.buffer.as_ref()
            }
            _ => None,
        };

        let core = match target.backend.effective() {
            Backend::PostgreSql => {
                let builder = PgExpressionBuilder::new(target);
                // Large explicit selections with a constant buffer get their
                // own indexed view up front: the buffer is computed once per
                // source row instead of once per comparison.
                let promoted = self
                    .promote_source_selection(
                        request,
                        source,
                        prepared_ref,
                        selection_ids,
                        mv_manager,
                    )
                    .await?;
                match promoted {
                    Some(view) => builder.build_buffered_mv_exists(&view, &spec.predicates),
                    None => {
                        builder.build(prepared_ref, &spec.predicates, pending_buffer)?
                    }
                }
            }
            Backend::SpatiaLite => SpatialiteExpressionBuilder::new(target).build(
                prepared_ref,
                &spec.predicates,
                pending_buffer,
            )?,
            _ => {
                let memory = match prepared_ref {
                    PreparedSourceGeometry::InMemoryLayer(x) => x,
                    _ => {
                        return Err(FilterError::Runtime(
                            "OGR target without an in-memory source".into(),
                        ));
                    }
                };
                let target_features = target_layer.features(None)?;
                let matched =
                    select_by_location(&target_features, memory, &spec.predicates)?;
                build_ogr_expression(&matched, target)?
            }
        };

        // Combine with the prior subset: optimizer first, manual path when
        // it declines.
        let old_subset = target_layer.subset_string();
        let expression = match spec.combine.to_sql() {
            None => core,
            Some(op) if old_subset.trim().is_empty() => {
                debug!("no prior subset on {}; {op} degenerates to replace", target.layer_id);
                core
            }
            Some(op) => {
                match optimizer.optimize(&old_subset, &core, op, target)? {
                    Some(optimized) => {
                        if let Some(mv) = &optimized.pending_mv {
                            match mv_manager {
                                Some(manager) => manager.ensure(mv).await?,
                                None => {
                                    return Err(FilterError::BackendUnavailable(
                                        "Optimizer requires a PostgreSQL connection for \
                                         view creation"
                                            .into(),
                                    ));
                                }
                            }
                        }
                        info!("optimizer: {}", optimized.hint);
                        optimized.expression
                    }
                    None => combine_with_subset(&core, &old_subset, op),
                }
            }
        };

        self.caches.store_expression(expr_key, expression.clone());
        Ok(expression)
    }

    // The direct SOURCE_MV path: a table-reference source, an explicit
    // selection over the threshold, and a constant buffer.
    async fn promote_source_selection(
        &self,
        request: &FilterRequest,
        source: &LayerDescriptor,
        prepared: &PreparedSourceGeometry,
        selection_ids: Option<&[i64]>,
        mv_manager: &Option<MvManager>,
    ) -> Result<Option<MaterializedView>, FilterError> {
        let PreparedSourceGeometry::TableReference {
            schema,
            table,
            geom_column,
            ..
        } = prepared
        else {
            return Ok(None);
        };
        let (Some(ids), Some(manager)) = (selection_ids, mv_manager) else {
            return Ok(None);
        };
        let Some(buffer) = &request.buffer else {
            return Ok(None);
        };
        let crate::BufferDistance::Constant(distance) = &buffer.distance else {
            return Ok(None);
        };
        if ids.len() <= config().source_fid_mv_threshold() {
            return Ok(None);
        }

        let view = MaterializedView::source_selection(
            &request.session_id,
            schema.as_deref().unwrap_or("public"),
            table,
            geom_column,
            &source.primary_key,
            ids,
            &distance.to_string(),
            &buffer.pg_style(),
        );
        manager.ensure(&view).await?;
        info!(
            "promoted {} driving fids to source view {}",
            ids.len(),
            view.name
        );
        Ok(Some(view))
    }

    async fn record_history(&self, request: &FilterRequest, layer_id: &str, expression: &str) {
        let Some(history) = &self.history else {
            return;
        };
        let source = if layer_id == request.source_layer_id {
            None
        } else {
            Some(request.source_layer_id.as_str())
        };
        if let Err(x) = history
            .append(&request.project_uuid, layer_id, source, expression)
            .await
        {
            // Never fatal; surfaced and moved past.
            self.reporter.push_message(
                "history",
                &format!("History append failed for {layer_id}: {x}"),
                Severity::Warning,
            );
        }
    }

    // ---- unfilter ----

    async fn run_unfilter(&self, request: &FilterRequest) -> Result<FilterOutcome, FilterError> {
        self.reporter.description("Clearing filters");
        let mut layer_ids = vec![request.source_layer_id.clone()];
        layer_ids.extend(request.targets.iter().map(|t| t.layer_id.clone()));

        for id in &layer_ids {
            let layer = self.resolve_layer(id)?;
            let descriptor = LayerDescriptor::resolve(layer.as_ref(), None)?;
            self.queue.enqueue(PendingSubsetRequest {
                layer,
                expression: String::new(),
                backend: descriptor.backend,
            });
        }
        let outcomes = self.queue.drain().await;
        let applied: Vec<String> = outcomes
            .iter()
            .filter(|x| x.applied)
            .map(|x| x.layer_id.clone())
            .collect();
        self.reporter.progress(100);
        // History stays untouched: unfilter is not an undo.
        Ok(FilterOutcome::success(
            applied,
            format!("Cleared {} layer(s)", layer_ids.len()),
        ))
    }

    // ---- reset ----

    async fn run_reset(&self, request: &FilterRequest) -> Result<FilterOutcome, FilterError> {
        self.reporter.description("Restoring recorded filters");
        let mut layer_ids = vec![request.source_layer_id.clone()];
        layer_ids.extend(request.targets.iter().map(|t| t.layer_id.clone()));

        for id in &layer_ids {
            let layer = self.resolve_layer(id)?;
            let descriptor = LayerDescriptor::resolve(layer.as_ref(), None)?;
            let expression = match &self.history {
                Some(h) => h
                    .last(&request.project_uuid, id)
                    .await?
                    .map(|e| e.subset_string)
                    .unwrap_or_default(),
                None => String::new(),
            };
            self.queue.enqueue(PendingSubsetRequest {
                layer,
                expression,
                backend: descriptor.backend,
            });
        }
        let outcomes = self.queue.drain().await;
        let applied: Vec<String> = outcomes
            .iter()
            .filter(|x| x.applied)
            .map(|x| x.layer_id.clone())
            .collect();
        self.reporter.progress(100);
        Ok(FilterOutcome::success(
            applied,
            format!("Restored {} layer(s)", layer_ids.len()),
        ))
    }

    // ---- export ----

    // Format writers live outside the core; resolving the selection is
    // this side's whole contribution.
    async fn run_export(&self, request: &FilterRequest) -> Result<FilterOutcome, FilterError> {
        let source_layer = self.resolve_layer(&request.source_layer_id)?;
        let count = match &request.selection {
            Selection::FeatureIds(ids) => ids.len(),
            _ => source_layer.features(None)?.len(),
        };
        Ok(FilterOutcome::success(
            vec![request.source_layer_id.clone()],
            format!("Resolved {count} feature(s) for export"),
        ))
    }

    async fn cleanup_session(&self, mv_manager: &Option<MvManager>) {
        if let Some(manager) = mv_manager
            && let Err(x) = manager.drop_session().await
        {
            warn!("session view cleanup failed, orphan GC will reclaim: {x}");
        }
    }

    fn warn_if_slow(&self, layer_id: &str, elapsed: std::time::Duration) {
        let ms = elapsed.as_millis() as u64;
        if ms >= config().very_long_query_warning_ms() {
            self.reporter.push_message(
                "performance",
                &format!("Query preparation for '{layer_id}' took {ms} ms"),
                Severity::Warning,
            );
        } else if ms >= config().long_query_warning_ms() {
            self.reporter.push_message(
                "performance",
                &format!("Query preparation for '{layer_id}' is slow ({ms} ms)"),
                Severity::Info,
            );
        }
    }

    fn report_target_failure(&self, layer_id: &str, reason: &str) {
        self.reporter.push_message(
            "filter",
            &format!("{layer_id}: {reason}"),
            Severity::Critical,
        );
    }

    fn resolve_layer(&self, id: &str) -> Result<Arc<dyn HostLayer>, FilterError> {
        self.registry.layer(id).ok_or_else(|| {
            let msg = format!("Layer '{id}' does not resolve");
            FilterError::Input(msg.into())
        })
    }
}

// A geometry-cache hit is only usable when its variant suits the target
// backend being served.
fn compatible(prepared: &PreparedSourceGeometry, backend: Backend) -> bool {
    match backend.effective() {
        Backend::Ogr => matches!(prepared, PreparedSourceGeometry::InMemoryLayer(_)),
        Backend::PostgreSql => !matches!(prepared, PreparedSourceGeometry::InMemoryLayer(_)),
        _ => matches!(prepared, PreparedSourceGeometry::WKTLiteral { .. }),
    }
}

fn apply_result(outcomes: &[ApplyOutcome], layer_id: &str) -> Result<(), String> {
    match outcomes.iter().find(|x| x.layer_id == layer_id) {
        Some(outcome) if outcome.applied => Ok(()),
        Some(outcome) => Err(outcome
            .error
            .clone()
            .unwrap_or_else(|| "Subset application failed".to_owned())),
        None => Err("Subset application produced no outcome".to_owned()),
    }
}
