//! Static Index Rebuild
//!
//! One call to [`StaticIndexRebuild::run`] is one rebuild cycle:
//!
//! 1. Invalidate every key under the namespace prefix
//! 2. Take the rebuild guard, or skip the cycle if another worker holds it
//! 3. Skip the cycle if a complete index is already present
//! 4. Run the built-in loaders in order
//! 5. Run each plugin's loader, isolating failures per plugin
//! 6. Release the guard
//!
//! Invalidation runs before the guard and presence checks, so a cycle that
//! finds a present index has already deleted it. The index-present exit also
//! leaves the guard set until its TTL elapses. Both match the behaviour of the
//! job this one replaces and are kept deliberately.
//!
//! # Failure handling
//!
//! | Failure                        | Effect                                         |
//! |--------------------------------|------------------------------------------------|
//! | Invalidation                   | logged, cycle ends, guard never taken          |
//! | Built-in loader error          | returned as `Err`, guard left until TTL        |
//! | Plugin without extension point | logged at debug, next plugin runs              |
//! | Plugin resolution or loader    | logged at error, next plugin runs              |
//!
//! Built-in loaders are not isolated; a panic in one unwinds through `run`.

use crate::metrics::RebuildMetrics;
use chrono::Utc;
use serde::Serialize;
use staticdex_core::{
    new_run_id, CacheError, CacheNamespace, IndexResult, PluginError, RebuildConfig, RunId,
    CLASSIFICATION_DATASET, REFERENCE_MEDICINE_DATASET,
};
use staticdex_loaders::{
    DatasetLoader, LoaderRegistry, PluginRegistry, PluginResolution, RecordSource,
    StaticPluginManager,
};
use staticdex_storage::{
    CacheStore, GuardAcquisition, IndexPresence, MarkerPresenceCheck, NamespaceInvalidator,
    RebuildGuard,
};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// REPORT
// ============================================================================

/// States of a rebuild cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RebuildPhase {
    Idle,
    Invalidating,
    GuardCheck,
    PresenceCheck,
    LoadingBuiltins,
    LoadingPlugins,
    Releasing,
    Done,
}

impl RebuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildPhase::Idle => "idle",
            RebuildPhase::Invalidating => "invalidating",
            RebuildPhase::GuardCheck => "guard_check",
            RebuildPhase::PresenceCheck => "presence_check",
            RebuildPhase::LoadingBuiltins => "loading_builtins",
            RebuildPhase::LoadingPlugins => "loading_plugins",
            RebuildPhase::Releasing => "releasing",
            RebuildPhase::Done => "done",
        }
    }
}

impl fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a cycle that returned normally ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The namespace could not be invalidated; nothing else ran.
    InvalidationFailed { error: CacheError },
    /// Another worker holds the guard.
    GuardHeld,
    /// A complete index was already present; the guard stays until its TTL.
    IndexPresent,
    /// Loaders ran and the guard was released.
    Completed,
}

impl RebuildOutcome {
    /// Whether this cycle ran the loaders.
    pub fn is_completed(&self) -> bool {
        matches!(self, RebuildOutcome::Completed)
    }
}

/// What happened to one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLoadStatus {
    Loaded,
    NoExtensionPoint,
    Failed(PluginError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginReport {
    pub plugin: String,
    pub status: PluginLoadStatus,
}

/// Account of a single cycle.
///
/// The report is informational. Whether the index really exists is answered
/// by the presence check on a later cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub run_id: RunId,
    /// States visited, starting at `Idle` and ending at `Done`.
    pub phases: Vec<RebuildPhase>,
    pub outcome: RebuildOutcome,
    /// Keys removed by invalidation, `None` when it failed.
    pub keys_invalidated: Option<u64>,
    /// Built-in loaders that ran, in order.
    pub builtins_loaded: Vec<String>,
    /// One entry per installed plugin, in plugin manager order.
    pub plugins: Vec<PluginReport>,
}

impl RebuildReport {
    /// Plugins that were skipped for lack of an extension point.
    pub fn skipped_plugins(&self) -> Vec<&str> {
        self.plugins_with(|s| matches!(s, PluginLoadStatus::NoExtensionPoint))
    }

    /// Plugins whose loader failed to resolve or to run.
    pub fn failed_plugins(&self) -> Vec<&str> {
        self.plugins_with(|s| matches!(s, PluginLoadStatus::Failed(_)))
    }

    /// Plugins whose loader ran successfully.
    pub fn loaded_plugins(&self) -> Vec<&str> {
        self.plugins_with(|s| matches!(s, PluginLoadStatus::Loaded))
    }

    fn plugins_with(&self, pred: impl Fn(&PluginLoadStatus) -> bool) -> Vec<&str> {
        self.plugins
            .iter()
            .filter(|p| pred(&p.status))
            .map(|p| p.plugin.as_str())
            .collect()
    }
}

/// Report under construction while a cycle runs.
struct ReportBuilder {
    run_id: RunId,
    phases: Vec<RebuildPhase>,
    keys_invalidated: Option<u64>,
    builtins_loaded: Vec<String>,
    plugins: Vec<PluginReport>,
}

impl ReportBuilder {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            phases: vec![RebuildPhase::Idle],
            keys_invalidated: None,
            builtins_loaded: Vec::new(),
            plugins: Vec::new(),
        }
    }

    fn enter(&mut self, phase: RebuildPhase) {
        tracing::trace!(phase = %phase, "Entering rebuild phase");
        self.phases.push(phase);
    }

    fn finish(mut self, outcome: RebuildOutcome) -> RebuildReport {
        self.phases.push(RebuildPhase::Done);
        RebuildReport {
            run_id: self.run_id,
            phases: self.phases,
            outcome,
            keys_invalidated: self.keys_invalidated,
            builtins_loaded: self.builtins_loaded,
            plugins: self.plugins,
        }
    }
}

// ============================================================================
// JOB
// ============================================================================

/// Record sources of the two built-in datasets.
#[derive(Clone)]
pub struct BuiltinSources {
    pub classification: Arc<dyn RecordSource>,
    pub reference_medicines: Arc<dyn RecordSource>,
}

/// The rebuild job and its injected collaborators.
pub struct StaticIndexRebuild {
    namespace: CacheNamespace,
    invalidator: NamespaceInvalidator,
    guard: RebuildGuard,
    presence: Arc<dyn IndexPresence>,
    loaders: LoaderRegistry,
    metrics: Arc<RebuildMetrics>,
}

impl StaticIndexRebuild {
    pub fn new(
        namespace: CacheNamespace,
        invalidator: NamespaceInvalidator,
        guard: RebuildGuard,
        presence: Arc<dyn IndexPresence>,
        loaders: LoaderRegistry,
    ) -> Self {
        Self {
            namespace,
            invalidator,
            guard,
            presence,
            loaders,
            metrics: Arc::new(RebuildMetrics::new()),
        }
    }

    /// Wire a job from configuration.
    ///
    /// The built-ins are the classification and reference medicine datasets,
    /// in that order, and the index counts as present once both have written
    /// their completion markers. Plugins come from `config.plugins`.
    pub fn from_config(
        config: &RebuildConfig,
        store: Arc<dyn CacheStore>,
        sources: BuiltinSources,
        plugins: Arc<dyn PluginRegistry>,
    ) -> IndexResult<Self> {
        config.validate()?;
        let namespace = config.namespace();

        let classification =
            DatasetLoader::classification(namespace.clone(), store.clone(), sources.classification);
        let medicines = DatasetLoader::reference_medicines(
            namespace.clone(),
            store.clone(),
            sources.reference_medicines,
        );
        let loaders = LoaderRegistry::new(Arc::new(StaticPluginManager::from_config(config)), plugins)
            .with_builtin(Arc::new(classification))
            .with_builtin(Arc::new(medicines));

        let presence = MarkerPresenceCheck::new(
            store.clone(),
            namespace.clone(),
            [CLASSIFICATION_DATASET, REFERENCE_MEDICINE_DATASET],
        );

        Ok(Self::new(
            namespace,
            NamespaceInvalidator::new(store.clone(), config.invalidation_batch_size),
            RebuildGuard::new(store, config.guard(), config.guard_ttl),
            Arc::new(presence),
            loaders,
        ))
    }

    /// Share `metrics` with other jobs or the host.
    pub fn with_metrics(mut self, metrics: Arc<RebuildMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<RebuildMetrics> {
        &self.metrics
    }

    pub fn namespace(&self) -> &CacheNamespace {
        &self.namespace
    }

    /// Run one cycle, discarding the report.
    pub fn execute(&self) -> IndexResult<()> {
        self.run().map(|_| ())
    }

    /// Run one rebuild cycle.
    ///
    /// Returns `Err` when a built-in loader fails, or when the guard or the
    /// presence check cannot reach the cache. Every other ending, including a
    /// failed invalidation, is an `Ok` report.
    pub fn run(&self) -> IndexResult<RebuildReport> {
        let run_id = new_run_id();
        let span = tracing::info_span!(
            "static_index_rebuild",
            run_id = %run_id,
            namespace = %self.namespace
        );
        let _entered = span.enter();

        RebuildMetrics::incr(&self.metrics.cycles);
        let mut report = ReportBuilder::new(run_id);

        report.enter(RebuildPhase::Invalidating);
        match self.invalidator.invalidate(&self.namespace) {
            Ok(deleted) => {
                tracing::info!(
                    deleted,
                    pattern = %self.namespace.pattern(),
                    "Deleted keys matching namespace pattern"
                );
                self.metrics
                    .keys_invalidated
                    .fetch_add(deleted, std::sync::atomic::Ordering::Relaxed);
                report.keys_invalidated = Some(deleted);
            }
            Err(error) => {
                tracing::error!(
                    error = %error,
                    pattern = %self.namespace.pattern(),
                    "Failed to delete keys matching namespace pattern"
                );
                RebuildMetrics::incr(&self.metrics.invalidation_failures);
                return Ok(report.finish(RebuildOutcome::InvalidationFailed { error }));
            }
        }

        report.enter(RebuildPhase::GuardCheck);
        let lease = match self.guard.acquire(run_id)? {
            GuardAcquisition::Acquired(lease) => lease,
            GuardAcquisition::AlreadyHeld => {
                tracing::info!(guard_key = %self.guard.key(), "Static index already loading, skipping");
                RebuildMetrics::incr(&self.metrics.skipped_guard_held);
                return Ok(report.finish(RebuildOutcome::GuardHeld));
            }
        };
        tracing::info!(
            guard_key = %self.guard.key(),
            expires_at = %lease.expires_at(),
            "Loading static index"
        );

        report.enter(RebuildPhase::PresenceCheck);
        if self.presence.exists()? {
            let lease = lease.leave_to_expire();
            tracing::info!(expires_at = %lease.expires_at, "Static index already exists, skipping");
            RebuildMetrics::incr(&self.metrics.skipped_index_present);
            return Ok(report.finish(RebuildOutcome::IndexPresent));
        }

        report.enter(RebuildPhase::LoadingBuiltins);
        for builtin in self.loaders.builtins() {
            if let Err(e) = builtin.invoke() {
                tracing::error!(
                    loader = builtin.name(),
                    error = %e,
                    "Built-in loader failed, leaving guard to expire"
                );
                RebuildMetrics::incr(&self.metrics.builtin_failures);
                lease.leave_to_expire();
                return Err(e.into());
            }
            tracing::debug!(loader = builtin.name(), "Built-in loader finished");
            report.builtins_loaded.push(builtin.name().to_string());
        }

        report.enter(RebuildPhase::LoadingPlugins);
        for plugin in self.loaders.plugins() {
            let status = self.load_plugin(&self.loaders.resolve_plugin(&plugin));
            report.plugins.push(PluginReport {
                plugin: plugin.name,
                status,
            });
        }

        report.enter(RebuildPhase::Releasing);
        if let Err(e) = lease.ensure_live(Utc::now()) {
            tracing::warn!(error = %e, "Rebuild outlived the guard TTL");
        }
        self.guard.release_lease(lease)?;
        RebuildMetrics::incr(&self.metrics.completed);

        let report = report.finish(RebuildOutcome::Completed);
        tracing::info!(
            builtins = report.builtins_loaded.len(),
            plugins_loaded = report.loaded_plugins().len(),
            plugins_skipped = report.skipped_plugins().len(),
            plugins_failed = report.failed_plugins().len(),
            "Static index loaded"
        );
        Ok(report)
    }

    /// Invoke one plugin's loader, containing any failure.
    fn load_plugin(&self, resolution: &PluginResolution) -> PluginLoadStatus {
        let plugin = resolution.plugin_name();
        match resolution {
            PluginResolution::NoExtensionPoint(descriptor) => {
                tracing::debug!(
                    plugin,
                    extension_point = %descriptor.extension_point(),
                    "Plugin has no static data loader"
                );
                RebuildMetrics::incr(&self.metrics.plugins_skipped);
                PluginLoadStatus::NoExtensionPoint
            }
            PluginResolution::Failed { error, .. } => {
                tracing::error!(plugin, error = %error, "Error resolving static data loader for plugin");
                RebuildMetrics::incr(&self.metrics.plugin_failures);
                PluginLoadStatus::Failed(error.clone())
            }
            PluginResolution::Resolved(descriptor) => match descriptor.invoke_isolated() {
                Ok(()) => {
                    tracing::debug!(plugin, loader = descriptor.name(), "Plugin static data loaded");
                    PluginLoadStatus::Loaded
                }
                Err(source) => {
                    let error = PluginError::InvocationFailed {
                        plugin: plugin.to_string(),
                        source,
                    };
                    tracing::error!(plugin, error = %error, "Error loading static data for plugin");
                    RebuildMetrics::incr(&self.metrics.plugin_failures);
                    PluginLoadStatus::Failed(error)
                }
            },
        }
    }
}

impl fmt::Debug for StaticIndexRebuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticIndexRebuild")
            .field("namespace", &self.namespace)
            .field("invalidator", &self.invalidator)
            .field("guard", &self.guard)
            .field("loaders", &self.loaders)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use staticdex_loaders::{FactoryPluginRegistry, InlineSource, StaticRecord};
    use staticdex_storage::InMemoryCacheStore;

    fn sources() -> BuiltinSources {
        BuiltinSources {
            classification: Arc::new(InlineSource::new(vec![StaticRecord::new(
                "1A00",
                json!({"label": "Cholera"}),
            )])),
            reference_medicines: Arc::new(InlineSource::new(vec![StaticRecord::new(
                "dolo-650",
                json!({"name": "Dolo 650"}),
            )])),
        }
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let config = RebuildConfig {
            guard_key: "care_static_data:lock".to_string(),
            ..Default::default()
        };
        let result = StaticIndexRebuild::from_config(
            &config,
            Arc::new(InMemoryCacheStore::new()),
            sources(),
            Arc::new(FactoryPluginRegistry::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_second_cycle_rebuilds_after_invalidating() {
        let store = Arc::new(InMemoryCacheStore::new());
        let job = StaticIndexRebuild::from_config(
            &RebuildConfig::default(),
            store.clone(),
            sources(),
            Arc::new(FactoryPluginRegistry::new()),
        )
        .unwrap();

        let report = job.run().unwrap();
        assert_eq!(report.outcome, RebuildOutcome::Completed);
        assert_eq!(report.builtins_loaded, vec!["icd11", "medibase"]);
        assert_eq!(
            report.phases,
            vec![
                RebuildPhase::Idle,
                RebuildPhase::Invalidating,
                RebuildPhase::GuardCheck,
                RebuildPhase::PresenceCheck,
                RebuildPhase::LoadingBuiltins,
                RebuildPhase::LoadingPlugins,
                RebuildPhase::Releasing,
                RebuildPhase::Done,
            ]
        );
        assert!(store.exists("care_static_data:icd11:1A00").unwrap());
        assert!(!store.exists("redis_index_loading").unwrap());

        // The second cycle deletes the fresh index before it finds nothing
        // present, so it rebuilds again rather than skipping.
        let again = job.run().unwrap();
        assert_eq!(again.outcome, RebuildOutcome::Completed);
        assert_eq!(again.keys_invalidated, Some(4));
        assert_eq!(job.metrics().snapshot().completed, 2);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(RebuildPhase::GuardCheck.to_string(), "guard_check");
        assert_eq!(RebuildPhase::LoadingPlugins.as_str(), "loading_plugins");
    }
}
