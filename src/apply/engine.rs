//! Change-set execution.
//!
//! A single coordinator loop owns all bookkeeping. Entries whose
//! dependencies have succeeded are handed to workers in a [`JoinSet`], up to
//! the concurrency limit; workers report back through their join handles.
//! State is written by each worker before it reports success, so a crash
//! mid-run leaves the store describing exactly what was applied.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ApplySettings, ConfigHasher};
use crate::error::{ApplyError, ProviderError, Result, RiggingError};
use crate::graph::{ResourceId, ResourceRef};
use crate::planner::{Action, ChangeSet, ChangeSetEntry};
use crate::provider::{ProviderOperation, ProviderRegistry, ResolvedSpec};
use crate::state::StateStore;

use super::report::{ApplyReport, OutcomeStatus, ResourceOutcome};
use super::retry::{call_with_retry, RetryPolicy};

/// Execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Maximum entries executing at once. `1` runs strictly in order.
    pub concurrency: usize,
    /// Retry policy for transient provider failures.
    pub retry: RetryPolicy,
    /// Bound on every single provider call.
    pub operation_timeout: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

impl ApplyOptions {
    /// Builds options from document settings.
    #[must_use]
    pub const fn from_settings(settings: &ApplySettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
                max_backoff: Duration::from_millis(settings.max_backoff_ms),
            },
            operation_timeout: Duration::from_secs(settings.operation_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done,
}

/// Provider calls made and the failure message, if the entry failed.
type Attempt = (u32, Option<String>);

/// Executes change sets against providers and the state store.
#[derive(Clone)]
pub struct ApplyEngine {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn StateStore>,
    options: ApplyOptions,
    hasher: ConfigHasher,
}

impl ApplyEngine {
    /// Creates an apply engine with default options.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            options: ApplyOptions::default(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Sets the execution options.
    #[must_use]
    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the execution options.
    #[must_use]
    pub const fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Executes a change set.
    ///
    /// Provider failures do not make this return an error: they are recorded
    /// in the report and dependents are skipped. Cancelling `cancel` stops
    /// new work, lets in-flight entries finish, and returns a partial report.
    ///
    /// # Errors
    ///
    /// Returns an error if the change set is misordered or the state store
    /// fails. In-flight work is drained before the error is returned.
    pub async fn apply(&self, change_set: &ChangeSet, cancel: CancellationToken) -> Result<ApplyReport> {
        change_set.verify_order()?;

        let entries = &change_set.entries;
        let started_at = Utc::now();
        let concurrency = self.options.concurrency.max(1);

        let position: HashMap<&ResourceId, usize> =
            entries.iter().enumerate().map(|(i, e)| (&e.id, i)).collect();
        let dependencies: Vec<Vec<usize>> = entries
            .iter()
            .map(|e| {
                e.depends_on
                    .iter()
                    .filter_map(|d| position.get(d).copied())
                    .collect()
            })
            .collect();

        let mut slots = vec![Slot::Pending; entries.len()];
        let mut outcomes: Vec<Option<ResourceOutcome>> = vec![None; entries.len()];
        let mut workers: JoinSet<(usize, Result<ResourceOutcome>)> = JoinSet::new();
        let mut fatal: Option<RiggingError> = None;
        let mut stopping = false;

        info!(
            "Applying {} entries ({}) with concurrency {concurrency}",
            entries.len(),
            change_set.summary()
        );

        loop {
            let dispatching = fatal.is_none() && !cancel.is_cancelled();
            for i in 0..entries.len() {
                if slots[i] != Slot::Pending {
                    continue;
                }

                let blocked_by = dependencies[i].iter().copied().find(|&d| {
                    outcomes[d]
                        .as_ref()
                        .is_some_and(|o| o.status != OutcomeStatus::Succeeded)
                });
                if let Some(d) = blocked_by {
                    warn!("Skipping {}: {} did not succeed", entries[i].id, entries[d].id);
                    outcomes[i] = Some(ResourceOutcome::skipped(&entries[i], &entries[d].id));
                    slots[i] = Slot::Done;
                    continue;
                }

                // Skips keep propagating after cancellation; only dispatch stops.
                if !dispatching {
                    continue;
                }

                let ready = dependencies[i].iter().all(|&d| {
                    outcomes[d]
                        .as_ref()
                        .is_some_and(|o| o.status == OutcomeStatus::Succeeded)
                });
                if ready && workers.len() < concurrency {
                    slots[i] = Slot::Running;
                    let engine = self.clone();
                    let entry = entries[i].clone();
                    workers.spawn(async move { (i, engine.execute(&entry).await) });
                }
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                () = cancel.cancelled(), if !stopping => {
                    stopping = true;
                    warn!("Cancellation requested, waiting for {} in-flight entries", workers.len());
                }
                joined = workers.join_next() => match joined {
                    Some(Ok((i, Ok(outcome)))) => {
                        outcomes[i] = Some(outcome);
                        slots[i] = Slot::Done;
                    }
                    Some(Ok((i, Err(e)))) => {
                        error!("State store failed while applying {}: {e}", entries[i].id);
                        slots[i] = Slot::Done;
                        fatal.get_or_insert(e);
                    }
                    Some(Err(e)) => {
                        error!("Apply worker did not complete: {e}");
                        fatal.get_or_insert_with(|| {
                            ApplyError::Aborted {
                                reason: format!("apply worker failed: {e}"),
                            }
                            .into()
                        });
                    }
                    None => break,
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let outcomes: Vec<ResourceOutcome> = outcomes
            .into_iter()
            .zip(entries)
            .map(|(outcome, entry)| outcome.unwrap_or_else(|| ResourceOutcome::cancelled(entry)))
            .collect();

        let report = ApplyReport {
            operation: change_set.operation,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        self.store
            .append_history(report.history_entry(&change_set.config_hash))
            .await?;

        info!("Apply finished: {}", report.summary());
        Ok(report)
    }

    /// Executes one entry. Provider failures become a failed outcome; state
    /// store failures are returned as errors.
    async fn execute(&self, entry: &ChangeSetEntry) -> Result<ResourceOutcome> {
        let started = Instant::now();
        debug!("Starting {} of {}", entry.action, entry.id);

        let (attempts, failure) = match entry.action {
            Action::NoOp => {
                self.record_unchanged(entry).await?;
                (0, None)
            }
            Action::Create | Action::Update => self.converge(entry).await?,
            Action::Delete => self.remove(entry).await?,
        };

        let elapsed = started.elapsed();
        Ok(match failure {
            None => {
                if entry.action != Action::NoOp {
                    info!("{} {} ({attempts} attempts)", entry.action, entry.id);
                }
                ResourceOutcome::succeeded(entry, attempts, elapsed)
            }
            Some(message) => {
                error!("{} of {} failed: {message}", entry.action, entry.id);
                ResourceOutcome::failed(entry, attempts, message, elapsed)
            }
        })
    }

    /// Makes sure an unchanged resource is recorded with its current
    /// dependencies. No provider call is made.
    async fn record_unchanged(&self, entry: &ChangeSetEntry) -> Result<()> {
        let dependencies = entry
            .desired
            .as_ref()
            .map(|spec| spec.dependencies().to_vec())
            .unwrap_or_default();

        match self.store.get(&entry.id).await? {
            Some(stored) if stored.dependencies == dependencies => {}
            Some(stored) => {
                self.store.put(stored.with_dependencies(dependencies)).await?;
            }
            None => {
                if let Some(prior) = &entry.prior {
                    debug!("Recording existing resource {}", entry.id);
                    self.store
                        .put(prior.clone().with_dependencies(dependencies))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn converge(&self, entry: &ChangeSetEntry) -> Result<Attempt> {
        let Some(spec) = entry.desired.as_ref() else {
            return Ok((0, Some(format!("{} has no desired spec", entry.id))));
        };
        let provider = match self.registry.lookup(entry.id.kind()) {
            Ok(provider) => provider,
            Err(e) => return Ok((0, Some(e.to_string()))),
        };

        let mut recorded = HashMap::new();
        for dep in spec.dependencies() {
            if let Some(state) = self.store.get(dep).await? {
                recorded.insert(dep.clone(), state);
            }
        }

        let lookup = |r: &ResourceRef| {
            recorded
                .get(&r.target)
                .and_then(|state| state.output(&r.attribute))
        };
        let resolved = match ResolvedSpec::resolve(spec, &lookup) {
            Ok(resolved) => resolved,
            Err(missing) => {
                let message = if recorded.contains_key(&missing.target) {
                    format!("{missing} is not an output of {}", missing.target)
                } else {
                    format!("{} has no recorded state", missing.target)
                };
                return Ok((0, Some(format!("cannot resolve {missing}: {message}"))));
            }
        };

        let (attempts, result) = if entry.action == Action::Update {
            let Some(current) = entry.prior.as_ref() else {
                return Ok((0, Some(format!("{} has no prior state to update", entry.id))));
            };
            self.call(ProviderOperation::Update, &entry.id, || {
                provider.update(&resolved, current)
            })
            .await
        } else {
            self.call(ProviderOperation::Create, &entry.id, || provider.create(&resolved))
                .await
        };

        match result {
            Ok(mut state) => {
                state.dependencies = spec.dependencies().to_vec();
                state.attributes_hash = self.hasher.hash_attributes(&resolved.attributes);
                self.store.put(state).await?;
                Ok((attempts, None))
            }
            Err(e) => Ok((attempts, Some(e.to_string()))),
        }
    }

    async fn remove(&self, entry: &ChangeSetEntry) -> Result<Attempt> {
        let Some(current) = entry.prior.as_ref() else {
            self.store.delete(&entry.id).await?;
            return Ok((0, None));
        };
        let provider = match self.registry.lookup(entry.id.kind()) {
            Ok(provider) => provider,
            Err(e) => return Ok((0, Some(e.to_string()))),
        };

        let (attempts, result) = self
            .call(ProviderOperation::Delete, &entry.id, || provider.delete(current))
            .await;

        match result {
            Ok(()) => {
                self.store.delete(&entry.id).await?;
                Ok((attempts, None))
            }
            Err(e) => Ok((attempts, Some(e.to_string()))),
        }
    }

    async fn call<T, F, Fut>(
        &self,
        operation: ProviderOperation,
        id: &ResourceId,
        call: F,
    ) -> (u32, std::result::Result<T, ProviderError>)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
    {
        call_with_retry(
            &self.options.retry,
            self.options.operation_timeout,
            operation,
            id,
            call,
        )
        .await
    }
}

impl std::fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("registry", &self.registry)
            .field("store", &self.store.backend_type())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDecl;
    use crate::error::StateError;
    use crate::graph::{GraphBuilder, ResourceSpec};
    use crate::planner::PlanEngine;
    use crate::provider::MemoryProvider;
    use crate::state::{MemoryStateStore, MockStateStore, ResourceState};
    use serde_json::{json, Value};

    fn decl(kind: &str, name: &str, attributes: Value, depends_on: &[&str]) -> ResourceDecl {
        ResourceDecl {
            kind: kind.to_string(),
            name: name.to_string(),
            attributes: serde_json::from_value(attributes).unwrap(),
            depends_on: depends_on.iter().map(ToString::to_string).collect(),
        }
    }

    fn trail() -> Vec<ResourceDecl> {
        vec![
            decl(
                "key-value-policy",
                "trail-policy",
                json!({ "bucket": "${object-store-bucket.trail}" }),
                &[],
            ),
            decl("object-store-bucket", "trail", json!({ "bucket": "audit-logs" }), &[]),
            decl("topic", "alerts", json!({}), &[]),
        ]
    }

    fn fast_options(concurrency: usize) -> ApplyOptions {
        ApplyOptions {
            concurrency,
            retry: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            operation_timeout: Duration::from_secs(5),
        }
    }

    struct Fixture {
        provider: Arc<MemoryProvider>,
        registry: Arc<ProviderRegistry>,
        store: Arc<MemoryStateStore>,
    }

    impl Fixture {
        fn new(provider: MemoryProvider) -> Self {
            let provider = Arc::new(provider);
            let mut registry = ProviderRegistry::new();
            for kind in ["object-store-bucket", "key-value-policy", "topic"] {
                registry.register(kind, provider.clone());
            }
            Self {
                provider,
                registry: Arc::new(registry),
                store: Arc::new(MemoryStateStore::new()),
            }
        }

        async fn plan(&self, decls: &[ResourceDecl]) -> ChangeSet {
            let graph = GraphBuilder::default().build(decls).unwrap();
            PlanEngine::new(&self.registry, self.store.as_ref())
                .plan(&graph)
                .await
                .unwrap()
        }

        fn engine(&self, concurrency: usize) -> ApplyEngine {
            ApplyEngine::new(self.registry.clone(), self.store.clone())
                .with_options(fast_options(concurrency))
        }
    }

    fn bucket_id() -> ResourceId {
        ResourceId::new("object-store-bucket", "trail")
    }

    fn policy_id() -> ResourceId {
        ResourceId::new("key-value-policy", "trail-policy")
    }

    #[tokio::test]
    async fn test_apply_resolves_references_and_records_state() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&trail()).await.with_config_hash("h1");

        let report = fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded(), 3);

        let bucket = fx.store.get(&bucket_id()).await.unwrap().unwrap();
        let policy = fx.store.get(&policy_id()).await.unwrap().unwrap();
        assert_eq!(policy.attributes.get("bucket"), Some(&json!(bucket.external_id)));
        assert_eq!(policy.dependencies, vec![bucket_id()]);
        assert_eq!(policy.attributes_hash.len(), 64);

        let calls = fx.provider.calls().await;
        let bucket_at = calls
            .iter()
            .position(|c| c.operation == ProviderOperation::Create && c.id == bucket_id());
        let policy_at = calls
            .iter()
            .position(|c| c.operation == ProviderOperation::Create && c.id == policy_id());
        assert!(bucket_at < policy_at);

        let history = fx.store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].config_hash, "h1");
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn test_second_apply_makes_no_provider_mutations() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&trail()).await;
        fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();
        let mutations = fx.provider.mutation_count().await;

        let plan = fx.plan(&trail()).await;
        assert!(plan.is_empty());
        let report = fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(fx.provider.mutation_count().await, mutations);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_dependents_only() {
        let fx = Fixture::new(MemoryProvider::new());
        fx.provider
            .fail_always(
                ProviderOperation::Create,
                &bucket_id(),
                ProviderError::permanent("name taken"),
            )
            .await;
        let plan = fx.plan(&trail()).await;

        let report = fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.get(&bucket_id()).unwrap().status, OutcomeStatus::Failed);
        assert_eq!(report.get(&bucket_id()).unwrap().attempts, 1);
        assert_eq!(
            report.get(&policy_id()).unwrap().status,
            OutcomeStatus::SkippedDueToDependency
        );
        assert_eq!(
            report.get(&ResourceId::new("topic", "alerts")).unwrap().status,
            OutcomeStatus::Succeeded
        );
        assert_eq!(
            fx.provider.call_count(ProviderOperation::Create, &policy_id()).await,
            0
        );
        assert!(fx.store.get(&policy_id()).await.unwrap().is_none());
        assert!(!fx.store.history().await.unwrap()[0].success);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fx = Fixture::new(MemoryProvider::new());
        fx.provider
            .script_failures(
                ProviderOperation::Create,
                &bucket_id(),
                [
                    ProviderError::transient("throttled"),
                    ProviderError::transient("throttled"),
                ],
            )
            .await;
        let plan = fx.plan(&trail()).await;

        let report = fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.get(&bucket_id()).unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let fx = Fixture::new(MemoryProvider::new().with_latency(Duration::from_millis(20)));
        let decls: Vec<ResourceDecl> = (0..6)
            .map(|i| decl("topic", &format!("t{i}"), json!({}), &[]))
            .collect();
        let plan = fx.plan(&decls).await;

        let report = fx.engine(2).apply(&plan, CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert!(fx.provider.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_sequential_follows_change_set_order() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&trail()).await;

        fx.engine(1).apply(&plan, CancellationToken::new()).await.unwrap();

        let created: Vec<ResourceId> = fx
            .provider
            .calls()
            .await
            .into_iter()
            .filter(|c| c.operation == ProviderOperation::Create)
            .map(|c| c.id)
            .collect();
        let planned: Vec<ResourceId> = plan.entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(created, planned);
        assert_eq!(fx.provider.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_finish() {
        let fx = Fixture::new(MemoryProvider::new().with_latency(Duration::from_millis(100)));
        let decls = vec![
            decl("topic", "a", json!({}), &[]),
            decl("topic", "b", json!({}), &["topic.a"]),
            decl("topic", "c", json!({}), &["topic.b"]),
        ];
        let plan = fx.plan(&decls).await;

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let report = fx.engine(4).apply(&plan, token).await.unwrap();

        let status = |name: &str| report.get(&ResourceId::new("topic", name)).unwrap().status;
        assert_eq!(status("a"), OutcomeStatus::Succeeded);
        assert_eq!(status("b"), OutcomeStatus::Cancelled);
        assert_eq!(status("c"), OutcomeStatus::Cancelled);
        assert!(fx.store.get(&ResourceId::new("topic", "a")).await.unwrap().is_some());
        assert_eq!(fx.store.history().await.unwrap()[0].cancelled, 2);
    }

    #[tokio::test]
    async fn test_failure_during_cancellation_still_skips_dependents() {
        let fx = Fixture::new(MemoryProvider::new().with_latency(Duration::from_millis(60)));
        fx.provider
            .fail_always(
                ProviderOperation::Create,
                &bucket_id(),
                ProviderError::permanent("name taken"),
            )
            .await;
        let plan = fx.plan(&trail()).await;
        assert_eq!(plan.entries[0].id, bucket_id());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let report = fx.engine(1).apply(&plan, token).await.unwrap();

        assert_eq!(report.get(&bucket_id()).unwrap().status, OutcomeStatus::Failed);
        assert_eq!(
            report.get(&policy_id()).unwrap().status,
            OutcomeStatus::SkippedDueToDependency
        );
        assert_eq!(
            report.get(&ResourceId::new("topic", "alerts")).unwrap().status,
            OutcomeStatus::Cancelled
        );
        assert_eq!(report.cancelled(), 1);
    }

    #[tokio::test]
    async fn test_orphan_kept_when_dependent_update_fails() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&trail()).await;
        fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        fx.provider
            .fail_always(
                ProviderOperation::Update,
                &policy_id(),
                ProviderError::permanent("policy locked"),
            )
            .await;
        let moved = vec![
            decl(
                "key-value-policy",
                "trail-policy",
                json!({ "bucket": "${object-store-bucket.fresh}" }),
                &[],
            ),
            decl("object-store-bucket", "fresh", json!({ "bucket": "audit-logs-2" }), &[]),
            decl("topic", "alerts", json!({}), &[]),
        ];
        let plan = fx.plan(&moved).await;
        assert_eq!(plan.get(&bucket_id()).unwrap().action, Action::Delete);

        let report = fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        assert_eq!(report.get(&policy_id()).unwrap().status, OutcomeStatus::Failed);
        assert_eq!(
            report.get(&bucket_id()).unwrap().status,
            OutcomeStatus::SkippedDueToDependency
        );
        assert_eq!(
            fx.provider.call_count(ProviderOperation::Delete, &bucket_id()).await,
            0
        );
        assert!(fx.provider.remote(&bucket_id()).await.is_some());
        assert!(fx.store.get(&bucket_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&trail()).await;
        let token = CancellationToken::new();
        token.cancel();

        let report = fx.engine(4).apply(&plan, token).await.unwrap();

        assert_eq!(report.cancelled(), 3);
        assert_eq!(fx.provider.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_destroy_removes_dependents_first() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&trail()).await;
        fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        let destroy = PlanEngine::new(&fx.registry, fx.store.as_ref())
            .plan_destroy()
            .await
            .unwrap();
        let report = fx.engine(4).apply(&destroy, CancellationToken::new()).await.unwrap();

        assert!(report.is_success());
        assert!(fx.store.list().await.unwrap().is_empty());
        let deletes: Vec<ResourceId> = fx
            .provider
            .calls()
            .await
            .into_iter()
            .filter(|c| c.operation == ProviderOperation::Delete)
            .map(|c| c.id)
            .collect();
        let policy_at = deletes.iter().position(|id| *id == policy_id());
        let bucket_at = deletes.iter().position(|id| *id == bucket_id());
        assert!(policy_at < bucket_at);
    }

    #[tokio::test]
    async fn test_missing_dependency_state_is_permanent_failure() {
        let fx = Fixture::new(MemoryProvider::new());
        let graph = GraphBuilder::default().build(&trail()).unwrap();
        let spec: &ResourceSpec = graph.get(&policy_id()).unwrap();
        let plan = ChangeSet::new(
            crate::state::RunOperation::Apply,
            vec![ChangeSetEntry {
                id: policy_id(),
                action: Action::Create,
                depends_on: Vec::new(),
                desired: Some(spec.clone()),
                prior: None,
                details: Vec::new(),
            }],
        );

        let report = fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        let outcome = report.get(&policy_id()).unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("no recorded state"));
        assert_eq!(fx.provider.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_noop_records_existing_resource_without_provider_call() {
        let fx = Fixture::new(MemoryProvider::new());
        fx.provider
            .seed(ResourceState::new(
                ResourceId::new("topic", "alerts"),
                "topic-0042",
                std::collections::BTreeMap::new(),
            ))
            .await;
        let plan = fx.plan(&[decl("topic", "alerts", json!({}), &[])]).await;
        assert_eq!(plan.noop_count(), 1);

        fx.engine(4).apply(&plan, CancellationToken::new()).await.unwrap();

        let stored = fx
            .store
            .get(&ResourceId::new("topic", "alerts"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.external_id, "topic-0042");
        assert_eq!(fx.provider.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_state_failure_aborts_run() {
        let fx = Fixture::new(MemoryProvider::new());
        let plan = fx.plan(&[decl("topic", "alerts", json!({}), &[])]).await;

        let mut store = MockStateStore::new();
        store
            .expect_put()
            .times(1)
            .returning(|_| Err(RiggingError::State(StateError::io("disk full"))));
        store.expect_append_history().never();

        let engine = ApplyEngine::new(fx.registry.clone(), Arc::new(store))
            .with_options(fast_options(4));
        let err = engine.apply(&plan, CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, RiggingError::State(StateError::Io { .. })));
    }
}
