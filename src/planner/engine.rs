//! Change-set construction.
//!
//! Walks the graph in dependency order, reads observed state through each
//! resource's provider, and classifies every resource. References are
//! compared against a prediction of what each dependency will look like
//! after apply, so a change upstream shows up as a change downstream only
//! when the referenced value actually moves.
//!
//! Reads go through the same timeout and retry policy as apply. A resource
//! that is no longer declared is deleted only after every declared resource
//! that last depended on it has been converged.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::apply::{call_with_retry, ApplyOptions, RetryPolicy};
use crate::error::{PlanError, Result};
use crate::graph::{topological_sort, Graph, ResourceId, ResourceRef, ResourceSpec};
use crate::provider::{ProviderOperation, ProviderRegistry};
use crate::state::{ResourceState, RunOperation, StateStore};

use super::diff::{DiffDetail, DiffEngine};
use super::plan::{Action, ChangeSet, ChangeSetEntry};

/// What a dependency will look like once its own entry has been applied.
#[derive(Debug)]
enum Prediction {
    /// Values are known now.
    Known(ResourceState),
    /// The resource does not exist yet.
    Unknown,
}

/// Computes change sets from a graph, the state store, and providers.
pub struct PlanEngine<'a> {
    registry: &'a ProviderRegistry,
    store: &'a dyn StateStore,
    diff: DiffEngine,
    retry: RetryPolicy,
    read_timeout: Duration,
}

impl<'a> PlanEngine<'a> {
    /// Creates a plan engine.
    #[must_use]
    pub fn new(registry: &'a ProviderRegistry, store: &'a dyn StateStore) -> Self {
        Self {
            registry,
            store,
            diff: DiffEngine::new(),
            retry: RetryPolicy::default(),
            read_timeout: ApplyOptions::default().operation_timeout,
        }
    }

    /// Uses the retry policy and per-call timeout of `options` for reads.
    #[must_use]
    pub const fn with_options(mut self, options: &ApplyOptions) -> Self {
        self.retry = options.retry;
        self.read_timeout = options.operation_timeout;
        self
    }

    /// Plans the changes that converge observed state to `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if a kind has no provider, a provider read fails
    /// permanently or runs out of retries, or the state store cannot be read.
    pub async fn plan(&self, graph: &Graph) -> Result<ChangeSet> {
        info!("Planning {} resources", graph.len());
        self.registry.ensure_kinds(graph)?;

        let order = graph.topological_order()?;
        let mut predictions: HashMap<ResourceId, Prediction> = HashMap::new();
        let mut entries = Vec::with_capacity(order.len());
        let mut last_applied: HashMap<ResourceId, Vec<ResourceId>> = HashMap::new();

        for id in &order {
            let Some(spec) = graph.get(id) else {
                continue;
            };

            let recorded = self.store.get(id).await?;
            let provider = self.registry.lookup(id.kind())?;
            let (_, observed) = call_with_retry(
                &self.retry,
                self.read_timeout,
                ProviderOperation::Read,
                id,
                || provider.read(id, recorded.as_ref()),
            )
            .await;
            let observed = observed.map_err(|source| PlanError::Provider {
                id: id.to_string(),
                source,
            })?;

            if let Some(state) = &recorded {
                last_applied.insert(id.clone(), state.dependencies.clone());
            }

            let lookup = |r: &ResourceRef| match predictions.get(&r.target) {
                Some(Prediction::Known(state)) => state.output(&r.attribute),
                _ => None,
            };

            let (entry, prediction) = match observed {
                None => {
                    if recorded.is_some() {
                        debug!("{id} is recorded but no longer exists, recreating");
                    }
                    let details = self.diff.describe_create(spec, &lookup);
                    (
                        Self::entry(spec, Action::Create, None, details),
                        Prediction::Unknown,
                    )
                }
                Some(observed) => {
                    let details = self.diff.compare(spec, &observed, &lookup);
                    if details.is_empty() {
                        debug!("{id} is up to date");
                        let prediction = Prediction::Known(observed.clone());
                        (
                            Self::entry(spec, Action::NoOp, Some(observed), details),
                            prediction,
                        )
                    } else {
                        debug!("{id} needs update ({} attributes)", details.len());
                        let prediction = Prediction::Known(predict_update(&observed, &details));
                        (
                            Self::entry(spec, Action::Update, Some(observed), details),
                            prediction,
                        )
                    }
                }
            };

            predictions.insert(id.clone(), prediction);
            entries.push(entry);
        }

        let orphaned: Vec<ResourceState> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|state| !graph.contains(&state.id))
            .collect();

        let mut all = self.delete_entries(orphaned, &last_applied)?;
        all.extend(entries);

        let change_set = ChangeSet::new(RunOperation::Apply, dependency_order(all)?);
        change_set.verify_order()?;

        info!("Plan: {}", change_set.summary());
        Ok(change_set)
    }

    /// Plans the deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorded kind has no provider or the state store
    /// cannot be read.
    pub async fn plan_destroy(&self) -> Result<ChangeSet> {
        let recorded = self.store.list().await?;
        info!("Planning destruction of {} resources", recorded.len());

        let entries = self.delete_entries(recorded, &HashMap::new())?;
        let change_set = ChangeSet::new(RunOperation::Destroy, entries);
        change_set.verify_order()?;
        Ok(change_set)
    }

    fn entry(
        spec: &ResourceSpec,
        action: Action,
        prior: Option<ResourceState>,
        details: Vec<DiffDetail>,
    ) -> ChangeSetEntry {
        ChangeSetEntry {
            id: spec.id().clone(),
            action,
            depends_on: spec.dependencies().to_vec(),
            desired: Some(spec.clone()),
            prior,
            details,
        }
    }

    /// Orders deletions so dependents go before their dependencies.
    ///
    /// `survivors` maps each still-declared resource to the dependencies it
    /// was last applied with; a deletion waits for every survivor that still
    /// points at it.
    fn delete_entries(
        &self,
        states: Vec<ResourceState>,
        survivors: &HashMap<ResourceId, Vec<ResourceId>>,
    ) -> Result<Vec<ChangeSetEntry>> {
        for state in &states {
            self.registry.lookup(state.id.kind())?;
        }

        let ids: Vec<ResourceId> = states.iter().map(|s| s.id.clone()).collect();
        let by_id: HashMap<&ResourceId, &ResourceState> =
            states.iter().map(|s| (&s.id, s)).collect();

        let mut order = topological_sort(&ids, |id| {
            by_id
                .get(id)
                .copied()
                .map(|s| s.dependencies.as_slice())
                .unwrap_or_default()
        })?;
        order.reverse();

        let entries = order
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|state| {
                let mut depends_on: Vec<ResourceId> = order
                    .iter()
                    .filter(|other| {
                        by_id
                            .get(other)
                            .is_some_and(|s| s.dependencies.contains(&state.id))
                    })
                    .cloned()
                    .collect();

                let mut holders: Vec<&ResourceId> = survivors
                    .iter()
                    .filter(|(_, deps)| deps.contains(&state.id))
                    .map(|(id, _)| id)
                    .collect();
                holders.sort();
                depends_on.extend(holders.into_iter().cloned());

                debug!("{} is no longer declared, deleting", state.id);
                ChangeSetEntry {
                    id: state.id.clone(),
                    action: Action::Delete,
                    depends_on,
                    desired: None,
                    prior: Some((*state).clone()),
                    details: Vec::new(),
                }
            })
            .collect();

        Ok(entries)
    }
}

/// Stable reordering of `entries` so every entry follows its `depends_on`.
/// Entries that are ready at the same time keep their relative order.
fn dependency_order(entries: Vec<ChangeSetEntry>) -> Result<Vec<ChangeSetEntry>> {
    let ids: Vec<ResourceId> = entries.iter().map(|e| e.id.clone()).collect();
    let order = {
        let by_id: HashMap<&ResourceId, &ChangeSetEntry> =
            entries.iter().map(|e| (&e.id, e)).collect();
        topological_sort(&ids, |id| {
            by_id
                .get(id)
                .copied()
                .map(|e| e.depends_on.as_slice())
                .unwrap_or_default()
        })?
    };

    let mut by_id: HashMap<ResourceId, ChangeSetEntry> =
        entries.into_iter().map(|e| (e.id.clone(), e)).collect();
    Ok(order.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Observed state overlaid with the desired values of changed attributes.
/// Values known only after apply are removed so lookups report them unknown.
fn predict_update(observed: &ResourceState, details: &[DiffDetail]) -> ResourceState {
    let mut predicted = observed.clone();
    for detail in details {
        match &detail.new_value {
            Some(value) => {
                predicted
                    .attributes
                    .insert(detail.field.clone(), Value::clone(value));
            }
            None => {
                predicted.attributes.remove(&detail.field);
            }
        }
    }
    predicted
}

impl std::fmt::Debug for PlanEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanEngine")
            .field("registry", self.registry)
            .field("store", &self.store.backend_type())
            .finish_non_exhaustive()
    }
}
