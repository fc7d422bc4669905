//! In-memory provider with call recording and scripted failures.
//!
//! Keeps "remote" resources in a map. Tests use it to count provider calls,
//! inject transient or permanent failures per operation, simulate drift, and
//! add latency for concurrency, cancellation and timeout scenarios. Mutating
//! calls report scripted failures only after their latency has elapsed.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::state::ResourceState;

use super::capability::{ProviderCapability, ProviderOperation, ResolvedSpec};

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Operation invoked.
    pub operation: ProviderOperation,
    /// Target resource.
    pub id: ResourceId,
}

type CallKey = (ProviderOperation, ResourceId);

/// Provider backed by an in-process map.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    resources: Mutex<BTreeMap<ResourceId, ResourceState>>,
    calls: Mutex<Vec<ProviderCall>>,
    scripted: Mutex<HashMap<CallKey, VecDeque<ProviderError>>>,
    sticky: Mutex<HashMap<CallKey, ProviderError>>,
    latency: Option<Duration>,
    read_latency: Option<Duration>,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed delay to every mutating call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Adds a fixed delay to every read.
    #[must_use]
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    /// Queues failures returned by the next calls of `operation` on `id`.
    pub async fn script_failures(
        &self,
        operation: ProviderOperation,
        id: &ResourceId,
        failures: impl IntoIterator<Item = ProviderError>,
    ) {
        self.scripted
            .lock()
            .await
            .entry((operation, id.clone()))
            .or_default()
            .extend(failures);
    }

    /// Makes every call of `operation` on `id` fail with `error`.
    pub async fn fail_always(&self, operation: ProviderOperation, id: &ResourceId, error: ProviderError) {
        self.sticky.lock().await.insert((operation, id.clone()), error);
    }

    /// Places a resource in the "remote" map without a provider call.
    pub async fn seed(&self, state: ResourceState) {
        self.resources.lock().await.insert(state.id.clone(), state);
    }

    /// Changes one attribute of a remote resource out of band.
    pub async fn set_remote_attribute(&self, id: &ResourceId, key: &str, value: Value) {
        if let Some(state) = self.resources.lock().await.get_mut(id) {
            state.attributes.insert(key.to_string(), value);
        }
    }

    /// Removes a remote resource out of band.
    pub async fn remove_remote(&self, id: &ResourceId) {
        self.resources.lock().await.remove(id);
    }

    /// Returns the remote state of a resource.
    pub async fn remote(&self, id: &ResourceId) -> Option<ResourceState> {
        self.resources.lock().await.get(id).cloned()
    }

    /// Returns every recorded call, in call order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().await.clone()
    }

    /// Counts calls of `operation` on `id`.
    pub async fn call_count(&self, operation: ProviderOperation, id: &ResourceId) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.operation == operation && c.id == *id)
            .count()
    }

    /// Counts mutating calls (create, update, delete) on any resource.
    pub async fn mutation_count(&self) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.operation != ProviderOperation::Read)
            .count()
    }

    /// Returns the highest number of concurrent mutating calls observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Records a call.
    async fn record(&self, operation: ProviderOperation, id: &ResourceId) {
        self.calls.lock().await.push(ProviderCall {
            operation,
            id: id.clone(),
        });
    }

    /// Returns the scripted failure for a call, if any.
    async fn scripted(&self, operation: ProviderOperation, id: &ResourceId) -> Result<(), ProviderError> {
        let key = (operation, id.clone());
        if let Some(error) = self.sticky.lock().await.get(&key) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .scripted
            .lock()
            .await
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(())
    }

    /// Simulates the remote side doing work.
    async fn work(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderCapability for MemoryProvider {
    async fn create(&self, spec: &ResolvedSpec) -> Result<ResourceState, ProviderError> {
        self.record(ProviderOperation::Create, &spec.id).await;
        self.work().await;
        self.scripted(ProviderOperation::Create, &spec.id).await?;

        let mut resources = self.resources.lock().await;
        if resources.contains_key(&spec.id) {
            return Err(ProviderError::permanent(format!("{} already exists", spec.id)));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let external_id = format!("{}-{n:04}", spec.id.kind());
        let mut attributes = spec.attributes.clone();
        attributes.insert(
            String::from("urn"),
            Value::String(format!("urn:memory:{}:{external_id}", spec.id.kind())),
        );

        let state = ResourceState::new(spec.id.clone(), external_id, attributes);
        resources.insert(spec.id.clone(), state.clone());
        Ok(state)
    }

    async fn read(
        &self,
        id: &ResourceId,
        _recorded: Option<&ResourceState>,
    ) -> Result<Option<ResourceState>, ProviderError> {
        self.record(ProviderOperation::Read, id).await;
        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }
        self.scripted(ProviderOperation::Read, id).await?;
        Ok(self.resources.lock().await.get(id).cloned())
    }

    async fn update(
        &self,
        spec: &ResolvedSpec,
        current: &ResourceState,
    ) -> Result<ResourceState, ProviderError> {
        self.record(ProviderOperation::Update, &spec.id).await;
        self.work().await;
        self.scripted(ProviderOperation::Update, &spec.id).await?;

        let mut resources = self.resources.lock().await;
        let Some(existing) = resources.get_mut(&spec.id) else {
            return Err(ProviderError::permanent(format!(
                "{} ({}) does not exist",
                spec.id, current.external_id
            )));
        };

        let urn = existing.attributes.get("urn").cloned();
        existing.attributes = spec.attributes.clone();
        if let Some(urn) = urn {
            existing.attributes.insert(String::from("urn"), urn);
        }
        existing.updated_at = chrono::Utc::now();
        Ok(existing.clone())
    }

    async fn delete(&self, current: &ResourceState) -> Result<(), ProviderError> {
        self.record(ProviderOperation::Delete, &current.id).await;
        self.work().await;
        self.scripted(ProviderOperation::Delete, &current.id).await?;
        self.resources.lock().await.remove(&current.id);
        Ok(())
    }
}
