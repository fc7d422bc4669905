//! End-to-end reconciliation against the sandbox provider and the local
//! state store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rigging::apply::{ApplyEngine, ApplyOptions, OutcomeStatus, RetryPolicy};
use rigging::config::{ConfigParser, Document};
use rigging::error::{ConfigError, ProviderError, RiggingError};
use rigging::graph::{Graph, GraphBuilder, ResourceId};
use rigging::planner::{Action, ChangeSet, PlanEngine};
use rigging::provider::{MemoryProvider, ProviderOperation, ProviderRegistry};
use rigging::state::{LocalStateStore, RunOperation, StateStore};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const AUDIT_DOCUMENT: &str = r#"
settings:
  apply:
    concurrency: 2
    max_retries: 2
    initial_backoff_ms: 1
    max_backoff_ms: 5

providers:
  - kind: object-store-bucket
  - kind: key-value-policy
  - kind: notification-topic

variables:
  bucket_name: audit-trail-logs

resources:
  - kind: key-value-policy
    name: trail-policy
    attributes:
      bucket: "${object-store-bucket.trail}"
      resource: "${object-store-bucket.trail.urn}/*"
      effect: allow
  - kind: object-store-bucket
    name: trail
    attributes:
      bucket: "${var.bucket_name}"
      versioning: true
  - kind: notification-topic
    name: alerts
    attributes:
      display_name: audit alerts
"#;

fn id(s: &str) -> ResourceId {
    ResourceId::parse(s).unwrap()
}

fn parse(content: &str) -> Document {
    ConfigParser::new().parse_yaml(content, None).unwrap()
}

fn build(document: &Document) -> Graph {
    GraphBuilder::new(document.variables.clone())
        .build(&document.resources)
        .unwrap()
}

struct Harness {
    document: Document,
    graph: Graph,
    registry: Arc<ProviderRegistry>,
    store: Arc<LocalStateStore>,
}

impl Harness {
    async fn open(dir: &Path, content: &str) -> Self {
        let document = parse(content);
        let graph = build(&document);
        let registry = Arc::new(ProviderRegistry::from_bindings(&document.providers, dir));
        let store = Arc::new(LocalStateStore::open(dir).await.unwrap());
        Self {
            document,
            graph,
            registry,
            store,
        }
    }

    async fn plan(&self) -> ChangeSet {
        PlanEngine::new(&self.registry, self.store.as_ref())
            .plan(&self.graph)
            .await
            .unwrap()
    }

    fn engine(&self) -> ApplyEngine {
        let store: Arc<dyn StateStore> = self.store.clone();
        ApplyEngine::new(self.registry.clone(), store)
            .with_options(ApplyOptions::from_settings(&self.document.settings.apply))
    }
}

fn actions(plan: &ChangeSet) -> Vec<(String, Action)> {
    plan.entries
        .iter()
        .map(|e| (e.id.to_string(), e.action))
        .collect()
}

#[tokio::test]
async fn test_apply_converges_and_replan_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::open(dir.path(), AUDIT_DOCUMENT).await;

    let plan = harness.plan().await;
    assert_eq!(plan.create_count(), 3);
    let order: Vec<String> = plan.entries.iter().map(|e| e.id.to_string()).collect();
    let bucket_at = order.iter().position(|s| s == "object-store-bucket.trail").unwrap();
    let policy_at = order.iter().position(|s| s == "key-value-policy.trail-policy").unwrap();
    assert!(bucket_at < policy_at);

    let report = harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.succeeded(), 3);

    let bucket = harness
        .store
        .get(&id("object-store-bucket.trail"))
        .await
        .unwrap()
        .unwrap();
    let policy = harness
        .store
        .get(&id("key-value-policy.trail-policy"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bucket.attributes.get("bucket"), Some(&json!("audit-trail-logs")));
    assert_eq!(policy.attributes.get("bucket"), Some(&json!(bucket.external_id)));
    let urn = bucket.attributes.get("urn").and_then(|v| v.as_str()).unwrap();
    assert_eq!(policy.attributes.get("resource"), Some(&json!(format!("{urn}/*"))));
    assert_eq!(policy.dependencies, vec![id("object-store-bucket.trail")]);

    let replan = harness.plan().await;
    assert!(!replan.has_changes());
    assert_eq!(replan.noop_count(), 3);

    let history = harness.store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].operation, RunOperation::Apply);
}

#[tokio::test]
async fn test_permanent_failure_skips_dependents_only() {
    let dir = tempfile::tempdir().unwrap();
    let content = AUDIT_DOCUMENT.replace("versioning: true", "_fail: permanent");
    let harness = Harness::open(dir.path(), &content).await;

    let plan = harness.plan().await;
    let report = harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.is_success());
    let bucket = report.get(&id("object-store-bucket.trail")).unwrap();
    assert_eq!(bucket.status, OutcomeStatus::Failed);
    assert_eq!(bucket.attempts, 1);
    assert_eq!(
        report.get(&id("key-value-policy.trail-policy")).unwrap().status,
        OutcomeStatus::SkippedDueToDependency
    );
    assert_eq!(
        report.get(&id("notification-topic.alerts")).unwrap().status,
        OutcomeStatus::Succeeded
    );

    let recorded = harness.store.list().await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].id, id("notification-topic.alerts"));
}

#[tokio::test]
async fn test_partial_apply_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let failing = AUDIT_DOCUMENT.replace("versioning: true", "_fail: permanent");

    {
        let harness = Harness::open(dir.path(), &failing).await;
        let plan = harness.plan().await;
        harness
            .engine()
            .apply(&plan, CancellationToken::new())
            .await
            .unwrap();
    }

    // A fresh process sees what the first one created and creates the rest.
    let harness = Harness::open(dir.path(), AUDIT_DOCUMENT).await;
    let plan = harness.plan().await;
    assert_eq!(
        plan.get(&id("notification-topic.alerts")).unwrap().action,
        Action::NoOp
    );
    assert_eq!(plan.create_count(), 2);

    let report = harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(!harness.plan().await.has_changes());
    assert_eq!(harness.store.history().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_removed_declaration_is_deleted_before_creates() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::open(dir.path(), AUDIT_DOCUMENT).await;
    let plan = harness.plan().await;
    harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();

    let trimmed = r#"
providers:
  - kind: object-store-bucket
  - kind: key-value-policy
  - kind: notification-topic
  - kind: log-group
resources:
  - kind: notification-topic
    name: alerts
    attributes:
      display_name: audit alerts
  - kind: log-group
    name: trail-logs
    attributes:
      retention_days: 30
"#;
    let harness = Harness::open(dir.path(), trimmed).await;
    let plan = harness.plan().await;

    assert_eq!(
        actions(&plan),
        vec![
            ("key-value-policy.trail-policy".to_string(), Action::Delete),
            ("object-store-bucket.trail".to_string(), Action::Delete),
            ("notification-topic.alerts".to_string(), Action::NoOp),
            ("log-group.trail-logs".to_string(), Action::Create),
        ]
    );

    let report = harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(!dir
        .path()
        .join("sandbox")
        .join("object-store-bucket")
        .join("trail.json")
        .exists());
    assert_eq!(harness.store.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_replaced_bucket_is_deleted_after_policy_moves() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::open(dir.path(), AUDIT_DOCUMENT).await;
    let plan = harness.plan().await;
    harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();

    let moved = r#"
providers:
  - kind: object-store-bucket
  - kind: key-value-policy
  - kind: notification-topic
resources:
  - kind: key-value-policy
    name: trail-policy
    attributes:
      bucket: "${object-store-bucket.archive}"
      resource: "${object-store-bucket.archive.urn}/*"
      effect: allow
  - kind: object-store-bucket
    name: archive
    attributes:
      bucket: audit-archive-logs
      versioning: true
  - kind: notification-topic
    name: alerts
    attributes:
      display_name: audit alerts
"#;
    let harness = Harness::open(dir.path(), moved).await;
    let plan = harness.plan().await;

    assert_eq!(
        actions(&plan),
        vec![
            ("object-store-bucket.archive".to_string(), Action::Create),
            ("key-value-policy.trail-policy".to_string(), Action::Update),
            ("object-store-bucket.trail".to_string(), Action::Delete),
            ("notification-topic.alerts".to_string(), Action::NoOp),
        ]
    );
    assert_eq!(
        plan.get(&id("object-store-bucket.trail")).unwrap().depends_on,
        vec![id("key-value-policy.trail-policy")]
    );
    assert!(plan.verify_order().is_ok());

    let report = harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    let archive = harness
        .store
        .get(&id("object-store-bucket.archive"))
        .await
        .unwrap()
        .unwrap();
    let policy = harness
        .store
        .get(&id("key-value-policy.trail-policy"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(policy.attributes.get("bucket"), Some(&json!(archive.external_id)));
    assert_eq!(policy.dependencies, vec![id("object-store-bucket.archive")]);
    assert!(harness
        .store
        .get(&id("object-store-bucket.trail"))
        .await
        .unwrap()
        .is_none());
    assert!(harness.plan().await.entries.iter().all(|e| e.action == Action::NoOp));
}

#[tokio::test]
async fn test_destroy_deletes_dependents_first() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::open(dir.path(), AUDIT_DOCUMENT).await;
    let plan = harness.plan().await;
    harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();

    let destroy = PlanEngine::new(&harness.registry, harness.store.as_ref())
        .plan_destroy()
        .await
        .unwrap();
    assert_eq!(destroy.operation, RunOperation::Destroy);
    assert_eq!(destroy.delete_count(), 3);
    let order: Vec<String> = destroy.entries.iter().map(|e| e.id.to_string()).collect();
    let bucket_at = order.iter().position(|s| s == "object-store-bucket.trail").unwrap();
    let policy_at = order.iter().position(|s| s == "key-value-policy.trail-policy").unwrap();
    assert!(policy_at < bucket_at);

    let report = harness
        .engine()
        .apply(&destroy, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(harness.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_drift_is_detected_and_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::open(dir.path(), AUDIT_DOCUMENT).await;
    let plan = harness.plan().await;
    harness
        .engine()
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();

    // Delete the bucket out of band.
    std::fs::remove_file(
        dir.path()
            .join("sandbox")
            .join("object-store-bucket")
            .join("trail.json"),
    )
    .unwrap();

    let drift = harness.plan().await;
    assert_eq!(
        drift.get(&id("object-store-bucket.trail")).unwrap().action,
        Action::Create
    );
    assert_eq!(
        drift.get(&id("key-value-policy.trail-policy")).unwrap().action,
        Action::Update
    );

    let report = harness
        .engine()
        .apply(&drift, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
    assert!(!harness.plan().await.has_changes());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let mut registry = ProviderRegistry::new();
    registry.register("queue", provider.clone());
    let registry = Arc::new(registry);
    let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::open(dir.path()).await.unwrap());

    let document = parse(
        r#"
resources:
  - kind: queue
    name: jobs
    attributes:
      visibility_timeout: 30
"#,
    );
    let graph = build(&document);
    let queue = id("queue.jobs");
    provider
        .script_failures(
            ProviderOperation::Create,
            &queue,
            [
                ProviderError::transient("throttled"),
                ProviderError::transient("throttled"),
            ],
        )
        .await;

    let plan = PlanEngine::new(&registry, store.as_ref())
        .plan(&graph)
        .await
        .unwrap();
    let report = ApplyEngine::new(registry.clone(), store.clone())
        .with_options(ApplyOptions {
            concurrency: 1,
            retry: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            operation_timeout: Duration::from_secs(5),
        })
        .apply(&plan, CancellationToken::new())
        .await
        .unwrap();

    let outcome = report.get(&queue).unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(provider.call_count(ProviderOperation::Create, &queue).await, 3);
    assert!(store.get(&queue).await.unwrap().is_some());
}

#[tokio::test]
async fn test_hung_read_fails_planning_within_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemoryProvider::new().with_read_latency(Duration::from_secs(3600)));
    let mut registry = ProviderRegistry::new();
    registry.register("queue", provider.clone());
    let store = LocalStateStore::open(dir.path()).await.unwrap();

    let document = parse(
        r#"
resources:
  - kind: queue
    name: jobs
    attributes:
      visibility_timeout: 30
"#,
    );
    let graph = build(&document);
    let options = ApplyOptions {
        concurrency: 1,
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        operation_timeout: Duration::from_millis(25),
    };

    let planned = tokio::time::timeout(
        Duration::from_secs(5),
        PlanEngine::new(&registry, &store)
            .with_options(&options)
            .plan(&graph),
    )
    .await
    .expect("planning returned while the read was still hanging");

    let err = planned.unwrap_err();
    assert!(matches!(err, RiggingError::Plan(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(
        provider.call_count(ProviderOperation::Read, &id("queue.jobs")).await,
        3
    );
}

#[tokio::test]
async fn test_cancelled_run_records_completed_work() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MemoryProvider::new().with_latency(Duration::from_millis(50)));
    let mut registry = ProviderRegistry::new();
    registry.register("queue", provider.clone());
    let registry = Arc::new(registry);
    let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::open(dir.path()).await.unwrap());

    let document = parse(
        r#"
resources:
  - kind: queue
    name: a
  - kind: queue
    name: b
    depends_on: [queue.a]
  - kind: queue
    name: c
    depends_on: [queue.b]
"#,
    );
    let graph = build(&document);
    let plan = PlanEngine::new(&registry, store.as_ref())
        .plan(&graph)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let report = ApplyEngine::new(registry.clone(), store.clone())
        .with_options(ApplyOptions {
            concurrency: 1,
            ..ApplyOptions::default()
        })
        .apply(&plan, cancel)
        .await
        .unwrap();

    assert_eq!(report.get(&id("queue.a")).unwrap().status, OutcomeStatus::Succeeded);
    assert_eq!(report.get(&id("queue.b")).unwrap().status, OutcomeStatus::Cancelled);
    assert_eq!(report.get(&id("queue.c")).unwrap().status, OutcomeStatus::Cancelled);

    let recorded = store.list().await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].id, id("queue.a"));

    let history = store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cancelled, 2);
    assert!(!history[0].success);
}

#[test]
fn test_unresolved_reference_is_rejected_before_planning() {
    let document = parse(
        r#"
resources:
  - kind: key-value-policy
    name: orphan
    attributes:
      bucket: "${object-store-bucket.missing}"
"#,
    );

    let err = GraphBuilder::new(document.variables.clone())
        .build(&document.resources)
        .unwrap_err();
    assert!(matches!(
        err,
        RiggingError::Config(ConfigError::UnresolvedReference { ref target, .. })
            if target == "object-store-bucket.missing"
    ));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_cycle_is_rejected() {
    let document = parse(
        r#"
resources:
  - kind: queue
    name: a
    attributes:
      peer: "${queue.b.arn}"
  - kind: queue
    name: b
    attributes:
      peer: "${queue.a.arn}"
"#,
    );

    let err = GraphBuilder::new(document.variables.clone())
        .build(&document.resources)
        .unwrap_err();
    assert!(matches!(err, RiggingError::Config(ConfigError::Cycle { .. })));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_unknown_kind_fails_planning() {
    let dir = tempfile::tempdir().unwrap();
    let document = parse(
        r#"
providers:
  - kind: object-store-bucket
resources:
  - kind: dns-record
    name: www
"#,
    );
    let graph = build(&document);
    let registry = ProviderRegistry::from_bindings(&document.providers, dir.path());
    let store = LocalStateStore::open(dir.path()).await.unwrap();

    let err = PlanEngine::new(&registry, &store).plan(&graph).await.unwrap_err();
    assert!(matches!(err, RiggingError::Registry(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(store.list().await.unwrap().is_empty());
}
