//! Valkey controller implementation
//!
//! One reconcile fetches the instance, runs the flow, then writes back at most
//! one thing: the finalizer set if it changed, otherwise the status if it
//! changed. An unchanged instance is polled again after the requeue interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use valkey_common::crd::{InstanceRef, Valkey, ValkeyStatus};
use valkey_common::kube_utils::same_finalizers;
use valkey_common::validation::Validator;
use valkey_common::{Error, FIELD_MANAGER};
use valkey_service::{ServiceConfig, ValkeyService};

use crate::config::OperatorConfig;
use crate::flow::{InstanceFlow, ValkeyFlow};

/// Requeue delay after a retryable reconcile error
pub const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

const KIND: &str = "Valkey";

/// Trait abstracting reads and writes of the Valkey record itself
///
/// Writes carry the resourceVersion of the instance they were computed
/// from, so a concurrent change makes them fail instead of clobbering it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceClient: Send + Sync {
    /// Fetch an instance; [`Error::NotFound`] when it does not exist
    async fn get(&self, instance: &InstanceRef) -> Result<Valkey, Error>;

    /// Replace the finalizer list of `instance`
    async fn replace_finalizers(&self, instance: &Valkey, finalizers: &[String])
        -> Result<(), Error>;

    /// Replace the status of `instance`
    async fn replace_status(&self, instance: &Valkey, status: &ValkeyStatus) -> Result<(), Error>;
}

/// Merge patch replacing the finalizer list, pinned to the instance's version
pub fn finalizers_patch(instance: &Valkey, finalizers: &[String]) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": instance.resource_version(),
            "finalizers": finalizers,
        }
    })
}

/// Merge patch replacing the status, pinned to the instance's version
///
/// Every status field is present in the patch. An absent `error` is sent as
/// `null`, which removes a message left by an earlier `failed` status.
pub fn status_patch(instance: &Valkey, status: &ValkeyStatus) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": instance.resource_version() },
        "status": {
            "status": status.status,
            "error": status.error,
            "readyReplicas": status.ready_replicas,
            "lastReconcileAt": status.last_reconcile_at,
        },
    })
}

/// Real Kubernetes client implementation
pub struct KubeInstanceClient {
    client: Client,
}

impl KubeInstanceClient {
    /// Create a new KubeInstanceClient wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Valkey> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl InstanceClient for KubeInstanceClient {
    async fn get(&self, instance: &InstanceRef) -> Result<Valkey, Error> {
        self.api(&instance.namespace)
            .get(&instance.name)
            .await
            .map_err(|e| Error::from_kube(KIND, &instance.namespace, &instance.name, e))
    }

    async fn replace_finalizers(
        &self,
        instance: &Valkey,
        finalizers: &[String],
    ) -> Result<(), Error> {
        let target = instance.instance_ref();
        let patch = finalizers_patch(instance, finalizers);
        self.api(&target.namespace)
            .patch(
                &target.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::from_kube(KIND, &target.namespace, &target.name, e))?;
        Ok(())
    }

    async fn replace_status(&self, instance: &Valkey, status: &ValkeyStatus) -> Result<(), Error> {
        let target = instance.instance_ref();
        let patch = status_patch(instance, status);
        self.api(&target.namespace)
            .patch_status(
                &target.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::from_kube(KIND, &target.namespace, &target.name, e))?;
        Ok(())
    }
}

/// Controller context shared by every reconcile
pub struct Context {
    /// Access to the Valkey records
    pub client: Arc<dyn InstanceClient>,
    /// Decision step
    pub flow: Arc<dyn InstanceFlow>,
    /// Delay before re-checking an instance whose status did not change
    pub requeue_interval: Duration,
}

impl Context {
    /// Create a context with the default requeue interval
    pub fn new(client: Arc<dyn InstanceClient>, flow: Arc<dyn InstanceFlow>) -> Self {
        Self {
            client,
            flow,
            requeue_interval: Duration::from_secs(valkey_common::DEFAULT_REQUEUE_INTERVAL_SECS),
        }
    }

    /// Override the steady-state requeue interval
    pub fn with_requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }

    /// Wire the real instance client, orchestration service and flow
    pub fn from_client(client: Client, config: &OperatorConfig) -> Self {
        let service = ValkeyService::new(ServiceConfig::from_client(
            client.clone(),
            Arc::new(Validator::new()),
        ));
        let flow = ValkeyFlow::new(Arc::new(service))
            .with_stopped_finalizers(config.stopped_finalizers);
        Self::new(Arc::new(KubeInstanceClient::new(client)), Arc::new(flow))
            .with_requeue_interval(config.requeue_interval)
    }
}

/// Outcome of one reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing changed; look again after the delay
    RequeueAfter(Duration),
    /// A write was made; the resulting watch event drives the next pass
    Done,
}

/// Reconcile one instance by reference
///
/// A missing instance is returned as [`Error::NotFound`], which is not
/// retryable. Flow errors are not returned; they become a `failed` status.
#[instrument(skip(ctx), fields(instance = %instance))]
pub async fn reconcile_instance(
    ctx: &Context,
    instance: &InstanceRef,
) -> Result<ReconcileAction, Error> {
    let valkey = ctx.client.get(instance).await.inspect_err(|e| {
        if e.is_not_found() {
            debug!("instance no longer exists");
        }
    })?;

    let candidate = match ctx.flow.run(&valkey).await {
        Ok(outcome) => {
            if !same_finalizers(valkey.finalizers(), &outcome.finalizers) {
                ctx.client
                    .replace_finalizers(&valkey, &outcome.finalizers)
                    .await?;
                info!(finalizers = ?outcome.finalizers, "updated finalizers");
                return Ok(ReconcileAction::Done);
            }
            outcome.status
        }
        Err(e) => {
            warn!(error = %e, "reconcile step failed");
            ValkeyStatus::failed(e.to_string(), Utc::now())
        }
    };

    let current = valkey.current_status();
    if !current.is_changed(&candidate) {
        debug!(phase = %current.status, "status unchanged");
        return Ok(ReconcileAction::RequeueAfter(ctx.requeue_interval));
    }

    let status = ValkeyStatus {
        last_reconcile_at: Some(Utc::now()),
        ..candidate
    };
    ctx.client.replace_status(&valkey, &status).await?;
    info!(
        phase = %status.status,
        ready_replicas = status.ready_replicas,
        "updated status"
    );
    Ok(ReconcileAction::Done)
}

/// Reconcile a Valkey for `kube::runtime::Controller`
pub async fn reconcile(valkey: Arc<Valkey>, ctx: Arc<Context>) -> Result<Action, Error> {
    match reconcile_instance(&ctx, &valkey.instance_ref()).await? {
        ReconcileAction::RequeueAfter(interval) => Ok(Action::requeue(interval)),
        ReconcileAction::Done => Ok(Action::await_change()),
    }
}

/// Error policy for the controller
///
/// Retryable errors are requeued after [`ERROR_REQUEUE_INTERVAL`]; anything
/// else waits for the next change to the instance.
pub fn error_policy(valkey: Arc<Valkey>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        instance = %valkey.instance_ref(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE_INTERVAL)
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::mock;
    use serde_json::Value;
    use valkey_common::crd::{InstancePhase, Resource, ValkeySpec, Volume};
    use valkey_common::VALKEY_FINALIZER;
    use valkey_service::{CreateRequest, InstanceService, ReadyState, UpdateRequest};

    use crate::flow::{FlowOutcome, MockInstanceFlow, StoppedFinalizers};

    fn sample_instance(finalizers: &[&str], status: Option<ValkeyStatus>) -> Valkey {
        Valkey {
            metadata: ObjectMeta {
                name: Some("valkey".to_string()),
                namespace: Some("default".to_string()),
                finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: ValkeySpec {
                image: "valkey/valkey".to_string(),
                replicas: 1,
                user: "root".to_string(),
                password: "root".to_string(),
                volume: Volume {
                    enabled: true,
                    storage: "512Mi".to_string(),
                },
                resource: Resource {
                    cpu: "200m".to_string(),
                    memory: "512Mi".to_string(),
                    storage: "512Mi".to_string(),
                },
            },
            status,
        }
    }

    fn target() -> InstanceRef {
        InstanceRef::new("valkey", "default")
    }

    fn outcome(status: ValkeyStatus, finalizers: &[&str]) -> FlowOutcome {
        FlowOutcome {
            status,
            finalizers: finalizers.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Records every write so tests can assert on what was persisted
    #[derive(Clone, Default)]
    struct WriteCapture {
        statuses: Arc<Mutex<Vec<ValkeyStatus>>>,
        finalizers: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl WriteCapture {
        fn statuses(&self) -> Vec<ValkeyStatus> {
            self.statuses
                .lock()
                .expect("mutex should not be poisoned")
                .clone()
        }

        fn finalizers(&self) -> Vec<Vec<String>> {
            self.finalizers
                .lock()
                .expect("mutex should not be poisoned")
                .clone()
        }

        fn write_count(&self) -> usize {
            self.statuses().len() + self.finalizers().len()
        }
    }

    /// Client returning `instance` and recording every write
    fn capturing_client(instance: Valkey) -> (MockInstanceClient, WriteCapture) {
        let capture = WriteCapture::default();
        let mut client = MockInstanceClient::new();

        client
            .expect_get()
            .returning(move |_| Ok(instance.clone()));

        let statuses = capture.statuses.clone();
        client.expect_replace_status().returning(move |_, status| {
            statuses
                .lock()
                .expect("mutex should not be poisoned")
                .push(status.clone());
            Ok(())
        });

        let finalizers = capture.finalizers.clone();
        client
            .expect_replace_finalizers()
            .returning(move |_, list| {
                finalizers
                    .lock()
                    .expect("mutex should not be poisoned")
                    .push(list.to_vec());
                Ok(())
            });

        (client, capture)
    }

    fn flow_returning(result: fn() -> Result<FlowOutcome, Error>) -> MockInstanceFlow {
        let mut flow = MockInstanceFlow::new();
        flow.expect_run().times(1).returning(move |_| result());
        flow
    }

    fn context(client: MockInstanceClient, flow: MockInstanceFlow) -> Context {
        Context::new(Arc::new(client), Arc::new(flow))
    }

    // ==========================================================================
    // Story Tests: Write protocol
    // ==========================================================================

    /// Story: A new finalizer set is persisted alone, status waits for the next pass
    #[tokio::test]
    async fn story_finalizer_change_is_its_own_write() {
        let (client, capture) = capturing_client(sample_instance(&[], None));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::updating(), &[VALKEY_FINALIZER])));

        let action = reconcile_instance(&context(client, flow), &target())
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, ReconcileAction::Done);
        assert_eq!(capture.finalizers(), vec![vec![VALKEY_FINALIZER.to_string()]]);
        assert!(capture.statuses().is_empty());
    }

    /// Story: Finalizer order does not count as a change
    #[tokio::test]
    async fn story_reordered_finalizers_are_not_rewritten() {
        let current = sample_instance(&["a", VALKEY_FINALIZER], Some(ValkeyStatus::healthy(1)));
        let (client, capture) = capturing_client(current);
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::healthy(1), &[VALKEY_FINALIZER, "a"])));

        let action = reconcile_instance(&context(client, flow), &target())
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(capture.write_count(), 0);
    }

    /// Story: An unchanged status causes zero writes and a steady-state requeue
    #[tokio::test]
    async fn story_unchanged_status_is_not_written() {
        let (client, capture) = capturing_client(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus {
                last_reconcile_at: Some(Utc::now()),
                ..ValkeyStatus::healthy(2)
            }),
        ));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::healthy(2), &[VALKEY_FINALIZER])));

        let action = reconcile_instance(&context(client, flow), &target())
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(capture.write_count(), 0);
    }

    /// Story: The steady-state interval is configurable
    #[tokio::test]
    async fn story_requeue_interval_is_configurable() {
        let (client, _capture) = capturing_client(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::healthy(1)),
        ));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::healthy(1), &[VALKEY_FINALIZER])));
        let ctx = context(client, flow).with_requeue_interval(Duration::from_secs(30));

        let action = reconcile_instance(&ctx, &target())
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::from_secs(30)));
    }

    /// Story: A changed status is stamped and written once
    #[tokio::test]
    async fn story_changed_status_is_stamped_and_written() {
        let (client, capture) = capturing_client(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::updating()),
        ));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::healthy(1), &[VALKEY_FINALIZER])));

        let before = Utc::now();
        let action = reconcile_instance(&context(client, flow), &target())
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, ReconcileAction::Done);
        let statuses = capture.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, InstancePhase::Healthy);
        assert_eq!(statuses[0].ready_replicas, 1);
        assert!(statuses[0].last_reconcile_at.is_some_and(|t| t >= before));
        assert!(capture.finalizers().is_empty());
    }

    /// Story: A flow error overwrites whatever status was there with `failed`
    #[tokio::test]
    async fn story_flow_error_becomes_failed_status() {
        let (client, capture) = capturing_client(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::healthy(3)),
        ));
        let flow = flow_returning(|| Err(Error::internal("deployment update failed")));

        let action = reconcile_instance(&context(client, flow), &target())
            .await
            .expect("flow errors are reported through status");

        assert_eq!(action, ReconcileAction::Done);
        let statuses = capture.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, InstancePhase::Failed);
        assert_eq!(statuses[0].ready_replicas, 0);
        assert!(statuses[0]
            .error
            .as_deref()
            .is_some_and(|m| m.contains("deployment update failed")));
        assert!(statuses[0].last_reconcile_at.is_some());
        assert!(capture.finalizers().is_empty());
    }

    /// Story: A repeated identical failure is not rewritten
    #[tokio::test]
    async fn story_repeated_failure_is_suppressed() {
        let message = Error::internal("deployment update failed").to_string();
        let (client, capture) = capturing_client(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::failed(message, Utc::now())),
        ));
        let flow = flow_returning(|| Err(Error::internal("deployment update failed")));

        let action = reconcile_instance(&context(client, flow), &target())
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(capture.write_count(), 0);
    }

    // ==========================================================================
    // Story Tests: Terminal and retryable errors
    // ==========================================================================

    /// Story: An instance that vanished is terminal, and the flow never runs
    #[tokio::test]
    async fn story_missing_instance_is_terminal() {
        let mut client = MockInstanceClient::new();
        client
            .expect_get()
            .returning(|r| Err(Error::not_found(KIND, &r.namespace, &r.name)));
        let mut flow = MockInstanceFlow::new();
        flow.expect_run().never();

        let err = reconcile_instance(&context(client, flow), &target())
            .await
            .expect_err("missing instance should be terminal");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    /// Story: Other fetch failures are retried
    #[tokio::test]
    async fn story_fetch_failure_is_retryable() {
        let mut client = MockInstanceClient::new();
        client
            .expect_get()
            .returning(|_| Err(Error::internal("connection refused")));
        let mut flow = MockInstanceFlow::new();
        flow.expect_run().never();

        let err = reconcile_instance(&context(client, flow), &target())
            .await
            .expect_err("fetch failure should surface");
        assert!(err.is_retryable());
    }

    /// Story: A status write to a vanished instance is terminal
    #[tokio::test]
    async fn story_status_write_not_found_is_terminal() {
        let mut client = MockInstanceClient::new();
        client
            .expect_get()
            .returning(|_| Ok(sample_instance(&[VALKEY_FINALIZER], None)));
        client
            .expect_replace_status()
            .returning(|_, _| Err(Error::not_found(KIND, "default", "valkey")));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::healthy(1), &[VALKEY_FINALIZER])));

        let err = reconcile_instance(&context(client, flow), &target())
            .await
            .expect_err("write should fail");
        assert!(!err.is_retryable());
    }

    /// Story: A finalizer write failing on a stale version is retried
    #[tokio::test]
    async fn story_finalizer_write_conflict_is_retryable() {
        let mut client = MockInstanceClient::new();
        client
            .expect_get()
            .returning(|_| Ok(sample_instance(&[], None)));
        client
            .expect_replace_finalizers()
            .withf(|instance, _| instance.resource_version().as_deref() == Some("42"))
            .returning(|_, _| Err(Error::internal("the object has been modified")));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::updating(), &[VALKEY_FINALIZER])));

        let err = reconcile_instance(&context(client, flow), &target())
            .await
            .expect_err("write should fail");
        assert!(err.is_retryable());
    }

    // ==========================================================================
    // Patch bodies
    // ==========================================================================

    #[test]
    fn test_status_patch_clears_error_on_non_failed_status() {
        let instance = sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::failed("deployment update failed", Utc::now())),
        );

        for status in [
            ValkeyStatus::healthy(1),
            ValkeyStatus::stopped(),
            ValkeyStatus::updating(),
        ] {
            let patch = status_patch(&instance, &status);
            let body = patch["status"].as_object().expect("status object");
            assert_eq!(body.get("error"), Some(&Value::Null), "{}", status.status);
            assert_eq!(body["status"], status.status.to_string());
        }
    }

    #[test]
    fn test_status_patch_carries_failure_and_version() {
        let instance = sample_instance(&[VALKEY_FINALIZER], None);
        let now = Utc::now();

        let patch = status_patch(&instance, &ValkeyStatus::failed("boom", now));
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"]["status"], "failed");
        assert_eq!(patch["status"]["error"], "boom");
        assert_eq!(patch["status"]["readyReplicas"], 0);
        assert!(patch["status"]["lastReconcileAt"].is_string());
    }

    #[test]
    fn test_finalizers_patch_replaces_whole_list() {
        let instance = sample_instance(&["a", VALKEY_FINALIZER], None);

        let patch = finalizers_patch(&instance, &["a".to_string()]);
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["metadata"]["finalizers"], serde_json::json!(["a"]));

        let patch = finalizers_patch(&instance, &[]);
        assert_eq!(patch["metadata"]["finalizers"], serde_json::json!([]));
    }

    // ==========================================================================
    // Story Tests: Repeated passes against a stored instance
    // ==========================================================================

    mock! {
        pub Service {}

        #[async_trait]
        impl InstanceService for Service {
            async fn create(&self, request: &CreateRequest) -> Result<(), Error>;
            async fn update(&self, request: &UpdateRequest) -> Result<(), Error>;
            async fn delete(&self, instance: &InstanceRef) -> Result<(), Error>;
            async fn is_ready(&self, instance: &InstanceRef) -> Result<ReadyState, Error>;
        }
    }

    /// JSON merge patch (RFC 7386), as the API server applies it
    fn merge_patch(target: &mut Value, patch: &Value) {
        let Value::Object(fields) = patch else {
            *target = patch.clone();
            return;
        };
        if !target.is_object() {
            *target = Value::Object(Default::default());
        }
        if let Value::Object(map) = target {
            for (key, value) in fields {
                if value.is_null() {
                    map.remove(key);
                } else {
                    merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
    }

    /// Instance record that applies writes the way the API server would
    struct StoredInstance {
        object: Mutex<Value>,
        writes: Mutex<usize>,
    }

    impl StoredInstance {
        fn new(instance: Valkey) -> Arc<Self> {
            Arc::new(Self {
                object: Mutex::new(serde_json::to_value(instance).expect("serialize")),
                writes: Mutex::new(0),
            })
        }

        fn current(&self) -> Valkey {
            let object = self.object.lock().expect("mutex should not be poisoned");
            serde_json::from_value(object.clone()).expect("stored instance should parse")
        }

        fn raw_status(&self) -> Value {
            let object = self.object.lock().expect("mutex should not be poisoned");
            object["status"].clone()
        }

        fn writes(&self) -> usize {
            *self.writes.lock().expect("mutex should not be poisoned")
        }

        fn apply(&self, patch: &Value) {
            merge_patch(
                &mut self.object.lock().expect("mutex should not be poisoned"),
                patch,
            );
            *self.writes.lock().expect("mutex should not be poisoned") += 1;
        }
    }

    #[async_trait]
    impl InstanceClient for StoredInstance {
        async fn get(&self, _instance: &InstanceRef) -> Result<Valkey, Error> {
            Ok(self.current())
        }

        async fn replace_finalizers(
            &self,
            instance: &Valkey,
            finalizers: &[String],
        ) -> Result<(), Error> {
            self.apply(&finalizers_patch(instance, finalizers));
            Ok(())
        }

        async fn replace_status(
            &self,
            instance: &Valkey,
            status: &ValkeyStatus,
        ) -> Result<(), Error> {
            self.apply(&status_patch(instance, status));
            Ok(())
        }
    }

    fn service_reporting(ready_replicas: i32) -> MockService {
        let mut service = MockService::new();
        service.expect_create().returning(|_| Ok(()));
        service.expect_update().returning(|_| Ok(()));
        service
            .expect_is_ready()
            .returning(move |_| Ok(ReadyState::from_ready_replicas(ready_replicas)));
        service
    }

    fn stored_context(store: &Arc<StoredInstance>, flow: ValkeyFlow) -> Context {
        let client: Arc<dyn InstanceClient> = store.clone();
        Context::new(client, Arc::new(flow))
    }

    async fn run_passes(ctx: &Context, passes: usize) -> Vec<ReconcileAction> {
        let mut actions = Vec::with_capacity(passes);
        for _ in 0..passes {
            let action = reconcile_instance(ctx, &target())
                .await
                .expect("reconcile should succeed");
            actions.push(action);
        }
        actions
    }

    /// Story: Recovering from a failure clears the stored error and then settles
    #[tokio::test]
    async fn story_recovery_clears_stale_error_and_settles() {
        let store = StoredInstance::new(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::failed("deployment update failed", Utc::now())),
        ));
        let ctx = stored_context(&store, ValkeyFlow::new(Arc::new(service_reporting(1))));

        let actions = run_passes(&ctx, 3).await;

        let status = store.current().current_status();
        assert_eq!(status.status, InstancePhase::Healthy);
        assert_eq!(status.error, None, "stale error left on healthy status");
        assert!(store.raw_status().get("error").is_none());
        assert_eq!(store.writes(), 1);
        assert_eq!(
            actions,
            vec![
                ReconcileAction::Done,
                ReconcileAction::RequeueAfter(Duration::from_secs(10)),
                ReconcileAction::RequeueAfter(Duration::from_secs(10)),
            ]
        );
    }

    /// Story: An instance with no ready replicas settles on `stopped` and stays finalized
    #[tokio::test]
    async fn story_unready_instance_settles_on_stopped() {
        let store = StoredInstance::new(sample_instance(&[], None));
        let ctx = stored_context(&store, ValkeyFlow::new(Arc::new(service_reporting(0))));

        let actions = run_passes(&ctx, 6).await;

        let settled = store.current();
        assert_eq!(settled.finalizers(), [VALKEY_FINALIZER.to_string()]);
        assert_eq!(settled.current_status().status, InstancePhase::Stopped);
        assert_eq!(store.writes(), 2);
        assert!(actions[2..]
            .iter()
            .all(|a| *a == ReconcileAction::RequeueAfter(Duration::from_secs(10))));
    }

    /// Story: The clear policy keeps rewriting the finalizer while nothing is ready
    #[tokio::test]
    async fn story_clear_policy_never_settles_while_unready() {
        let store = StoredInstance::new(sample_instance(&[], None));
        let flow = ValkeyFlow::new(Arc::new(service_reporting(0)))
            .with_stopped_finalizers(StoppedFinalizers::Clear);
        let ctx = stored_context(&store, flow);

        let actions = run_passes(&ctx, 4).await;

        assert!(actions.iter().all(|a| *a == ReconcileAction::Done));
        assert_eq!(store.writes(), 4);
        assert_ne!(store.current().current_status().status, InstancePhase::Stopped);
    }

    // ==========================================================================
    // Controller adapter
    // ==========================================================================

    #[tokio::test]
    async fn test_reconcile_maps_actions() {
        let (client, _capture) = capturing_client(sample_instance(
            &[VALKEY_FINALIZER],
            Some(ValkeyStatus::healthy(1)),
        ));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::healthy(1), &[VALKEY_FINALIZER])));
        let ctx = Arc::new(context(client, flow));

        let action = reconcile(Arc::new(sample_instance(&[], None)), ctx)
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let (client, _capture) = capturing_client(sample_instance(&[], None));
        let flow = flow_returning(|| Ok(outcome(ValkeyStatus::updating(), &[VALKEY_FINALIZER])));
        let ctx = Arc::new(context(client, flow));

        let action = reconcile(Arc::new(sample_instance(&[], None)), ctx)
            .await
            .expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn test_error_policy_by_retryability() {
        let ctx = Arc::new(context(MockInstanceClient::new(), MockInstanceFlow::new()));
        let valkey = Arc::new(sample_instance(&[], None));

        let action = error_policy(valkey.clone(), &Error::internal("timeout"), ctx.clone());
        assert_eq!(action, Action::requeue(ERROR_REQUEUE_INTERVAL));

        let action = error_policy(valkey, &Error::not_found(KIND, "default", "valkey"), ctx);
        assert_eq!(action, Action::await_change());
    }
}
