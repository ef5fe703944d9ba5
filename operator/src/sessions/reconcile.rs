use crate::{
    config::OperatorArgs,
    sessions::{credentials, drift, monitor, pod, secrets, service, storage},
    util::{
        self, Error, MANAGER_NAME, PROBE_INTERVAL, RUNNER_HTTP_TIMEOUT,
        colors::{FG1, FG2},
        conditions,
        patch::StatusPatch,
    },
};
use ambient_code_types::{
    AgenticSession, AgenticSessionPhase, DesiredPhase, annotations, condition_types,
};
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    Api, Client, Resource, ResourceExt,
    api::PostParams,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `AgenticSession` controller, guarded by leader
/// election (C12). Mirrors the reference operator's own `run()`: a manual
/// acquire-or-renew loop gates a spawned `Controller::new(...).run(...)`
/// task so exactly one replica reconciles at a time.
pub async fn run(client: Client, args: OperatorArgs) -> Result<(), Error> {
    println!("{}", "Starting AgenticSession controller...".green());

    let monitored_pods: monitor::MonitoredPods = Default::default();
    #[cfg(feature = "metrics")]
    let metrics_port = args.metrics_port;
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), args, monitored_pods));

    #[cfg(feature = "metrics")]
    if let Some(port) = metrics_port {
        let registry = context.metrics.registry.clone();
        tokio::spawn(util::metrics::run_server(registry, port));
    }

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("ambient-code-operator-{}", uuid::Uuid::new_v4()));
    let lease_name = "ambient-code-operator-lock".to_string();
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl,
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        ambient_code_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    ambient_code_common::signal_ready();
    println!("{}", "🌱 Starting AgenticSession controller...".green());

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };
        if lease.acquired_lease {
            if controller_task.is_none() {
                println!("acquired leadership; starting controller");
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let crd_api: Api<AgenticSession> = Api::all(client_for_controller.clone());
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 AgenticSession controller started.".green());
                    Controller::new(crd_api, Default::default())
                        .owns(Api::<Pod>::all(client_for_controller), Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    args: OperatorArgs,
    monitored_pods: monitor::MonitoredPods,
    http: reqwest::Client,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, args: OperatorArgs, monitored_pods: monitor::MonitoredPods) -> Self {
        let http = reqwest::Client::builder()
            .timeout(RUNNER_HTTP_TIMEOUT)
            .build()
            .expect("building runner http client");
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                args,
                monitored_pods,
                http,
                metrics: ControllerMetrics::new("agenticsessions"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData {
                client,
                args,
                monitored_pods,
                http,
            }
        }
    }
}

/// Action selected for one reconciliation pass. A closed sum over
/// {phase, desired-phase, pod-existence}, per spec.md §9 ("tagged
/// variants" design note) rather than scattered string comparisons.
#[derive(Debug, PartialEq)]
enum SessionAction {
    /// Rule 1: restart a terminal session because `desired-phase=Running`.
    RestartFromTerminal,
    /// Rule 2: stop an active session because `desired-phase=Stopped`.
    StopRequested,
    /// Rule 3: provision and create the pod+services for a Pending session.
    ProvisionPending,
    /// Rule 4: pod exists while Creating; (re)start its monitor.
    AwaitCreatingPod,
    /// Rule 4: pod missing while Creating and desired-phase=Stopped.
    CreatingToStopped,
    /// Rule 4: pod missing while Creating, not stopping; re-read then
    /// fall through to recreate in the same pass.
    RecreateFromCreating,
    /// Rule 5: drift-reconcile a Running session whose generation has
    /// advanced past `observedGeneration`.
    DriftReconcile,
    /// Rule 6: Stopping handler — pod still present, delete and retry.
    StoppingAwaitPodGone,
    /// Rule 6: Stopping handler — pod gone, finalize to Stopped.
    StoppingFinalize,
    /// Rule 7: terminal phase, nothing to do.
    Terminal,
    /// Steady state: nothing changed.
    NoOp,
}

impl SessionAction {
    fn to_str(&self) -> &'static str {
        match self {
            SessionAction::RestartFromTerminal => "RestartFromTerminal",
            SessionAction::StopRequested => "StopRequested",
            SessionAction::ProvisionPending => "ProvisionPending",
            SessionAction::AwaitCreatingPod => "AwaitCreatingPod",
            SessionAction::CreatingToStopped => "CreatingToStopped",
            SessionAction::RecreateFromCreating => "RecreateFromCreating",
            SessionAction::DriftReconcile => "DriftReconcile",
            SessionAction::StoppingAwaitPodGone => "StoppingAwaitPodGone",
            SessionAction::StoppingFinalize => "StoppingFinalize",
            SessionAction::Terminal => "Terminal",
            SessionAction::NoOp => "NoOp",
        }
    }
}

async fn get_pod(client: Client, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    match api.get(name).await {
        Ok(pod) => Ok(Some(pod)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Re-adopts a Running session's pod monitor if none is live. Idempotent
/// via the `MonitoredPods` dedup set (I6) — a leader change or process
/// restart empties that set, so `Running` reconciles must re-spawn rather
/// than assume the original `AwaitCreatingPod` spawn is still alive.
fn adopt_running_monitor(client: Client, context: &ContextData, namespace: &str, name: &str) {
    let pod_name = pod::pod_name_for(name);
    monitor::spawn_monitor(
        client,
        context.monitored_pods.clone(),
        namespace.to_string(),
        name.to_string(),
        pod_name,
    );
}

/// Read phase of reconciliation: phase + desired-phase + pod existence -> action.
async fn determine_action(
    client: Client,
    namespace: &str,
    name: &str,
    instance: &AgenticSession,
) -> Result<SessionAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(SessionAction::NoOp);
    }

    let phase = instance
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(AgenticSessionPhase::Pending);
    let desired = instance
        .meta()
        .annotations
        .as_ref()
        .map(DesiredPhase::from_annotations)
        .unwrap_or_default();

    if phase.is_terminal() && desired == DesiredPhase::Running {
        return Ok(SessionAction::RestartFromTerminal);
    }
    if desired == DesiredPhase::Stopped
        && matches!(
            phase,
            AgenticSessionPhase::Pending | AgenticSessionPhase::Creating | AgenticSessionPhase::Running
        )
    {
        return Ok(SessionAction::StopRequested);
    }

    match phase {
        AgenticSessionPhase::Pending => Ok(SessionAction::ProvisionPending),
        AgenticSessionPhase::Creating => {
            let pod_name = pod::pod_name_for(name);
            match get_pod(client, namespace, &pod_name).await? {
                Some(_) => Ok(SessionAction::AwaitCreatingPod),
                None if desired == DesiredPhase::Stopped => Ok(SessionAction::CreatingToStopped),
                None => Ok(SessionAction::RecreateFromCreating),
            }
        }
        AgenticSessionPhase::Running => {
            let generation = instance.meta().generation.unwrap_or_default();
            let observed = instance.status.as_ref().map(|s| s.observed_generation).unwrap_or_default();
            if generation > observed {
                Ok(SessionAction::DriftReconcile)
            } else {
                Ok(SessionAction::NoOp)
            }
        }
        AgenticSessionPhase::Stopping => {
            let pod_name = pod::pod_name_for(name);
            match get_pod(client, namespace, &pod_name).await? {
                Some(_) => Ok(SessionAction::StoppingAwaitPodGone),
                None => Ok(SessionAction::StoppingFinalize),
            }
        }
        AgenticSessionPhase::Stopped | AgenticSessionPhase::Completed | AgenticSessionPhase::Failed => {
            Ok(SessionAction::Terminal)
        }
    }
}

async fn reconcile(instance: Arc<AgenticSession>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("AgenticSession must be namespaced".to_string()))?;
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let action = determine_action(client.clone(), &namespace, &name, &instance).await?;

    if action != SessionAction::NoOp {
        println!(
            "🔧 {}{}{}{}{}",
            namespace.color(FG2),
            "/".color(FG1),
            name.color(FG2),
            " ACTION: ".color(FG1),
            format!("{action:?}").color(FG2),
        );
    }

    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace, action.to_str()])
        .observe(start.elapsed().as_secs_f64());
    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.to_str()])
        .inc();
    #[cfg(feature = "metrics")]
    let timer = if action == SessionAction::NoOp {
        None
    } else {
        Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        )
    };

    let result = match action {
        SessionAction::RestartFromTerminal => {
            restart_from_terminal(client, &instance, &namespace, &name).await?;
            Action::await_change()
        }
        SessionAction::StopRequested => {
            stop_requested(client, &instance, &namespace, &name).await?;
            Action::await_change()
        }
        SessionAction::ProvisionPending => {
            provision_pending(client, &context, &instance, &namespace, &name).await?;
            Action::await_change()
        }
        SessionAction::AwaitCreatingPod => {
            let pod_name = pod::pod_name_for(&name);
            monitor::spawn_monitor(
                client,
                context.monitored_pods.clone(),
                namespace.clone(),
                name.clone(),
                pod_name,
            );
            Action::requeue(PROBE_INTERVAL)
        }
        SessionAction::CreatingToStopped => {
            let mut patch = StatusPatch::new();
            patch.set_field(|status| status.phase = AgenticSessionPhase::Stopped);
            patch.apply(client, &instance).await?;
            Action::await_change()
        }
        SessionAction::RecreateFromCreating => {
            // Re-read to tolerate stale watch events (rule 4).
            let sessions: Api<AgenticSession> = Api::namespaced(client.clone(), &namespace);
            let fresh = sessions.get(&name).await?;
            let fresh_phase = fresh.status.as_ref().map(|s| s.phase).unwrap_or(AgenticSessionPhase::Pending);
            if fresh_phase.is_terminal() {
                Action::await_change()
            } else {
                let mut patch = StatusPatch::new();
                patch.set_field(|status| status.phase = AgenticSessionPhase::Pending);
                if fresh.status.as_ref().is_some_and(|s| s.start_time.is_some()) {
                    let restart_count = fresh.status.as_ref().map(|s| s.sdk_restart_count).unwrap_or(0) + 1;
                    patch.set_field(move |status| status.sdk_restart_count = restart_count);
                }
                patch.apply(client.clone(), &fresh).await?;
                provision_pending(client, &context, &fresh, &namespace, &name).await?;
                Action::await_change()
            }
        }
        SessionAction::DriftReconcile => {
            adopt_running_monitor(client.clone(), &context, &namespace, &name);
            drift_reconcile(client, &context, &instance, &namespace, &name).await?;
            Action::requeue(PROBE_INTERVAL)
        }
        SessionAction::StoppingAwaitPodGone => {
            let pods: Api<Pod> = Api::namespaced(client, &namespace);
            let pod_name = pod::pod_name_for(&name);
            if let Err(kube::Error::Api(ae)) = pods.delete(&pod_name, &Default::default()).await
                && ae.code != 404
            {
                return Err(kube::Error::Api(ae).into());
            }
            Action::requeue(Duration::from_secs(5))
        }
        SessionAction::StoppingFinalize => {
            stopping_finalize(client, &instance).await?;
            Action::await_change()
        }
        SessionAction::Terminal => {
            monitor::force_interactive_spec(client, &instance).await?;
            Action::requeue(PROBE_INTERVAL)
        }
        SessionAction::NoOp => {
            let phase = instance.status.as_ref().map(|s| s.phase).unwrap_or(AgenticSessionPhase::Pending);
            if phase == AgenticSessionPhase::Running {
                adopt_running_monitor(client, &context, &namespace, &name);
            }
            Action::requeue(PROBE_INTERVAL)
        }
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

/// Rule 1: desired-phase=Running from a terminal phase.
async fn restart_from_terminal(
    client: Client,
    instance: &AgenticSession,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    let pod_name = pod::pod_name_for(name);
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    if let Err(kube::Error::Api(ae)) = pods.delete(&pod_name, &Default::default()).await
        && ae.code != 404
    {
        return Err(kube::Error::Api(ae).into());
    }

    let is_continuation = instance
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::PARENT_SESSION_ID))
        .is_some_and(|parent| !parent.is_empty() && parent != name);
    if is_continuation {
        credentials::provision_runner_token(client.clone(), instance).await?;
    }

    let now = chrono::Utc::now().to_rfc3339();
    let restart_count = instance.status.as_ref().map(|s| s.sdk_restart_count).unwrap_or(0) + 1;
    let mut patch = StatusPatch::new();
    patch.set_field(move |status| status.completion_time = None);
    patch.set_field(move |status| status.start_time = Some(now));
    patch.set_field(|status| status.phase = AgenticSessionPhase::Pending);
    patch.set_field(move |status| status.sdk_restart_count = restart_count);
    patch.apply(client.clone(), instance).await?;

    clear_annotation(client.clone(), instance, annotations::START_REQUESTED_AT).await?;
    monitor::force_interactive_spec(client, instance).await
}

/// Rule 2: desired-phase=Stopped while active.
async fn stop_requested(client: Client, instance: &AgenticSession, namespace: &str, name: &str) -> Result<(), Error> {
    let pod_name = pod::pod_name_for(name);
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    if let Err(kube::Error::Api(ae)) = pods.delete(&pod_name, &Default::default()).await
        && ae.code != 404
    {
        return Err(kube::Error::Api(ae).into());
    }
    let mut patch = StatusPatch::new();
    patch.set_field(|status| status.phase = AgenticSessionPhase::Stopping);
    patch.apply(client, instance).await
}

/// Rule 3: Pending handler.
async fn provision_pending(
    client: Client,
    context: &ContextData,
    instance: &AgenticSession,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    let generation = instance.meta().generation.unwrap_or_default();
    let mut patch = StatusPatch::new();

    let has_token = instance
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::RUNNER_TOKEN_SECRET))
        .is_some();
    if !has_token {
        let secret_name = credentials::provision_runner_token(client.clone(), instance).await?;
        set_annotation(client.clone(), instance, annotations::RUNNER_TOKEN_SECRET, &secret_name).await?;
        set_annotation(
            client.clone(),
            instance,
            annotations::RUNNER_SA,
            &format!("ambient-session-{name}"),
        )
        .await?;
    }

    if context.args.integrations.vertex_enabled() {
        let check: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(client.clone(), &context.args.backend.backend_namespace);
        if check.get(pod::VERTEX_SECRET_NAME).await.is_err() {
            let mut patch = StatusPatch::new();
            patch.set_field(|status| status.phase = AgenticSessionPhase::Failed);
            patch.upsert_condition(conditions::make(
                condition_types::SECRETS_READY,
                false,
                "VertexSecretMissing",
                format!("{} is required when Vertex is enabled", pod::VERTEX_SECRET_NAME),
                generation,
            ));
            patch.apply(client.clone(), instance).await?;
            return Ok(());
        }
        secrets::copy_shared_secret(
            client.clone(),
            &context.args.backend.backend_namespace,
            pod::VERTEX_SECRET_NAME,
            instance,
        )
        .await?;
    } else {
        let runner_secret: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(client.clone(), &context.args.backend.backend_namespace);
        if runner_secret.get(pod::BOT_TOKEN_SECRET_NAME).await.is_err() {
            patch.set_field(|status| status.phase = AgenticSessionPhase::Failed);
            patch.upsert_condition(conditions::make(
                condition_types::SECRETS_READY,
                false,
                "RunnerSecretMissing",
                format!("{} is required when Vertex is disabled", pod::BOT_TOKEN_SECRET_NAME),
                generation,
            ));
            patch.apply(client.clone(), instance).await?;
            return Ok(());
        }
    }

    if context.args.integrations.langfuse_enabled() {
        if let Err(e) = secrets::copy_shared_secret(
            client.clone(),
            &context.args.backend.backend_namespace,
            pod::LANGFUSE_SECRET_NAME,
            instance,
        )
        .await
        {
            eprintln!("best-effort Langfuse secret copy failed: {e}");
        }
    }

    let oauth_api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(client.clone(), namespace);
    let oauth_name = pod::oauth_secret_name(name);
    if oauth_api.get(&oauth_name).await.is_err() {
        oauth_api
            .create(&PostParams::default(), &pod::placeholder_oauth_secret(instance))
            .await
            .or_else(|e| match e {
                kube::Error::Api(ae) if ae.code == 409 => Ok(Default::default()),
                e => Err(e),
            })?;
    }

    let store = match storage::resolve_object_store_config(client.clone(), namespace, &context.args).await {
        Ok(store) => {
            patch.upsert_condition(conditions::make(
                condition_types::S3_AVAILABLE,
                true,
                "Resolved",
                "object store configuration resolved",
                generation,
            ));
            Some(store)
        }
        Err(message) => {
            patch.upsert_condition(conditions::make(
                condition_types::S3_AVAILABLE,
                false,
                "Unresolved",
                message,
                generation,
            ));
            None
        }
    };

    let is_resume = instance.status.as_ref().is_some_and(|s| s.start_time.is_some());
    let pod_spec = pod::compose_pod(instance, &context.args, store.as_ref(), is_resume);
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let created = match pods.create(&PostParams::default(), &pod_spec).await {
        Ok(pod) => pod,
        Err(kube::Error::Api(ae)) if ae.code == 409 => pods.get(pod_spec.meta().name.as_ref().unwrap()).await?,
        Err(e) => return Err(e.into()),
    };

    let (content_service, runner_service) = service::compose_services(instance, &created);
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    for svc in [content_service, runner_service] {
        if let Err(kube::Error::Api(ae)) = services.create(&PostParams::default(), &svc).await
            && ae.code != 409
        {
            return Err(kube::Error::Api(ae).into());
        }
    }

    patch.set_field(|status| status.phase = AgenticSessionPhase::Creating);
    patch.set_field(move |status| status.observed_generation = generation);
    patch.upsert_condition(conditions::make(
        condition_types::POD_CREATED,
        true,
        "Created",
        "runner pod created",
        generation,
    ));
    patch.apply(client.clone(), instance).await?;
    clear_annotation(client, instance, annotations::DESIRED_PHASE).await
}

/// Rule 5: Running handler — drift reconciliation.
async fn drift_reconcile(
    client: Client,
    context: &ContextData,
    instance: &AgenticSession,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    let generation = instance.meta().generation.unwrap_or_default();
    let base_url = service::runner_base_url(name, namespace);
    let mut patch = StatusPatch::new();
    match drift::reconcile_drift(&context.http, &base_url, instance, &mut patch).await {
        Ok(()) => {
            patch.set_field(move |status| status.observed_generation = generation);
            patch.upsert_condition(conditions::make(
                condition_types::RECONCILED,
                true,
                "Converged",
                "spec converged onto the runner",
                generation,
            ));
        }
        Err(e) => {
            patch.upsert_condition(conditions::make(
                condition_types::RECONCILED,
                false,
                "DriftFailed",
                e.to_string(),
                generation,
            ));
        }
    }
    patch.apply(client, instance).await
}

/// Rule 6: Stopping handler — pod confirmed gone.
async fn stopping_finalize(client: Client, instance: &AgenticSession) -> Result<(), Error> {
    let generation = instance.meta().generation.unwrap_or_default();
    let now = chrono::Utc::now().to_rfc3339();
    let mut patch = StatusPatch::new();
    patch.set_field(|status| status.phase = AgenticSessionPhase::Stopped);
    patch.set_field(move |status| status.completion_time = Some(now));
    patch.upsert_condition(conditions::make(
        condition_types::READY,
        false,
        "UserStopped",
        "session stopped by user request",
        generation,
    ));
    patch.apply(client.clone(), instance).await?;

    monitor::force_interactive_spec(client.clone(), instance).await?;
    monitor::teardown_copied_secrets(client.clone(), instance).await?;
    clear_annotation(client.clone(), instance, annotations::DESIRED_PHASE).await?;
    clear_annotation(client, instance, annotations::STOP_REQUESTED_AT).await?;
    Ok(())
}

async fn patch_annotation(client: Client, instance: &AgenticSession, key: &str, value: serde_json::Value) -> Result<(), Error> {
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let name = instance.name_any();
    let api: Api<AgenticSession> = Api::namespaced(client, namespace);
    let mut annotations = serde_json::Map::new();
    annotations.insert(key.to_string(), value);
    let mut metadata = serde_json::Map::new();
    metadata.insert("annotations".to_string(), serde_json::Value::Object(annotations));
    let mut patch = serde_json::Map::new();
    patch.insert("metadata".to_string(), serde_json::Value::Object(metadata));
    api.patch(
        &name,
        &kube::api::PatchParams::apply(MANAGER_NAME),
        &kube::api::Patch::Merge(&serde_json::Value::Object(patch)),
    )
    .await?;
    Ok(())
}

async fn set_annotation(client: Client, instance: &AgenticSession, key: &str, value: &str) -> Result<(), Error> {
    patch_annotation(client, instance, key, serde_json::Value::String(value.to_string())).await
}

async fn clear_annotation(client: Client, instance: &AgenticSession, key: &str) -> Result<(), Error> {
    if !instance.meta().annotations.as_ref().is_some_and(|a| a.contains_key(key)) {
        return Ok(());
    }
    patch_annotation(client, instance, key, serde_json::Value::Null).await
}

fn on_error(instance: Arc<AgenticSession>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("Reconciliation error: {:?} {:?}", error, instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels_are_stable_strings() {
        assert_eq!(SessionAction::NoOp.to_str(), "NoOp");
        assert_eq!(SessionAction::DriftReconcile.to_str(), "DriftReconcile");
    }
}
