use crate::{
    sessions::{credentials, secrets},
    util::{Error, conditions, patch::StatusPatch},
};
use ambient_code_types::{AgenticSession, AgenticSessionPhase, condition_types};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Api, Client, ResourceExt};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Process-wide set of `(namespace, pod-name)` pairs with a live monitor,
/// enforcing I6.
pub type MonitoredPods = Arc<Mutex<HashSet<(String, String)>>>;

const TICK: Duration = Duration::from_secs(5);

const TERMINAL_WAIT_REASONS: &[&str] = &[
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "CreateContainerConfigError",
    "InvalidImageName",
];

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PodVerdict {
    Completed,
    Failed(String),
    Running,
    Scheduled,
    Waiting,
}

/// Maps a runner pod's live status to a phase-transition verdict, per
/// spec.md §4.8. Pure and unit-testable without a cluster.
pub fn classify_pod(pod: &Pod) -> PodVerdict {
    let Some(status) = &pod.status else {
        return PodVerdict::Waiting;
    };
    match status.phase.as_deref() {
        Some("Succeeded") => return PodVerdict::Completed,
        Some("Failed") => return PodVerdict::Failed(collect_failure_message(pod)),
        _ => {}
    }

    let runner = status
        .container_statuses
        .as_ref()
        .and_then(|statuses| statuses.iter().find(|c| c.name == "runner"));
    if let Some(runner) = runner
        && let Some(state) = &runner.state
    {
        if state.running.is_some() {
            return PodVerdict::Running;
        }
        if let Some(waiting) = &state.waiting {
            if let Some(reason) = &waiting.reason
                && TERMINAL_WAIT_REASONS.contains(&reason.as_str())
            {
                return PodVerdict::Failed(reason.clone());
            }
            return PodVerdict::Waiting;
        }
        if let Some(terminated) = &state.terminated {
            return match terminated.exit_code {
                0 => PodVerdict::Completed,
                2 => PodVerdict::Failed("PrerequisiteFailed".to_string()),
                _ => PodVerdict::Failed("RunnerExit".to_string()),
            };
        }
    }

    if pod.spec.as_ref().is_some_and(|s| s.node_name.as_deref().is_some_and(|n| !n.is_empty())) {
        return PodVerdict::Scheduled;
    }
    PodVerdict::Waiting
}

/// Collects a best-effort error message for a `PodFailed` pod: the first
/// failed init container's terminated message/reason, else the first
/// failed main container, else a waiting-state message, else a generic
/// fallback (spec.md §4.8).
fn collect_failure_message(pod: &Pod) -> String {
    let Some(status) = &pod.status else {
        return "pod failed with no status".to_string();
    };
    for statuses in [&status.init_container_statuses, &status.container_statuses] {
        if let Some(statuses) = statuses {
            for container in statuses {
                if let Some(state) = &container.state
                    && let Some(terminated) = &state.terminated
                    && terminated.exit_code != 0
                {
                    return terminated
                        .message
                        .clone()
                        .or_else(|| terminated.reason.clone())
                        .unwrap_or_else(|| format!("{} exited {}", container.name, terminated.exit_code));
                }
            }
        }
    }
    if let Some(statuses) = &status.container_statuses {
        for container in statuses {
            if let Some(state) = &container.state
                && let Some(waiting) = &state.waiting
            {
                return waiting
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} waiting", container.name));
            }
        }
    }
    "pod failed".to_string()
}

enum TickOutcome {
    Continue,
    Stop,
}

/// Spawns a monitor task for `namespace`/`pod_name` unless one is already
/// running (I6). The task removes its own entry on every exit path.
pub fn spawn_monitor(
    client: Client,
    monitored: MonitoredPods,
    namespace: String,
    session_name: String,
    pod_name: String,
) {
    let key = (namespace.clone(), pod_name.clone());
    {
        let mut set = monitored.lock().unwrap();
        if !set.insert(key.clone()) {
            return;
        }
    }
    tokio::spawn(async move {
        run(client, &namespace, &session_name, &pod_name).await;
        monitored.lock().unwrap().remove(&key);
    });
}

async fn run(client: Client, namespace: &str, session_name: &str, pod_name: &str) {
    let mut tick = tokio::time::interval(TICK);
    loop {
        tick.tick().await;
        match tick_once(client.clone(), namespace, session_name, pod_name).await {
            Ok(TickOutcome::Continue) => continue,
            Ok(TickOutcome::Stop) => break,
            Err(e) => eprintln!("pod monitor {namespace}/{pod_name} error: {e}"),
        }
    }
}

async fn tick_once(
    client: Client,
    namespace: &str,
    session_name: &str,
    pod_name: &str,
) -> Result<TickOutcome, Error> {
    let sessions: Api<AgenticSession> = Api::namespaced(client.clone(), namespace);
    let instance = match sessions.get(session_name).await {
        Ok(instance) => instance,
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(TickOutcome::Stop),
        Err(e) => return Err(e.into()),
    };
    if instance
        .status
        .as_ref()
        .is_some_and(|s| s.phase == AgenticSessionPhase::Stopped)
    {
        return Ok(TickOutcome::Stop);
    }

    credentials::ensure_fresh_token(client.clone(), &instance).await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = match pods.get(pod_name).await {
        Ok(pod) => pod,
        Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(TickOutcome::Stop),
        Err(e) => return Err(e.into()),
    };

    let generation = instance.meta().generation.unwrap_or_default();
    let mut patch = StatusPatch::new();
    let verdict = classify_pod(&pod);
    let mut terminal = false;

    match verdict {
        PodVerdict::Completed => {
            terminal = true;
            let now = chrono::Utc::now().to_rfc3339();
            patch.set_field(move |status| status.phase = AgenticSessionPhase::Completed);
            patch.set_field(move |status| status.completion_time = Some(now));
        }
        PodVerdict::Failed(reason) => {
            terminal = true;
            let now = chrono::Utc::now().to_rfc3339();
            patch.set_field(move |status| status.phase = AgenticSessionPhase::Failed);
            patch.set_field(move |status| status.completion_time = Some(now));
            patch.upsert_condition(conditions::make(
                condition_types::READY,
                false,
                "RunnerFailed",
                reason,
                generation,
            ));
        }
        PodVerdict::Running => {
            patch.set_field(|status| status.phase = AgenticSessionPhase::Running);
            patch.upsert_condition(conditions::make(
                condition_types::RUNNER_STARTED,
                true,
                "Running",
                "runner container is running",
                generation,
            ));
            patch.upsert_condition(conditions::make(
                condition_types::READY,
                true,
                "Running",
                "session is running",
                generation,
            ));
        }
        PodVerdict::Scheduled => {
            patch.upsert_condition(conditions::make(
                condition_types::POD_SCHEDULED,
                true,
                "Scheduled",
                "pod has been assigned a node",
                generation,
            ));
        }
        PodVerdict::Waiting => {}
    }

    patch.apply(client.clone(), &instance).await?;

    if terminal {
        // Completed/Failed tear down pod+services but keep copied secrets;
        // only a Stopped transition (the phase reconciler's Stopping
        // handler) removes those.
        force_interactive_spec(client.clone(), &instance).await?;
        teardown_session_resources(client.clone(), &instance).await?;
        return Ok(TickOutcome::Stop);
    }

    Ok(TickOutcome::Continue)
}

/// Forces `spec.interactive = true` on any terminal transition so the
/// session can be restarted (spec.md §4.6 rule 7, §9).
pub async fn force_interactive_spec(client: Client, instance: &AgenticSession) -> Result<(), Error> {
    if instance.spec.interactive {
        return Ok(());
    }
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let name = instance.name_any();
    let sessions: Api<AgenticSession> = Api::namespaced(client, namespace);
    let patch = serde_json::json!({ "spec": { "interactive": true } });
    sessions
        .patch(
            &name,
            &kube::api::PatchParams::apply(crate::util::MANAGER_NAME),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    Ok(())
}

/// Deletes the pod and its two services on a terminal transition (I2).
pub async fn teardown_session_resources(client: Client, instance: &AgenticSession) -> Result<(), Error> {
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let name = instance.name_any();
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod_name = super::pod::pod_name_for(&name);
    if let Err(kube::Error::Api(ae)) = pods.delete(&pod_name, &Default::default()).await
        && ae.code != 404
    {
        return Err(kube::Error::Api(ae).into());
    }
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    for service_name in [format!("ambient-content-{name}"), format!("session-{name}")] {
        if let Err(kube::Error::Api(ae)) = services.delete(&service_name, &Default::default()).await
            && ae.code != 404
        {
            return Err(kube::Error::Api(ae).into());
        }
    }
    Ok(())
}

/// Tears down copy-tracked secrets when a session reaches `Stopped`
/// (spec.md §4.6 rule 7).
pub async fn teardown_copied_secrets(client: Client, instance: &AgenticSession) -> Result<(), Error> {
    let namespace = instance.meta().namespace.as_deref().unwrap();
    for name in [
        super::pod::VERTEX_SECRET_NAME,
        super::pod::LANGFUSE_SECRET_NAME,
    ] {
        secrets::delete_shared_secret(client.clone(), namespace, name).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, PodStatus};

    fn pod_with_runner_state(state: ContainerState) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "runner".to_string(),
                    state: Some(state),
                    ready: false,
                    restart_count: 0,
                    image: String::new(),
                    image_id: String::new(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn running_runner_container_yields_running_verdict() {
        let pod = pod_with_runner_state(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        });
        assert_eq!(classify_pod(&pod), PodVerdict::Running);
    }

    #[test]
    fn crash_loop_backoff_is_terminal_failed() {
        let pod = pod_with_runner_state(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("CrashLoopBackOff".to_string()),
                message: None,
            }),
            ..Default::default()
        });
        assert_eq!(
            classify_pod(&pod),
            PodVerdict::Failed("CrashLoopBackOff".to_string())
        );
    }

    #[test]
    fn ordinary_waiting_reason_is_not_terminal() {
        let pod = pod_with_runner_state(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ContainerCreating".to_string()),
                message: None,
            }),
            ..Default::default()
        });
        assert_eq!(classify_pod(&pod), PodVerdict::Waiting);
    }

    #[test]
    fn exit_zero_is_completed() {
        let pod = pod_with_runner_state(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 0,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(classify_pod(&pod), PodVerdict::Completed);
    }

    #[test]
    fn exit_two_is_prerequisite_failed() {
        let pod = pod_with_runner_state(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 2,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            classify_pod(&pod),
            PodVerdict::Failed("PrerequisiteFailed".to_string())
        );
    }

    #[test]
    fn other_exit_code_is_runner_exit() {
        let pod = pod_with_runner_state(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 17,
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            classify_pod(&pod),
            PodVerdict::Failed("RunnerExit".to_string())
        );
    }

    #[test]
    fn pod_phase_succeeded_short_circuits_container_inspection() {
        let mut pod = pod_with_runner_state(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        });
        pod.status.as_mut().unwrap().phase = Some("Succeeded".to_string());
        assert_eq!(classify_pod(&pod), PodVerdict::Completed);
    }
}
