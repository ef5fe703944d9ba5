use super::pod::{RUNNER_PORT, pod_labels};
use ambient_code_types::AgenticSession;
use k8s_openapi::{
    api::core::v1::{Pod, Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{ResourceExt, api::ObjectMeta};

fn content_service_name(session: &str) -> String {
    format!("ambient-content-{session}")
}

fn runner_service_name(session: &str) -> String {
    format!("session-{session}")
}

/// Builds the two cluster-internal services owned by the runner pod
/// (spec.md §4.5): one for the content sidecar's file API, one for the
/// runner's own HTTP API.
pub fn compose_services(instance: &AgenticSession, pod: &Pod) -> (Service, Service) {
    let name = instance.name_any();
    let namespace = instance.meta().namespace.clone();
    let owner = pod.controller_owner_ref(&()).unwrap();
    let selector = pod_labels(&name);

    let content = Service {
        metadata: ObjectMeta {
            name: Some(content_service_name(&name)),
            namespace: namespace.clone(),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector.clone()),
            ports: Some(vec![ServicePort {
                port: 8080,
                target_port: Some(IntOrString::String("http".to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };

    let runner = Service {
        metadata: ObjectMeta {
            name: Some(runner_service_name(&name)),
            namespace,
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: RUNNER_PORT,
                target_port: Some(IntOrString::Int(RUNNER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };

    (content, runner)
}

pub fn runner_base_url(session: &str, namespace: &str) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{}",
        runner_service_name(session),
        namespace,
        RUNNER_PORT
    )
}
