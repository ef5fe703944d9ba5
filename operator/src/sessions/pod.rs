use crate::{config::OperatorArgs, sessions::storage::ObjectStoreConfig};
use ambient_code_types::{AgenticSession, annotations};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, EnvVarSource, HTTPGetAction, Pod, PodSpec,
    Probe, ResourceRequirements, SecretEnvSource, SecretKeySelector, SecretVolumeSource,
    SecurityContext, Volume, VolumeMount,
};
use kube::{Resource, ResourceExt, api::ObjectMeta};
use std::collections::BTreeMap;

pub const WORKSPACE_VOLUME: &str = "workspace";
pub const WORKSPACE_MOUNT_PATH: &str = "/workspace";
pub const SDK_STATE_SUBPATH: &str = ".claude";
pub const SDK_STATE_MOUNT_PATH: &str = "/home/runner/.claude";
pub const RUNNER_PORT: i32 = 8001;
pub const CONTENT_PORT: i32 = 8080;

pub const OAUTH_SECRET_SUFFIX: &str = "-google-oauth";
pub const VERTEX_SECRET_NAME: &str = "vertex-credentials";
pub const LANGFUSE_SECRET_NAME: &str = "langfuse-credentials";
pub const BOT_TOKEN_SECRET_NAME: &str = "ambient-code-runner-secret";
pub const BOT_TOKEN_SECRET_KEY: &str = "token";

pub fn oauth_secret_name(session: &str) -> String {
    format!("{session}{OAUTH_SECRET_SUFFIX}")
}

fn pod_name(session: &str) -> String {
    format!("{session}-runner")
}

pub fn pod_labels(session: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("agentic-session".to_string(), session.to_string()),
        ("app".to_string(), "ambient-code-runner".to_string()),
    ])
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_from_secret_key(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn object_store_env(store: Option<&ObjectStoreConfig>) -> Vec<EnvVar> {
    let Some(store) = store else {
        return vec![env("STORAGE_MODE", "disabled")];
    };
    vec![
        env("S3_ENDPOINT", &store.endpoint),
        env("S3_BUCKET", &store.bucket),
        env("S3_ACCESS_KEY", &store.access_key),
        env("S3_SECRET_KEY", &store.secret_key),
    ]
}

/// Builds the init-hydrate container: clones/prepares the workspace before
/// the runner starts (spec.md §4.5).
fn init_hydrate_container(
    instance: &AgenticSession,
    args: &OperatorArgs,
    store: Option<&ObjectStoreConfig>,
    repos_json: &str,
) -> Container {
    let mut envs = vec![
        env("SESSION_NAME", instance.name_any()),
        env(
            "SESSION_NAMESPACE",
            instance.meta().namespace.clone().unwrap_or_default(),
        ),
        env("GIT_USER_NAME", &args.identity.git_user_name),
        env("GIT_USER_EMAIL", &args.identity.git_user_email),
        env("REPOS_JSON", repos_json),
    ];
    envs.extend(object_store_env(store));
    if let Some(workflow) = &instance.spec.active_workflow {
        envs.push(env("ACTIVE_WORKFLOW_GIT_URL", &workflow.git_url));
        envs.push(env("ACTIVE_WORKFLOW_BRANCH", &workflow.branch));
        envs.push(env("ACTIVE_WORKFLOW_PATH", &workflow.path));
    }
    envs.push(env_from_secret_key(
        "GIT_BOT_TOKEN",
        BOT_TOKEN_SECRET_NAME,
        BOT_TOKEN_SECRET_KEY,
    ));

    Container {
        name: "init-hydrate".to_string(),
        image: Some(args.images.runner_image.clone()),
        image_pull_policy: Some(args.images.image_pull_policy.clone()),
        command: Some(vec!["/usr/local/bin/hydrate-workspace.sh".to_string()]),
        env: Some(envs),
        volume_mounts: Some(vec![
            VolumeMount {
                name: WORKSPACE_VOLUME.to_string(),
                mount_path: WORKSPACE_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: WORKSPACE_VOLUME.to_string(),
                mount_path: SDK_STATE_MOUNT_PATH.to_string(),
                sub_path: Some(SDK_STATE_SUBPATH.to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn runner_container(
    instance: &AgenticSession,
    args: &OperatorArgs,
    is_resume: bool,
) -> Container {
    let spec = &instance.spec;
    let mut envs = vec![
        env("SESSION_NAME", instance.name_any()),
        env(
            "SESSION_NAMESPACE",
            instance.meta().namespace.clone().unwrap_or_default(),
        ),
        env("SESSION_ID", instance.name_any()),
        env("USER_ID", &spec.user_context.user_id),
        env(
            "USER_NAME",
            spec.user_context
                .display_name
                .clone()
                .unwrap_or_else(|| spec.user_context.user_id.clone()),
        ),
        env("LLM_MODEL", &spec.llm_settings.model),
        env("LLM_TEMPERATURE", spec.llm_settings.temperature.to_string()),
        env("LLM_MAX_TOKENS", spec.llm_settings.max_tokens.to_string()),
        env("INTERACTIVE", spec.interactive.to_string()),
        env("TIMEOUT_SECONDS", spec.timeout.to_string()),
        env("WORKSPACE_PATH", WORKSPACE_MOUNT_PATH),
        env("ARTIFACTS_SUBDIR", "artifacts"),
        env("INITIAL_PROMPT", &spec.initial_prompt),
        env_from_secret_key("GIT_BOT_TOKEN", BOT_TOKEN_SECRET_NAME, BOT_TOKEN_SECRET_KEY),
    ];
    if is_resume {
        envs.push(env("IS_RESUME", "true"));
    }
    if args.integrations.vertex_enabled() {
        if let Some(region) = &args.integrations.cloud_ml_region {
            envs.push(env("CLOUD_ML_REGION", region));
        }
        if let Some(project) = &args.integrations.anthropic_vertex_project_id {
            envs.push(env("ANTHROPIC_VERTEX_PROJECT_ID", project));
        }
        envs.push(env(
            "GOOGLE_APPLICATION_CREDENTIALS",
            "/var/run/secrets/vertex/credentials.json",
        ));
    }
    if let Some(parent) = instance
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::PARENT_SESSION_ID))
        && !parent.is_empty()
        && parent != &instance.name_any()
    {
        envs.push(env("PARENT_SESSION_ID", parent));
    }
    // CR-provided environment variables override the base env with the
    // same key (spec.md §4.5).
    for (key, value) in &spec.environment_variables {
        if let Some(existing) = envs.iter_mut().find(|e| &e.name == key) {
            existing.value = Some(value.clone());
            existing.value_from = None;
        } else {
            envs.push(env(key, value));
        }
    }

    let mut env_from = Vec::new();
    if !args.integrations.vertex_enabled() {
        env_from.push(EnvFromSource {
            secret_ref: Some(k8s_openapi::api::core::v1::SecretEnvSource {
                name: BOT_TOKEN_SECRET_NAME.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        });
    }
    env_from.push(EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: super::storage::INTEGRATION_SECRET_NAME.to_string(),
            optional: Some(true),
        }),
        ..Default::default()
    });

    Container {
        name: "runner".to_string(),
        image: Some(args.images.runner_image.clone()),
        image_pull_policy: Some(args.images.image_pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("runner-api".to_string()),
            container_port: RUNNER_PORT,
            ..Default::default()
        }]),
        env: Some(envs),
        env_from: Some(env_from),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(k8s_openapi::api::core::v1::Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: WORKSPACE_VOLUME.to_string(),
                mount_path: WORKSPACE_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: WORKSPACE_VOLUME.to_string(),
                mount_path: SDK_STATE_MOUNT_PATH.to_string(),
                sub_path: Some(SDK_STATE_SUBPATH.to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn content_sidecar(args: &OperatorArgs) -> Container {
    Container {
        name: "content".to_string(),
        image: Some(args.images.content_service_image.clone()),
        image_pull_policy: Some(args.images.image_pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: CONTENT_PORT,
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".to_string()),
                port: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String(
                    "http".to_string(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: WORKSPACE_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn state_sync_sidecar(instance: &AgenticSession, store: Option<&ObjectStoreConfig>, args: &OperatorArgs) -> Container {
    let mut envs = vec![
        env("SESSION_NAME", instance.name_any()),
        env(
            "SESSION_NAMESPACE",
            instance.meta().namespace.clone().unwrap_or_default(),
        ),
        env(
            "SYNC_PATHS",
            "workspace/.claude,workspace/artifacts,workspace/uploads",
        ),
    ];
    envs.extend(object_store_env(store));
    Container {
        name: "state-sync".to_string(),
        image: Some(args.images.state_sync_image.clone()),
        image_pull_policy: Some(args.images.image_pull_policy.clone()),
        env: Some(envs),
        resources: Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                (
                    "cpu".to_string(),
                    k8s_openapi::apimachinery::pkg::api::resource::Quantity("250m".to_string()),
                ),
                (
                    "memory".to_string(),
                    k8s_openapi::apimachinery::pkg::api::resource::Quantity("256Mi".to_string()),
                ),
            ])),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: WORKSPACE_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Composes the session's runner pod (spec.md §4.5): one init container
/// plus three long-running containers sharing a single ephemeral
/// workspace volume.
pub fn compose_pod(
    instance: &AgenticSession,
    args: &OperatorArgs,
    store: Option<&ObjectStoreConfig>,
    is_resume: bool,
) -> Pod {
    let name = instance.name_any();
    let repos_json = serde_json::to_string(&instance.spec.repos).unwrap_or_default();

    let mut volumes = vec![
        Volume {
            name: WORKSPACE_VOLUME.to_string(),
            empty_dir: Some(k8s_openapi::api::core::v1::EmptyDirVolumeSource {
                size_limit: Some(k8s_openapi::apimachinery::pkg::api::resource::Quantity(
                    "10Gi".to_string(),
                )),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "google-oauth".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(oauth_secret_name(&name)),
                optional: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if args.integrations.vertex_enabled() {
        volumes.push(Volume {
            name: "vertex-credentials".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(VERTEX_SECRET_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(&name)),
            namespace: instance.meta().namespace.clone(),
            labels: Some(pod_labels(&name)),
            owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(30),
            automount_service_account_token: Some(false),
            service_account_name: Some(format!("ambient-session-{name}")),
            volumes: Some(volumes),
            init_containers: Some(vec![init_hydrate_container(
                instance,
                args,
                store,
                &repos_json,
            )]),
            containers: vec![
                runner_container(instance, args, is_resume),
                content_sidecar(args),
                state_sync_sidecar(instance, store, args),
            ],
            ..Default::default()
        }),
        status: None,
    }
}

/// An empty placeholder OAuth secret so the pod's volume mount exists
/// before the user completes Google OAuth — populated in place afterwards
/// (spec.md §4.5).
pub fn placeholder_oauth_secret(instance: &AgenticSession) -> k8s_openapi::api::core::v1::Secret {
    k8s_openapi::api::core::v1::Secret {
        metadata: ObjectMeta {
            name: Some(oauth_secret_name(&instance.name_any())),
            namespace: instance.meta().namespace.clone(),
            owner_references: Some(vec![instance.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

pub fn pod_name_for(session: &str) -> String {
    pod_name(session)
}
