use clap::Parser;

/// Namespace where the operator deployment and cluster-wide shared secrets
/// (Vertex credentials, Langfuse credentials, `minio-credentials`) live.
#[derive(Parser, Debug, Clone)]
pub struct BackendArgs {
    #[arg(long, env = "BACKEND_NAMESPACE", default_value = "ambient-code")]
    pub backend_namespace: String,
}

/// Pinned container image references for the pod composer (C6).
#[derive(Parser, Debug, Clone)]
pub struct ImageArgs {
    #[arg(
        long,
        env = "AMBIENT_CODE_RUNNER_IMAGE",
        default_value = "quay.io/ambient-code/runner:latest"
    )]
    pub runner_image: String,

    #[arg(
        long,
        env = "CONTENT_SERVICE_IMAGE",
        default_value = "quay.io/ambient-code/content-service:latest"
    )]
    pub content_service_image: String,

    #[arg(
        long,
        env = "STATE_SYNC_IMAGE",
        default_value = "quay.io/ambient-code/state-sync:latest"
    )]
    pub state_sync_image: String,

    #[arg(long, env = "IMAGE_PULL_POLICY", default_value = "IfNotPresent")]
    pub image_pull_policy: String,
}

/// Shared-cluster object-store defaults (C5 falls back to these when a
/// namespace has no `integration` secret, or it isn't in `custom` mode).
#[derive(Parser, Debug, Clone)]
pub struct ObjectStoreArgs {
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,
}

/// Vertex/Langfuse integration toggles and the env vars forwarded
/// verbatim into the runner container when present.
#[derive(Parser, Debug, Clone)]
pub struct IntegrationArgs {
    #[arg(long, env = "CLAUDE_CODE_USE_VERTEX", default_value = "0")]
    pub claude_code_use_vertex: String,

    #[arg(long, env = "LANGFUSE_ENABLED", default_value = "")]
    pub langfuse_enabled: String,

    #[arg(long, env = "CLOUD_ML_REGION")]
    pub cloud_ml_region: Option<String>,

    #[arg(long, env = "ANTHROPIC_VERTEX_PROJECT_ID")]
    pub anthropic_vertex_project_id: Option<String>,

    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub google_application_credentials: Option<String>,
}

impl IntegrationArgs {
    pub fn vertex_enabled(&self) -> bool {
        self.claude_code_use_vertex == "1"
    }

    pub fn langfuse_enabled(&self) -> bool {
        !self.langfuse_enabled.is_empty()
            && self.langfuse_enabled != "0"
            && !self.langfuse_enabled.eq_ignore_ascii_case("false")
    }
}

/// Git identity and Google OAuth client the init-hydrate container and the
/// runner are handed verbatim.
#[derive(Parser, Debug, Clone)]
pub struct IdentityArgs {
    #[arg(long, env = "GIT_USER_NAME", default_value = "ambient-code-bot")]
    pub git_user_name: String,

    #[arg(
        long,
        env = "GIT_USER_EMAIL",
        default_value = "ambient-code-bot@users.noreply.github.com"
    )]
    pub git_user_email: String,

    #[arg(long, env = "GOOGLE_OAUTH_CLIENT_ID")]
    pub google_oauth_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_OAUTH_CLIENT_SECRET")]
    pub google_oauth_client_secret: Option<String>,
}
