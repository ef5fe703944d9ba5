use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// Annotation keys the HTTP layer and the core read/write by convention.
pub mod annotations {
    pub const DESIRED_PHASE: &str = "ambient-code.io/desired-phase";
    pub const START_REQUESTED_AT: &str = "ambient-code.io/start-requested-at";
    pub const STOP_REQUESTED_AT: &str = "ambient-code.io/stop-requested-at";
    pub const PARENT_SESSION_ID: &str = "ambient-code.io/parent-session-id";
    pub const RUNNER_TOKEN_SECRET: &str = "ambient-code.io/runner-token-secret";
    pub const RUNNER_SA: &str = "ambient-code.io/runner-sa";
    pub const TOKEN_REFRESHED_AT: &str = "ambient-code.io/token-refreshed-at";
}

/// Condition `type` values the core writes to `status.conditions`.
pub mod condition_types {
    pub const READY: &str = "Ready";
    pub const SECRETS_READY: &str = "SecretsReady";
    pub const POD_CREATED: &str = "PodCreated";
    pub const POD_SCHEDULED: &str = "PodScheduled";
    pub const RUNNER_STARTED: &str = "RunnerStarted";
    pub const REPOS_RECONCILED: &str = "ReposReconciled";
    pub const WORKFLOW_RECONCILED: &str = "WorkflowReconciled";
    pub const RECONCILED: &str = "Reconciled";
    pub const S3_AVAILABLE: &str = "S3Available";
    pub const INTEGRATION_SECRETS_READY: &str = "IntegrationSecretsReady";
}

/// Desired-state user-intent override read from the `desired-phase`
/// annotation. Parsed into a closed sum (rather than left as
/// `Option<String>`) so phase-selection code can match it exhaustively.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DesiredPhase {
    Running,
    Stopped,
    #[default]
    Unset,
}

impl FromStr for DesiredPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(DesiredPhase::Running),
            "Stopped" => Ok(DesiredPhase::Stopped),
            _ => Err(()),
        }
    }
}

impl DesiredPhase {
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        annotations
            .get(self::annotations::DESIRED_PHASE)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LlmSettings {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default, rename = "maxTokens")]
    pub max_tokens: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct UserContext {
    #[serde(default, rename = "userId")]
    pub user_id: String,

    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RepoRef {
    pub url: String,

    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ActiveWorkflow {
    #[serde(rename = "gitUrl")]
    pub git_url: String,

    pub branch: String,

    #[serde(default)]
    pub path: String,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "ambient-code.io",
    version = "v1",
    kind = "AgenticSession",
    plural = "agenticsessions",
    derive = "PartialEq",
    status = "AgenticSessionStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.observedGeneration\", \"name\": \"OBSERVED-GEN\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.startTime\", \"name\": \"START-TIME\", \"type\": \"date\" }"
)]
pub struct AgenticSessionSpec {
    #[serde(default, rename = "initialPrompt")]
    pub initial_prompt: String,

    #[serde(default)]
    pub interactive: bool,

    #[serde(default)]
    pub timeout: i64,

    #[serde(default, rename = "autoPushOnComplete")]
    pub auto_push_on_complete: bool,

    #[serde(default, rename = "llmSettings")]
    pub llm_settings: LlmSettings,

    #[serde(default, rename = "environmentVariables")]
    pub environment_variables: BTreeMap<String, String>,

    #[serde(default, rename = "userContext")]
    pub user_context: UserContext,

    #[serde(default)]
    pub repos: Vec<RepoRef>,

    #[serde(default, rename = "activeWorkflow")]
    pub active_workflow: Option<ActiveWorkflow>,
}

/// A short description of the [`AgenticSession`] resource's current state.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum AgenticSessionPhase {
    #[default]
    Pending,

    Creating,

    Running,

    Stopping,

    Stopped,

    Completed,

    Failed,
}

impl AgenticSessionPhase {
    /// Terminal phases have no owned pod (eventually): I2.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgenticSessionPhase::Stopped
                | AgenticSessionPhase::Completed
                | AgenticSessionPhase::Failed
        )
    }
}

impl FromStr for AgenticSessionPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(AgenticSessionPhase::Pending),
            "Creating" => Ok(AgenticSessionPhase::Creating),
            "Running" => Ok(AgenticSessionPhase::Running),
            "Stopping" => Ok(AgenticSessionPhase::Stopping),
            "Stopped" => Ok(AgenticSessionPhase::Stopped),
            "Completed" => Ok(AgenticSessionPhase::Completed),
            "Failed" => Ok(AgenticSessionPhase::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AgenticSessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgenticSessionPhase::Pending => write!(f, "Pending"),
            AgenticSessionPhase::Creating => write!(f, "Creating"),
            AgenticSessionPhase::Running => write!(f, "Running"),
            AgenticSessionPhase::Stopping => write!(f, "Stopping"),
            AgenticSessionPhase::Stopped => write!(f, "Stopped"),
            AgenticSessionPhase::Completed => write!(f, "Completed"),
            AgenticSessionPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ReconciledRepo {
    pub url: String,

    #[serde(default)]
    pub branch: Option<String>,

    pub name: String,

    pub status: String,

    #[serde(rename = "clonedAt")]
    pub cloned_at: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ReconciledWorkflow {
    #[serde(rename = "gitUrl")]
    pub git_url: String,

    pub branch: String,

    #[serde(default)]
    pub path: String,

    pub status: String,

    #[serde(rename = "appliedAt")]
    pub applied_at: String,
}

/// Status object for the [`AgenticSession`] resource. Written only through
/// the StatusPatch accumulator (`util::patch::StatusPatch`) — never
/// mutated directly elsewhere in the core.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct AgenticSessionStatus {
    #[serde(default)]
    pub phase: AgenticSessionPhase,

    #[serde(default, rename = "observedGeneration")]
    pub observed_generation: i64,

    #[serde(default, rename = "startTime")]
    pub start_time: Option<String>,

    #[serde(default, rename = "completionTime")]
    pub completion_time: Option<String>,

    #[serde(default, rename = "reconciledRepos")]
    pub reconciled_repos: Vec<ReconciledRepo>,

    #[serde(default, rename = "reconciledWorkflow")]
    pub reconciled_workflow: Option<ReconciledWorkflow>,

    /// Incremented each time the pod is recreated for a session that has
    /// already started once. Kept alongside the `startTime`-derived resume
    /// signal rather than replacing it: one answers "is this a resume", the
    /// other answers "how many times".
    #[serde(default, rename = "sdkRestartCount")]
    pub sdk_restart_count: u32,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
