//! CRD definitions for the agent run operator
//!
//! `CodeRun` and `DocsRun` carry the same checkout coordinates and the same
//! observed-state shape; they differ only in the agent image the Job Factory
//! resolves for them. Both kinds own the Job and ConfigMap they spawn, so
//! deleting a run cascades to its workload.

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

mod code_run;
mod docs_run;

pub use code_run::{CodeRun, CodeRunSpec};
pub use docs_run::{DocsRun, DocsRunSpec};

/// RunStatus defines the observed state shared by both run kinds
#[derive(Debug, Clone, Default, Deserialize, JsonSchema, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    #[serde(default)]
    pub phase: RunPhase,
    /// Human-readable summary, overwritten on every phase transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC 3339 timestamp of the most recent phase transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    /// Name of the owned Job, set once at creation and never changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Name of the owned ConfigMap, set once at creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configmap_name: Option<String>,
    /// Written by the agent container, never by this controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
    /// RFC 3339 timestamp recorded when the owned workload was reclaimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_completed_at: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Run phase enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunPhase {
    /// Terminal phases are never left once entered
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Pending => "Pending",
            RunPhase::Running => "Running",
            RunPhase::Completed => "Completed",
            RunPhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents one observation in the run's condition history
#[derive(Debug, Clone, Deserialize, JsonSchema, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (JobCreated, JobRunning, JobSucceeded, JobFailed, CleanedUp)
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the status value changed
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Common surface of the two run kinds.
///
/// The reconciler, job factory, and cleanup scheduler are all generic over
/// this trait so one state machine serves both CRDs.
pub trait AgentRun:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Serialize
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Kind string as served by the API (`CodeRun`, `DocsRun`)
    const KIND: &'static str;
    /// Short prefix used to derive the names of owned objects
    const PREFIX: &'static str;

    fn repository_url(&self) -> &str;
    fn working_directory(&self) -> &str;
    fn source_branch(&self) -> &str;
    fn model(&self) -> &str;
    fn github_user(&self) -> &str;
    fn run_status(&self) -> Option<&RunStatus>;
}
