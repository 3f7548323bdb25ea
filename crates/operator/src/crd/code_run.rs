//! CodeRun CRD - one-shot coding agent run against a repository

use super::{AgentRun, RunStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CodeRun requests an autonomous coding agent run against a repository
#[derive(CustomResource, Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "agentrun.io",
    version = "v1alpha1",
    kind = "CodeRun",
    namespaced,
    status = "RunStatus",
    shortname = "coderun",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CodeRunSpec {
    /// Git URL of the repository the agent checks out (https or ssh)
    #[schemars(regex(pattern = r"^(https://|ssh://|git@).+"))]
    pub repository_url: String,

    /// Directory inside the checkout the agent operates from
    #[schemars(length(min = 1))]
    pub working_directory: String,

    /// Branch the agent starts from
    #[schemars(length(min = 1))]
    pub source_branch: String,

    /// Model identifier handed to the agent container, opaque to the operator
    #[schemars(length(min = 1))]
    pub model: String,

    /// GitHub identity the agent commits as
    #[schemars(length(min = 1))]
    pub github_user: String,
}

impl AgentRun for CodeRun {
    const KIND: &'static str = "CodeRun";
    const PREFIX: &'static str = "code";

    fn repository_url(&self) -> &str {
        &self.spec.repository_url
    }

    fn working_directory(&self) -> &str {
        &self.spec.working_directory
    }

    fn source_branch(&self) -> &str {
        &self.spec.source_branch
    }

    fn model(&self) -> &str {
        &self.spec.model
    }

    fn github_user(&self) -> &str {
        &self.spec.github_user
    }

    fn run_status(&self) -> Option<&RunStatus> {
        self.status.as_ref()
    }
}
