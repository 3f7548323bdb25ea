//! DocsRun CRD - documentation agent run against a repository

use super::{AgentRun, RunStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DocsRun requests a documentation agent run against a repository
#[derive(CustomResource, Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "agentrun.io",
    version = "v1alpha1",
    kind = "DocsRun",
    namespaced,
    status = "RunStatus",
    shortname = "docsrun",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DocsRunSpec {
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

impl AgentRun for DocsRun {
    const KIND: &'static str = "DocsRun";
    const PREFIX: &'static str = "docs";

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
