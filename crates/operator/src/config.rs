//! Operator configuration
//!
//! Deployment-level knobs only; nothing here is per-resource. Values are
//! layered from built-in defaults, an optional config file, and
//! `OPERATOR_`-prefixed environment variables (`__` separates nesting, e.g.
//! `OPERATOR_CLEANUP__ENABLED=false`).

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OperatorConfig {
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Deferred reclamation of finished workloads
#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
    /// Minutes a Completed run keeps its Job before deletion
    #[serde(default = "default_completed_delay_minutes")]
    pub completed_job_delay_minutes: u64,
    /// Minutes a Failed run keeps its Job before deletion, longer to leave
    /// time for debugging
    #[serde(default = "default_failed_delay_minutes")]
    pub failed_job_delay_minutes: u64,
    #[serde(default = "default_delete_config_map")]
    pub delete_config_map: bool,
    /// Seconds between scheduler ticks
    #[serde(default = "default_cleanup_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_completed_delay_minutes() -> u64 {
    5
}

fn default_failed_delay_minutes() -> u64 {
    60
}

fn default_delete_config_map() -> bool {
    true
}

fn default_cleanup_interval_seconds() -> u64 {
    60
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            completed_job_delay_minutes: default_completed_delay_minutes(),
            failed_job_delay_minutes: default_failed_delay_minutes(),
            delete_config_map: default_delete_config_map(),
            interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Size of the ephemeral workspace volume mounted into the agent
    #[serde(default = "default_workspace_size")]
    pub workspace_size: String,
}

fn default_workspace_size() -> String {
    "2Gi".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace_size: default_workspace_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: i32,
    /// Optional hard deadline on the whole Job
    #[serde(default)]
    pub active_deadline_seconds: Option<i64>,
    /// Requeue cadence while a run is executing, so a missed watch event
    /// cannot strand a resource in Running
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
}

fn default_backoff_limit() -> i32 {
    2
}

fn default_monitor_interval_seconds() -> u64 {
    90
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            backoff_limit: default_backoff_limit(),
            active_deadline_seconds: None,
            monitor_interval_seconds: default_monitor_interval_seconds(),
        }
    }
}

/// Per-kind agent container images. Left empty on purpose: an unconfigured
/// kind fails closed at Job construction rather than running some default
/// image against the user's repository.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentsConfig {
    #[serde(default)]
    pub code: AgentImage,
    #[serde(default)]
    pub docs: AgentImage,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentImage {
    #[serde(default)]
    pub image: String,
    #[serde(default = "default_image_tag")]
    pub tag: String,
}

fn default_image_tag() -> String {
    "latest".to_string()
}

impl Default for AgentImage {
    fn default() -> Self {
        Self {
            image: String::new(),
            tag: default_image_tag(),
        }
    }
}

impl AgentsConfig {
    /// Image configuration for a run-kind prefix (`code`, `docs`)
    pub fn for_prefix(&self, prefix: &str) -> Option<&AgentImage> {
        match prefix {
            "code" => Some(&self.code),
            "docs" => Some(&self.docs),
            _ => None,
        }
    }
}

impl OperatorConfig {
    pub fn load(config_file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("config/operator").required(false));
        }

        let s = builder
            .add_source(config::Environment::with_prefix("OPERATOR").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OperatorConfig::default();
        assert!(config.cleanup.enabled);
        assert_eq!(config.cleanup.completed_job_delay_minutes, 5);
        assert_eq!(config.cleanup.failed_job_delay_minutes, 60);
        assert!(config.cleanup.delete_config_map);
        assert_eq!(config.cleanup.interval_seconds, 60);
        assert_eq!(config.storage.workspace_size, "2Gi");
        assert_eq!(config.job.backoff_limit, 2);
        assert_eq!(config.job.active_deadline_seconds, None);
        assert_eq!(config.job.monitor_interval_seconds, 90);
    }

    #[test]
    fn test_agent_images_default_unconfigured() {
        let agents = AgentsConfig::default();
        assert!(agents.code.image.is_empty());
        assert_eq!(agents.code.tag, "latest");
    }

    #[test]
    fn test_for_prefix_resolution() {
        let mut agents = AgentsConfig::default();
        agents.code.image = "ghcr.io/acme/code-agent".to_string();

        assert_eq!(
            agents.for_prefix("code").map(|a| a.image.as_str()),
            Some("ghcr.io/acme/code-agent")
        );
        assert!(agents.for_prefix("docs").is_some());
        assert!(agents.for_prefix("other").is_none());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: OperatorConfig = serde_json::from_value(serde_json::json!({
            "cleanup": { "completed_job_delay_minutes": 1 }
        }))
        .unwrap();

        assert_eq!(config.cleanup.completed_job_delay_minutes, 1);
        assert_eq!(config.cleanup.failed_job_delay_minutes, 60);
        assert!(config.cleanup.enabled);
    }
}
