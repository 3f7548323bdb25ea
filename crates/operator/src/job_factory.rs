//! Job Factory
//!
//! Builds the agent Job and its ConfigMap from a run resource. Construction
//! is pure: given the same resource and the same configuration it produces
//! identical objects, so the reconciler can call it on every pass and rely
//! on name stability instead of bookkeeping.
//!
//! Image resolution fails closed: a run kind with no configured image yields
//! an error instead of a Job, which the reconciler surfaces as a terminal
//! failure on the resource.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::config::OperatorConfig;
use crate::crd::AgentRun;
use crate::error::{Error, Result};

const WORKSPACE_VOLUME: &str = "workspace";
const WORKSPACE_MOUNT_PATH: &str = "/workspace";
const CONFIG_VOLUME: &str = "run-config";
const CONFIG_MOUNT_PATH: &str = "/etc/agentrun";
const AGENT_CONTAINER: &str = "agent";

/// Stable name shared by the Job and ConfigMap owned by a run
pub fn object_name<K: AgentRun>(run: &K) -> String {
    format!("{}-{}", K::PREFIX, run.name_any())
}

#[derive(Clone)]
pub struct JobFactory {
    config: OperatorConfig,
}

impl JobFactory {
    pub fn new(config: OperatorConfig) -> Self {
        Self { config }
    }

    /// Build the agent Job for a run
    pub fn build_job<K: AgentRun>(&self, run: &K) -> Result<Job> {
        let name = object_name(run);
        let namespace = self.namespace_of(run)?;
        let image = self.resolve_image::<K>()?;
        let labels = self.build_labels(run);
        let owner = self.owner_reference(run)?;

        let container = Container {
            name: AGENT_CONTAINER.to_string(),
            image: Some(image),
            image_pull_policy: Some("IfNotPresent".to_string()),
            working_dir: Some(WORKSPACE_MOUNT_PATH.to_string()),
            env: Some(self.build_env_vars(run)),
            volume_mounts: Some(self.build_volume_mounts()),
            ..Default::default()
        };

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace),
                labels: Some(labels.clone()),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(self.config.job.backoff_limit),
                active_deadline_seconds: self.config.job.active_deadline_seconds,
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![container],
                        volumes: Some(self.build_volumes(&name)),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Build the ConfigMap mounted into the agent container
    pub fn build_config_map<K: AgentRun>(&self, run: &K) -> Result<ConfigMap> {
        let name = object_name(run);
        let namespace = self.namespace_of(run)?;
        let owner = self.owner_reference(run)?;

        let payload = serde_json::json!({
            "kind": K::KIND,
            "repositoryUrl": run.repository_url(),
            "workingDirectory": run.working_directory(),
            "sourceBranch": run.source_branch(),
            "model": run.model(),
            "githubUser": run.github_user(),
        });

        let mut data = BTreeMap::new();
        data.insert("run.json".to_string(), serde_json::to_string_pretty(&payload)?);

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace),
                labels: Some(self.build_labels(run)),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    fn resolve_image<K: AgentRun>(&self) -> Result<String> {
        let agent = self
            .config
            .agents
            .for_prefix(K::PREFIX)
            .ok_or_else(|| Error::ImageResolution {
                kind: K::KIND.to_string(),
            })?;

        if agent.image.trim().is_empty() || agent.tag.trim().is_empty() {
            return Err(Error::ImageResolution {
                kind: K::KIND.to_string(),
            });
        }

        Ok(format!("{}:{}", agent.image, agent.tag))
    }

    fn namespace_of<K: AgentRun>(&self, run: &K) -> Result<String> {
        run.namespace().ok_or_else(|| Error::MissingObjectKey {
            name: run.name_any(),
            key: ".metadata.namespace",
        })
    }

    fn owner_reference<K: AgentRun>(&self, run: &K) -> Result<OwnerReference> {
        run.controller_owner_ref(&()).ok_or_else(|| Error::MissingObjectKey {
            name: run.name_any(),
            key: ".metadata.uid",
        })
    }

    fn build_labels<K: AgentRun>(&self, run: &K) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("app.kubernetes.io/name".to_string(), "agentrun".to_string());
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "agentrun-operator".to_string(),
        );
        labels.insert("agentrun.io/kind".to_string(), K::KIND.to_string());
        labels.insert("agentrun.io/run".to_string(), run.name_any());
        labels
    }

    fn build_env_vars<K: AgentRun>(&self, run: &K) -> Vec<EnvVar> {
        let pairs = [
            ("REPOSITORY_URL", run.repository_url()),
            ("WORKING_DIRECTORY", run.working_directory()),
            ("SOURCE_BRANCH", run.source_branch()),
            ("MODEL", run.model()),
            ("GITHUB_USER", run.github_user()),
        ];

        pairs
            .iter()
            .map(|(name, value)| EnvVar {
                name: (*name).to_string(),
                value: Some((*value).to_string()),
                ..Default::default()
            })
            .collect()
    }

    fn build_volumes(&self, configmap_name: &str) -> Vec<Volume> {
        vec![
            Volume {
                name: WORKSPACE_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    size_limit: Some(Quantity(self.config.storage.workspace_size.clone())),
                    medium: None,
                }),
                ..Default::default()
            },
            Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(configmap_name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]
    }

    fn build_volume_mounts(&self) -> Vec<VolumeMount> {
        vec![
            VolumeMount {
                name: WORKSPACE_VOLUME.to_string(),
                mount_path: WORKSPACE_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CodeRun, CodeRunSpec, DocsRun, DocsRunSpec};

    fn configured() -> OperatorConfig {
        let mut config = OperatorConfig::default();
        config.agents.code.image = "ghcr.io/acme/code-agent".to_string();
        config.agents.code.tag = "1.4.0".to_string();
        config.agents.docs.image = "ghcr.io/acme/docs-agent".to_string();
        config
    }

    fn make_code_run(name: &str) -> CodeRun {
        let mut run = CodeRun::new(
            name,
            CodeRunSpec {
                repository_url: "https://github.com/acme/widgets".to_string(),
                working_directory: "services/api".to_string(),
                source_branch: "main".to_string(),
                model: "large-v2".to_string(),
                github_user: "acme-bot".to_string(),
            },
        );
        run.metadata.namespace = Some("agents".to_string());
        run.metadata.uid = Some("11111111-2222-3333-4444-555555555555".to_string());
        run
    }

    fn make_docs_run(name: &str) -> DocsRun {
        let mut run = DocsRun::new(
            name,
            DocsRunSpec {
                repository_url: "git@github.com:acme/widgets.git".to_string(),
                working_directory: "docs".to_string(),
                source_branch: "main".to_string(),
                model: "small-v1".to_string(),
                github_user: "acme-bot".to_string(),
            },
        );
        run.metadata.namespace = Some("agents".to_string());
        run.metadata.uid = Some("66666666-7777-8888-9999-000000000000".to_string());
        run
    }

    #[test]
    fn test_object_name_is_stable_per_kind() {
        assert_eq!(object_name(&make_code_run("demo")), "code-demo");
        assert_eq!(object_name(&make_docs_run("demo")), "docs-demo");
    }

    #[test]
    fn test_build_job_is_deterministic() {
        let factory = JobFactory::new(configured());
        let run = make_code_run("demo");

        let first = factory.build_job(&run).unwrap();
        let second = factory.build_job(&run).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_job_contents() {
        let factory = JobFactory::new(configured());
        let run = make_code_run("demo");

        let job = factory.build_job(&run).unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("code-demo"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("agents"));

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(2));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("ghcr.io/acme/code-agent:1.4.0"));
        assert_eq!(container.working_dir.as_deref(), Some("/workspace"));

        let env: BTreeMap<_, _> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect();
        assert_eq!(env["REPOSITORY_URL"], "https://github.com/acme/widgets");
        assert_eq!(env["WORKING_DIRECTORY"], "services/api");
        assert_eq!(env["SOURCE_BRANCH"], "main");
        assert_eq!(env["MODEL"], "large-v2");
        assert_eq!(env["GITHUB_USER"], "acme-bot");
    }

    #[test]
    fn test_workspace_volume_sized_from_config() {
        let mut config = configured();
        config.storage.workspace_size = "10Gi".to_string();
        let factory = JobFactory::new(config);

        let job = factory.build_job(&make_code_run("demo")).unwrap();
        let volumes = job
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .volumes
            .unwrap();

        let workspace = volumes.iter().find(|v| v.name == WORKSPACE_VOLUME).unwrap();
        assert_eq!(
            workspace.empty_dir.as_ref().unwrap().size_limit,
            Some(Quantity("10Gi".to_string()))
        );
    }

    #[test]
    fn test_owner_reference_flags_controller() {
        let factory = JobFactory::new(configured());
        let run = make_code_run("demo");

        let job = factory.build_job(&run).unwrap();
        let owners = job.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "CodeRun");
        assert_eq!(owners[0].name, "demo");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_unconfigured_image_fails_closed() {
        let factory = JobFactory::new(OperatorConfig::default());
        let err = factory.build_job(&make_code_run("demo")).unwrap_err();
        assert!(matches!(err, Error::ImageResolution { ref kind } if kind == "CodeRun"));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_missing_uid_is_an_error() {
        let factory = JobFactory::new(configured());
        let mut run = make_code_run("demo");
        run.metadata.uid = None;

        let err = factory.build_job(&run).unwrap_err();
        assert!(matches!(err, Error::MissingObjectKey { key, .. } if key == ".metadata.uid"));
    }

    #[test]
    fn test_config_map_carries_run_coordinates() {
        let factory = JobFactory::new(configured());
        let run = make_docs_run("guide");

        let cm = factory.build_config_map(&run).unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some("docs-guide"));

        let data = cm.data.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&data["run.json"]).unwrap();
        assert_eq!(parsed["kind"], "DocsRun");
        assert_eq!(parsed["repositoryUrl"], "git@github.com:acme/widgets.git");
        assert_eq!(parsed["githubUser"], "acme-bot");
    }

    #[test]
    fn test_config_map_build_does_not_require_image() {
        // The ConfigMap must still build for an unconfigured kind so the
        // factory error surfaces from Job construction alone.
        let factory = JobFactory::new(OperatorConfig::default());
        assert!(factory.build_config_map(&make_code_run("demo")).is_ok());
    }

    #[test]
    fn test_labels_trace_back_to_run() {
        let factory = JobFactory::new(configured());
        let job = factory.build_job(&make_code_run("demo")).unwrap();

        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get("agentrun.io/kind").map(String::as_str), Some("CodeRun"));
        assert_eq!(labels.get("agentrun.io/run").map(String::as_str), Some("demo"));
    }
}
