//! Run reconciler
//!
//! One controller per run kind, both driving the same state machine:
//! Pending -> Running -> Completed | Failed. The resource's `jobName` is the
//! pivot: unset means the workload still has to be created, set means the
//! Job is monitored until it reaches a terminal state. Terminal phases are
//! latched and never left.
//!
//! Transient cluster errors never touch `status.phase`; they bounce back to
//! the work queue with an exponential requeue delay. Factory errors are
//! terminal and recorded on the resource instead of being retried.

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::conditions::{
    upsert_condition, CONDITION_TRUE, TYPE_JOB_CREATED, TYPE_JOB_FAILED, TYPE_JOB_RUNNING,
    TYPE_JOB_SUCCEEDED,
};
use crate::config::OperatorConfig;
use crate::crd::{AgentRun, Condition, RunPhase};
use crate::error::{Error, Result};
use crate::job_factory::{object_name, JobFactory};

const BASE_REQUEUE_SECS: u64 = 5;
const MAX_REQUEUE_SECS: u64 = 300;

/// Shared state handed to every reconcile invocation
pub struct Context {
    pub client: Client,
    pub namespace: String,
    pub config: OperatorConfig,
    pub factory: JobFactory,
    error_counts: Mutex<HashMap<String, u32>>,
}

impl Context {
    pub fn new(client: Client, namespace: String, config: OperatorConfig) -> Self {
        Self {
            client,
            namespace,
            factory: JobFactory::new(config.clone()),
            config,
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    fn note_error(&self, key: &str) -> u32 {
        let mut counts = self.error_counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn clear_errors(&self, key: &str) {
        let mut counts = self.error_counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.remove(key);
    }
}

/// Observed state of the owned Job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotFound,
    Running,
    Completed,
    Failed,
}

/// Map a Job's status block to its observed state.
///
/// Completion conditions are authoritative; the succeeded/failed counters
/// cover API servers that have not written conditions yet.
pub fn job_state_of(status: &k8s_openapi::api::batch::v1::JobStatus) -> JobState {
    if let Some(conditions) = &status.conditions {
        for condition in conditions {
            if condition.type_ == "Complete" && condition.status == "True" {
                return JobState::Completed;
            }
            if condition.type_ == "Failed" && condition.status == "True" {
                return JobState::Failed;
            }
        }
    }

    if status.succeeded.unwrap_or(0) > 0 {
        return JobState::Completed;
    }
    if status.failed.unwrap_or(0) > 0 {
        return JobState::Failed;
    }

    JobState::Running
}

async fn check_job_state(jobs: &Api<Job>, job_name: &str) -> Result<JobState> {
    match jobs.get(job_name).await {
        Ok(job) => Ok(job
            .status
            .as_ref()
            .map(job_state_of)
            .unwrap_or(JobState::Running)),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(JobState::NotFound),
        Err(e) => Err(e.into()),
    }
}

/// Phase transition gate. `None` means stay put: either nothing changed or
/// the current phase is terminal and must not regress.
pub fn next_phase(current: RunPhase, observed: JobState) -> Option<RunPhase> {
    if current.is_terminal() {
        return None;
    }
    match observed {
        JobState::Completed => Some(RunPhase::Completed),
        JobState::Failed | JobState::NotFound => Some(RunPhase::Failed),
        JobState::Running => {
            if current == RunPhase::Running {
                None
            } else {
                Some(RunPhase::Running)
            }
        }
    }
}

/// Deterministic exponential requeue delay for transient errors
pub fn backoff_delay(error_count: u32) -> Duration {
    let exp = error_count.min(16);
    let secs = BASE_REQUEUE_SECS
        .saturating_mul(1u64 << exp)
        .min(MAX_REQUEUE_SECS);
    Duration::from_secs(secs)
}

pub async fn reconcile<K: AgentRun>(run: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let name = run.name_any();
    let current = run.run_status().map(|s| s.phase).unwrap_or_default();

    if current.is_terminal() {
        ctx.clear_errors(&error_key::<K>(&name));
        return Ok(Action::await_change());
    }

    let action = match run.run_status().and_then(|s| s.job_name.clone()) {
        None => create_agent_job(&run, &ctx).await?,
        Some(job_name) => monitor_agent_job(&run, &job_name, &ctx).await?,
    };

    ctx.clear_errors(&error_key::<K>(&name));
    Ok(action)
}

pub fn error_policy<K: AgentRun>(run: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = run.name_any();
    let attempts = ctx.note_error(&error_key::<K>(&name));
    let delay = backoff_delay(attempts.saturating_sub(1));
    warn!(
        kind = K::KIND,
        resource = %name,
        error = %error,
        retry_in_secs = delay.as_secs(),
        "Reconcile failed, backing off"
    );
    Action::requeue(delay)
}

/// Run one controller for a run kind until shutdown
pub async fn run_controller<K: AgentRun>(ctx: Arc<Context>) {
    let runs: Api<K> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    Controller::new(runs, watcher::Config::default())
        .owns(jobs, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(resource = %object.name, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconciliation error"),
            }
        })
        .await;
}

fn error_key<K: AgentRun>(name: &str) -> String {
    format!("{}/{}", K::KIND, name)
}

fn current_conditions<K: AgentRun>(run: &K) -> Vec<Condition> {
    run.run_status()
        .map(|s| s.conditions.clone())
        .unwrap_or_default()
}

async fn create_agent_job<K: AgentRun>(run: &Arc<K>, ctx: &Context) -> Result<Action> {
    let name = run.name_any();
    let runs: Api<K> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    let built = ctx
        .factory
        .build_config_map(run.as_ref())
        .and_then(|cm| ctx.factory.build_job(run.as_ref()).map(|job| (cm, job)));

    let (config_map, job) = match built {
        Ok(pair) => pair,
        Err(err) if err.is_terminal() => {
            warn!(kind = K::KIND, resource = %name, error = %err, "Job construction failed");
            let mut conditions = current_conditions(run.as_ref());
            upsert_condition(
                &mut conditions,
                TYPE_JOB_FAILED,
                CONDITION_TRUE,
                "ImageResolutionError",
                &err.to_string(),
            );
            patch_run_status(
                &runs,
                &name,
                serde_json::json!({
                    "phase": RunPhase::Failed,
                    "message": err.to_string(),
                    "lastUpdate": chrono::Utc::now().to_rfc3339(),
                    "conditions": serde_json::to_value(&conditions)?,
                }),
            )
            .await?;
            return Ok(Action::await_change());
        }
        Err(err) => return Err(err),
    };

    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    create_ignoring_conflict(&configmaps, &config_map).await?;
    create_ignoring_conflict(&jobs, &job).await?;

    let object = object_name(run.as_ref());
    info!(kind = K::KIND, resource = %name, job = %object, "Agent job created");

    let mut conditions = current_conditions(run.as_ref());
    upsert_condition(
        &mut conditions,
        TYPE_JOB_CREATED,
        CONDITION_TRUE,
        "JobCreated",
        "Agent job and config created",
    );
    patch_run_status(
        &runs,
        &name,
        serde_json::json!({
            "phase": RunPhase::Running,
            "message": "Agent job created",
            "lastUpdate": chrono::Utc::now().to_rfc3339(),
            "jobName": object,
            "configmapName": object,
            "conditions": serde_json::to_value(&conditions)?,
        }),
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(
        ctx.config.job.monitor_interval_seconds,
    )))
}

async fn monitor_agent_job<K: AgentRun>(
    run: &Arc<K>,
    job_name: &str,
    ctx: &Context,
) -> Result<Action> {
    let name = run.name_any();
    let runs: Api<K> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    let observed = check_job_state(&jobs, job_name).await?;
    let current = run.run_status().map(|s| s.phase).unwrap_or_default();
    let monitor = Duration::from_secs(ctx.config.job.monitor_interval_seconds);

    match next_phase(current, observed) {
        None => Ok(Action::requeue(monitor)),
        Some(RunPhase::Running) | Some(RunPhase::Pending) => {
            let mut conditions = current_conditions(run.as_ref());
            upsert_condition(
                &mut conditions,
                TYPE_JOB_RUNNING,
                CONDITION_TRUE,
                "JobRunning",
                "Agent job is executing",
            );
            patch_run_status(
                &runs,
                &name,
                serde_json::json!({
                    "phase": RunPhase::Running,
                    "message": "Agent job is executing",
                    "lastUpdate": chrono::Utc::now().to_rfc3339(),
                    "conditions": serde_json::to_value(&conditions)?,
                }),
            )
            .await?;
            Ok(Action::requeue(monitor))
        }
        Some(RunPhase::Completed) => {
            info!(kind = K::KIND, resource = %name, job = %job_name, "Agent job completed");
            let mut conditions = current_conditions(run.as_ref());
            upsert_condition(
                &mut conditions,
                TYPE_JOB_SUCCEEDED,
                CONDITION_TRUE,
                "JobSucceeded",
                "Agent job completed successfully",
            );
            patch_run_status(
                &runs,
                &name,
                serde_json::json!({
                    "phase": RunPhase::Completed,
                    "message": "Agent job completed successfully",
                    "lastUpdate": chrono::Utc::now().to_rfc3339(),
                    "conditions": serde_json::to_value(&conditions)?,
                }),
            )
            .await?;
            Ok(Action::await_change())
        }
        Some(RunPhase::Failed) => {
            let (reason, message) = match observed {
                JobState::NotFound => (
                    "JobDisappeared",
                    format!("Agent job {job_name} was deleted before completion"),
                ),
                _ => {
                    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
                    let pod_reason = job_failure_reason(&pods, job_name).await;
                    let message = match pod_reason {
                        Some(ref r) => format!("Agent job failed: {r}"),
                        None => "Agent job failed".to_string(),
                    };
                    ("JobFailed", message)
                }
            };

            warn!(kind = K::KIND, resource = %name, job = %job_name, reason, "Agent job failed");
            let mut conditions = current_conditions(run.as_ref());
            upsert_condition(&mut conditions, TYPE_JOB_FAILED, CONDITION_TRUE, reason, &message);
            patch_run_status(
                &runs,
                &name,
                serde_json::json!({
                    "phase": RunPhase::Failed,
                    "message": message,
                    "lastUpdate": chrono::Utc::now().to_rfc3339(),
                    "conditions": serde_json::to_value(&conditions)?,
                }),
            )
            .await?;
            Ok(Action::await_change())
        }
    }
}

/// Reason of the Job's terminal Pod, for failure messages.
/// Lookup is read-only and best-effort; a failure here never masks the
/// Job-level outcome.
async fn job_failure_reason(pods: &Api<Pod>, job_name: &str) -> Option<String> {
    let params = ListParams::default().labels(&format!("job-name={job_name}"));
    let list = pods.list(&params).await.ok()?;

    for pod in list.items {
        let Some(status) = pod.status else { continue };
        if let Some(reason) = status.reason {
            return Some(reason);
        }
        for cs in status.container_statuses.unwrap_or_default() {
            if let Some(terminated) = cs.state.and_then(|s| s.terminated) {
                if let Some(reason) = terminated.reason {
                    if reason != "Completed" {
                        return Some(reason);
                    }
                }
            }
        }
    }
    None
}

/// Status writes go through the status subresource with a merge patch of
/// controller-owned fields only, so fields written by the agent container
/// (`pullRequestUrl`) survive.
pub(crate) async fn patch_run_status<K: AgentRun>(
    runs: &Api<K>,
    name: &str,
    status: serde_json::Value,
) -> Result<()> {
    runs.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

async fn create_ignoring_conflict<T>(api: &Api<T>, object: &T) -> Result<()>
where
    T: Resource + Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
