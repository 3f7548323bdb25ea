//! Cleanup Scheduler
//!
//! Periodic reclamation of finished workloads. Every tick lists the run
//! resources, recomputes each wall-clock deadline from the persisted
//! `status.lastUpdate`, and deletes the Job (and optionally the ConfigMap)
//! of any terminal run past its deadline. Deadlines live in status, not in
//! memory, so a process restart neither resets nor skips them.
//!
//! Re-entrant by construction: a missing object counts as already deleted,
//! and a run with `cleanupCompletedAt` set is skipped without any API call.
//! The run resource itself is never deleted.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client, ResourceExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::conditions::{upsert_condition, CONDITION_TRUE, TYPE_CLEANED_UP};
use crate::config::CleanupConfig;
use crate::crd::{AgentRun, CodeRun, DocsRun, RunPhase, RunStatus};
use crate::error::Result;
use crate::reconciler::patch_run_status;

/// Counters for one scheduler tick
#[derive(Debug, Default)]
pub struct TickSummary {
    pub scanned: usize,
    pub reclaimed: usize,
    pub failed: usize,
}

pub struct CleanupScheduler {
    client: Client,
    namespace: String,
    config: CleanupConfig,
}

impl CleanupScheduler {
    pub fn new(client: Client, namespace: String, config: CleanupConfig) -> Self {
        Self {
            client,
            namespace,
            config,
        }
    }

    /// Tick loop; runs until the task is dropped at shutdown
    pub async fn run(self) {
        if !self.config.enabled {
            info!("Cleanup scheduler disabled");
            return;
        }

        info!(
            interval_secs = self.config.interval_seconds,
            completed_delay_min = self.config.completed_job_delay_minutes,
            failed_delay_min = self.config.failed_job_delay_minutes,
            "Cleanup scheduler started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        loop {
            interval.tick().await;
            let summary = self.tick().await;
            if summary.reclaimed > 0 || summary.failed > 0 {
                info!(
                    scanned = summary.scanned,
                    reclaimed = summary.reclaimed,
                    failed = summary.failed,
                    "Cleanup tick complete"
                );
            } else {
                debug!(scanned = summary.scanned, "Cleanup tick complete, nothing due");
            }
        }
    }

    /// Sweep both run kinds once
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        if let Err(e) = self.sweep::<CodeRun>(&mut summary).await {
            warn!(error = %e, kind = CodeRun::KIND, "Cleanup sweep failed");
            summary.failed += 1;
        }
        if let Err(e) = self.sweep::<DocsRun>(&mut summary).await {
            warn!(error = %e, kind = DocsRun::KIND, "Cleanup sweep failed");
            summary.failed += 1;
        }

        summary
    }

    async fn sweep<K: AgentRun>(&self, summary: &mut TickSummary) -> Result<()> {
        let runs: Api<K> = Api::namespaced(self.client.clone(), &self.namespace);

        for run in runs.list(&ListParams::default()).await?.items {
            summary.scanned += 1;
            match self.reclaim(&runs, &run).await {
                Ok(true) => summary.reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        kind = K::KIND,
                        resource = %run.name_any(),
                        error = %e,
                        "Failed to reclaim run workload"
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn reclaim<K: AgentRun>(&self, runs: &Api<K>, run: &K) -> Result<bool> {
        let Some(status) = run.run_status() else {
            return Ok(false);
        };
        if !should_reclaim(status, &self.config, Utc::now()) {
            return Ok(false);
        }

        let name = run.name_any();

        if let Some(job_name) = &status.job_name {
            let jobs: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
            delete_ignoring_missing(&jobs, job_name).await?;
        }

        if self.config.delete_config_map {
            if let Some(cm_name) = &status.configmap_name {
                let configmaps: Api<ConfigMap> =
                    Api::namespaced(self.client.clone(), &self.namespace);
                delete_ignoring_missing(&configmaps, cm_name).await?;
            }
        }

        let completed_at = Utc::now().to_rfc3339();
        let mut conditions = status.conditions.clone();
        upsert_condition(
            &mut conditions,
            TYPE_CLEANED_UP,
            CONDITION_TRUE,
            "CleanupCompleted",
            "Job and config reclaimed after retention delay",
        );
        patch_run_status(
            runs,
            &name,
            serde_json::json!({
                "cleanupCompletedAt": completed_at,
                "conditions": serde_json::to_value(&conditions)?,
            }),
        )
        .await?;

        info!(kind = K::KIND, resource = %name, "Reclaimed run workload");
        Ok(true)
    }
}

/// Wall-clock deadline after which a terminal run's workload is reclaimed
pub fn cleanup_deadline(status: &RunStatus, config: &CleanupConfig) -> Option<DateTime<Utc>> {
    let minutes = match status.phase {
        RunPhase::Completed => config.completed_job_delay_minutes,
        RunPhase::Failed => config.failed_job_delay_minutes,
        _ => return None,
    };

    let last_update = DateTime::parse_from_rfc3339(status.last_update.as_deref()?)
        .ok()?
        .with_timezone(&Utc);

    Some(last_update + chrono::Duration::minutes(minutes as i64))
}

/// Decision predicate for one run at one instant
pub fn should_reclaim(status: &RunStatus, config: &CleanupConfig, now: DateTime<Utc>) -> bool {
    if status.cleanup_completed_at.is_some() {
        return false;
    }
    match cleanup_deadline(status, config) {
        Some(deadline) => now >= deadline,
        None => false,
    }
}

async fn delete_ignoring_missing<T>(api: &Api<T>, name: &str) -> Result<()>
where
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
