//! Condition history maintenance
//!
//! Conditions are an ordered list with append-or-replace-by-type writes.
//! `lastTransitionTime` only moves when the status value actually flips, so
//! a re-asserted condition keeps its original transition timestamp and
//! `kubectl describe` shows a truthful timeline.

use crate::crd::Condition;
use chrono::{DateTime, Utc};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

pub const TYPE_JOB_CREATED: &str = "JobCreated";
pub const TYPE_JOB_RUNNING: &str = "JobRunning";
pub const TYPE_JOB_SUCCEEDED: &str = "JobSucceeded";
pub const TYPE_JOB_FAILED: &str = "JobFailed";
pub const TYPE_CLEANED_UP: &str = "CleanedUp";

/// Append or replace a condition keyed by type.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    r#type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    upsert_condition_at(conditions, r#type, status, reason, message, Utc::now());
}

/// Same as [`upsert_condition`] with an explicit clock, keeping the
/// transition rule deterministic.
pub fn upsert_condition_at(
    conditions: &mut Vec<Condition>,
    r#type: &str,
    status: &str,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    let timestamp = now.to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == r#type) {
        if existing.status != status {
            existing.last_transition_time = Some(timestamp);
        }
        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
    } else {
        conditions.push(Condition {
            r#type: r#type.to_string(),
            status: status.to_string(),
            last_transition_time: Some(timestamp),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn test_appends_new_condition() {
        let mut conditions = Vec::new();
        upsert_condition_at(
            &mut conditions,
            TYPE_JOB_CREATED,
            CONDITION_TRUE,
            "JobCreated",
            "Agent job created",
            at(0),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].r#type, TYPE_JOB_CREATED);
        assert_eq!(conditions[0].status, CONDITION_TRUE);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some(at(0).to_rfc3339().as_str())
        );
    }

    #[test]
    fn test_replaces_by_type_keeping_order() {
        let mut conditions = Vec::new();
        upsert_condition_at(&mut conditions, TYPE_JOB_CREATED, CONDITION_TRUE, "a", "a", at(0));
        upsert_condition_at(&mut conditions, TYPE_JOB_RUNNING, CONDITION_TRUE, "b", "b", at(1));
        upsert_condition_at(&mut conditions, TYPE_JOB_CREATED, CONDITION_TRUE, "c", "c", at(2));

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].r#type, TYPE_JOB_CREATED);
        assert_eq!(conditions[0].message.as_deref(), Some("c"));
        assert_eq!(conditions[1].r#type, TYPE_JOB_RUNNING);
    }

    #[test]
    fn test_transition_time_frozen_while_status_unchanged() {
        let mut conditions = Vec::new();
        upsert_condition_at(&mut conditions, TYPE_JOB_RUNNING, CONDITION_TRUE, "r", "m1", at(0));
        upsert_condition_at(&mut conditions, TYPE_JOB_RUNNING, CONDITION_TRUE, "r", "m2", at(30));

        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some(at(0).to_rfc3339().as_str())
        );
        assert_eq!(conditions[0].message.as_deref(), Some("m2"));
    }

    #[test]
    fn test_transition_time_moves_on_status_flip() {
        let mut conditions = Vec::new();
        upsert_condition_at(&mut conditions, TYPE_JOB_RUNNING, CONDITION_TRUE, "r", "m", at(0));
        upsert_condition_at(&mut conditions, TYPE_JOB_RUNNING, CONDITION_FALSE, "r", "m", at(30));

        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some(at(30).to_rfc3339().as_str())
        );
        assert_eq!(conditions[0].status, CONDITION_FALSE);
    }
}
