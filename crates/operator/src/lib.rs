//! AgentRun Operator - Kubernetes Operator for Agent Workloads
//!
//! The operator watches `CodeRun` and `DocsRun` custom resources and drives
//! each one through a Kubernetes Job running the corresponding agent
//! container: create the Job and its ConfigMap, track the Job to a terminal
//! phase, and reclaim the workload after a retention delay.

pub mod cleanup;
pub mod conditions;
pub mod config;
pub mod crd;
pub mod error;
pub mod job_factory;
pub mod reconciler;

pub use cleanup::CleanupScheduler;
pub use config::OperatorConfig;
pub use error::{Error, Result};
pub use reconciler::Context;
