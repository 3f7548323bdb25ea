//! AgentRun Operator - Main Entry Point

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use kube::Client;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use agentrun_operator::cleanup::CleanupScheduler;
use agentrun_operator::config::OperatorConfig;
use agentrun_operator::crd::{CodeRun, DocsRun};
use agentrun_operator::reconciler::{run_controller, Context};

/// AgentRun Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "agentrun-operator")]
#[command(version = "0.1.0")]
#[command(about = "Kubernetes operator for CodeRun and DocsRun agent workloads", long_about = None)]
struct Args {
    /// Kubernetes namespace to watch
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Path to an operator config file (defaults to config/operator.* if present)
    #[arg(long)]
    pub config_file: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    info!("Starting AgentRun Operator");

    let config = OperatorConfig::load(args.config_file.as_deref())
        .context("Failed to load operator configuration")?;
    info!(namespace = %args.namespace, "Operator configuration loaded");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes");

    let ctx = Arc::new(Context::new(
        client.clone(),
        args.namespace.clone(),
        config.clone(),
    ));

    let code_ctx = ctx.clone();
    tokio::spawn(async move {
        run_controller::<CodeRun>(code_ctx).await;
    });
    info!("CodeRun controller started");

    let docs_ctx = ctx.clone();
    tokio::spawn(async move {
        run_controller::<DocsRun>(docs_ctx).await;
    });
    info!("DocsRun controller started");

    let scheduler = CleanupScheduler::new(client, args.namespace, config.cleanup.clone());
    tokio::spawn(async move {
        scheduler.run().await;
    });

    info!("Operator is running. Press Ctrl+C to stop.");
    let _ = signal::ctrl_c().await;
    info!("Shutting down operator...");

    Ok(())
}
