// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod config;

use std::sync::Arc;

use clap::Parser;
use ntm_core::model::SwarmPlan;
use ntm_core::tm::{LocalTransport, SshTransport, TmAdapter, TmuxTransport};
use ntm_core::{EventBus, Governor};
use ntm_swarm::{CooldownPolicy, Detector, Injector, Orchestrator, Respawner, Rotator, Supervisor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use config::Config;

/// Runs `tmux` either on the local host or over `ssh`, depending on config.
enum Transport {
    Local(LocalTransport),
    Ssh(SshTransport),
}

impl TmuxTransport for Transport {
    fn command(&self) -> tokio::process::Command {
        match self {
            Self::Local(t) => t.command(),
            Self::Ssh(t) => t.command(),
        }
    }
}

fn build_transport(config: &Config) -> Transport {
    match config.remote {
        Some(ref destination) => Transport::Ssh(SshTransport::new(destination.clone())),
        None => Transport::Local(LocalTransport),
    }
}

/// Priority: `--log-level`/`NTM_LOG_LEVEL` > `RUST_LOG` > `"info"`.
fn init_tracing(config: &Config) {
    let filter = if std::env::var("NTM_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Cancels `shutdown` on SIGINT/SIGTERM, force-exits on a second signal.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

async fn run(config: Config) -> anyhow::Result<()> {
    let session_id = config.effective_session_id();
    tokio::fs::create_dir_all(&config.session_dir).await?;

    let event_bus = Arc::new(EventBus::new());
    let governor = Arc::new(Governor::new());
    if let Err(e) = governor.load_from_dir(&config.session_dir).await {
        error!(error = %e, "failed to load persisted governor state, starting fresh");
    }
    let tm = Arc::new(TmAdapter::new(build_transport(&config)));
    let supervisor = Supervisor::new(session_id.clone(), config.session_dir.clone());

    let (detector, rx) =
        Detector::new(Arc::clone(&tm), Arc::clone(&governor), config.session_dir.clone());
    let injector = Arc::new(Injector::new(Arc::clone(&tm), Some(Arc::clone(&governor))));
    let cooldown_policy =
        if config.rotation_respects_cooldown { CooldownPolicy::Respect } else { CooldownPolicy::Ignore };
    let rotator = Arc::new(Rotator::new(Arc::clone(&governor), cooldown_policy));
    let respawner =
        Respawner::new(Arc::clone(&tm), Arc::clone(&injector), Some(Arc::clone(&rotator)), Some(Arc::clone(&event_bus)));
    let orchestrator = Orchestrator::new(TmAdapter::new(build_transport(&config)));

    if let Some(ref plan_path) = config.plan {
        let plan_json = tokio::fs::read_to_string(plan_path).await?;
        let plan: SwarmPlan = serde_json::from_str(&plan_json)?;
        orchestrator.materialize(&plan).await?;

        for session in &plan.sessions {
            for pane in &session.panes {
                let target = format!("{}:0.{}", session.name, pane.index);
                detector.start_pane(target, pane.agent_type.clone()).await;
                if let Some(ref launch_command) = pane.launch_command {
                    respawner.set_launch_command(&pane.agent_type, launch_command.clone()).await;
                }
                if let Some(ref project_dir) = pane.project_dir {
                    respawner.set_project_dir(&target, project_dir.clone()).await;
                }
            }
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    tokio::spawn(respawner.run(rx));

    info!(session_id = %session_id, "ntm swarm control loop running");
    shutdown.cancelled().await;
    info!("shutting down");
    detector.stop().await;
    supervisor.shutdown().await?;
    if let Err(e) = governor.save_to_dir(&config.session_dir).await {
        error!(error = %e, "failed to persist governor state on shutdown");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
