//! l3routeorchd entry point.
//!
//! Replays a recorded stream of route snapshots and neighbor events through
//! the reconciliation engine, driven by the OrchDaemon, against a backend
//! that logs every request and accepts it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use l3_orch_common::{OrchDaemon, OrchDaemonConfig};
use l3routeorch::{
    BackendError, BackendPlugin, BackendRegistry, NexthopResult, OrchEvent, RouteBackend,
    RouteOrch, RouteOrchConfig, RouteRequest, StatusTable,
};
use log::{debug, error, info};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// L3 route/next-hop reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "l3routeorchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Event stream to replay (concatenated JSON events)
    #[arg(short = 'r', long)]
    replay: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Print the status annotations as JSON on exit
    #[arg(long)]
    dump_status: bool,
}

/// Accepts every request; egress ids of resolved next-hops are echoed back.
struct LoggingBackend;

#[async_trait]
impl RouteBackend for LoggingBackend {
    fn name(&self) -> &str {
        "logging"
    }

    async fn program_route(
        &self,
        request: &RouteRequest,
    ) -> std::result::Result<Vec<NexthopResult>, BackendError> {
        info!(
            "backend: {} {} {} in {} ({} next-hops)",
            request.action,
            request.family,
            request.prefix,
            request.domain,
            request.nexthops.len()
        );
        Ok(request
            .nexthops
            .iter()
            .map(|nh| {
                debug!("backend:   {} {:?} {:?} egress {:?}", nh.id, nh.kind, nh.state, nh.egress_id);
                let mut result = NexthopResult::success(nh.id.clone());
                result.egress_id = nh.egress_id;
                result
            })
            .collect())
    }
}

#[derive(Serialize)]
struct StatusRecord {
    domain: String,
    route: String,
    nexthop: Option<String>,
    error: String,
}

fn load_events(path: &Path) -> Result<Vec<OrchEvent>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    serde_json::Deserializer::from_str(&content)
        .into_iter::<OrchEvent>()
        .enumerate()
        .map(|(i, event)| {
            event.with_context(|| format!("Invalid event #{} in {}", i + 1, path.display()))
        })
        .collect()
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => RouteOrchConfig::from_file(path)?,
        None => RouteOrchConfig::default(),
    };
    info!(
        "Hardware timeout: {}ms, max next-hops per route: {}",
        config.hardware_timeout_ms, config.max_nexthops_per_route
    );

    let mut registry = BackendRegistry::new();
    registry.register(BackendPlugin::new(Arc::new(LoggingBackend)))?;
    let backend = registry.resolve()?;

    let status = Arc::new(StatusTable::new());
    let mut route_orch = RouteOrch::new(config, backend, status.clone());

    let events = load_events(&args.replay)?;
    info!("Replaying {} events from {}", events.len(), args.replay.display());
    for event in events {
        route_orch.enqueue(event);
    }

    let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
    daemon.register_orch(Box::new(route_orch));
    for line in daemon.dump() {
        debug!("{}", line);
    }

    let passes = daemon.run_until_idle().await;
    info!("Replay complete after {} passes, {} status annotations", passes, status.len());

    if args.dump_status {
        let records: Vec<StatusRecord> = status
            .entries()
            .into_iter()
            .map(|(key, error)| StatusRecord {
                domain: key.domain,
                route: key.route,
                nexthop: key.nexthop,
                error,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Starting l3routeorchd");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("l3routeorchd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
