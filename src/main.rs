//! ide-fleet: inspect and manage running editor instances.
//!
//! Usage:
//!   ide-fleet status             discover instances and print status as JSON
//!   ide-fleet watch              keep the pool warm and print status periodically
//!   ide-fleet start [PATH]       launch a new instance on PATH (or the default workspace)
//!   ide-fleet stop PORT          terminate the instance on PORT
//!   ide-fleet workspace PORT     resolve the workspace of the instance on PORT
//!
//! Set IDE_FLEET_CONFIG to use a config file other than the default.

use anyhow::{bail, Context};
use ide_fleet::config::{self, FleetConfig};
use ide_fleet::FleetState;
use serde_json::json;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const WATCH_INTERVAL: Duration = Duration::from_secs(10);

fn load_config() -> anyhow::Result<FleetConfig> {
    let config = match env::var("IDE_FLEET_CONFIG") {
        Ok(path) if !path.is_empty() => config::load_config_from(&PathBuf::from(path))?,
        _ => config::load_config()?,
    };
    Ok(config)
}

fn parse_port(arg: Option<&String>) -> anyhow::Result<u16> {
    let raw = arg.context("missing PORT argument")?;
    raw.parse()
        .with_context(|| format!("invalid port: {}", raw))
}

async fn print_status(state: &FleetState) -> anyhow::Result<()> {
    state.sessions.refresh().await;
    let out = json!({
        "session": state.sessions.get_status(),
        "pool": state.pool.get_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let state = FleetState::new(load_config()?);

    match args.first().map(String::as_str).unwrap_or("status") {
        "status" => print_status(&state).await?,
        "watch" => {
            state.start_background();
            let mut interval = tokio::time::interval(WATCH_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = print_status(&state).await {
                            tracing::warn!("Status refresh failed: {}", e);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutting down");
                        break;
                    }
                }
            }
        }
        "start" => {
            state.sessions.refresh().await;
            let record = state.sessions.start(args.get(1).map(PathBuf::from)).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        "stop" => {
            let port = parse_port(args.get(1))?;
            state.sessions.refresh().await;
            state.sessions.stop(port).await?;
            println!("stopped {}", port);
        }
        "workspace" => {
            let port = parse_port(args.get(1))?;
            state.sessions.refresh().await;
            match state.sessions.get_workspace_info(port).await {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => bail!("could not resolve workspace for port {}", port),
            }
        }
        other => bail!("unknown command: {}", other),
    }

    state.shutdown().await;
    Ok(())
}
