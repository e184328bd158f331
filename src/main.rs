// gateway/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcp_gateway::{
    cancel_pair, DispatchEngine, DispatchRequest, GatewayConfig, HttpToolInvoker,
};

#[derive(Parser)]
#[command(name = "mcp-gateway", version, about = "Profile-routed MCP gateway")]
struct Args {
    /// Extra config file layered over the system and user files
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List active profiles
    Profiles,
    /// Show the capabilities a profile advertises
    Capabilities { id: String },
    /// Send one message to a profile's tool server
    Dispatch {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long, default_value = "cli")]
        caller: String,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = GatewayConfig::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log.level.as_deref().unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let registry = cfg.registry()?;
    let invoker = Arc::new(HttpToolInvoker::new()?);
    let engine = DispatchEngine::new(registry, invoker)
        .with_policy(cfg.retry_policy())?
        .with_inactive_policy(cfg.profiles.inactive_policy);

    match args.cmd {
        Cmd::Profiles => {
            let profiles: Vec<_> = engine.registry().list_active().iter().map(|p| (**p).clone()).collect();
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }
        Cmd::Capabilities { id } => {
            let caps = engine.registry().capabilities_of(&id).with_context(|| format!("capabilities of '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
        Cmd::Dispatch { profile, conversation, caller, message } => {
            let (handle, signal) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, cancelling dispatch");
                    handle.cancel();
                }
            });
            let req = DispatchRequest { caller_id: caller, message, profile_id: profile, conversation_id: conversation };
            match engine.dispatch_with_cancel(req, signal).await {
                Ok(resp) => println!("{}", serde_json::to_string_pretty(&resp)?),
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.outcome())?);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
