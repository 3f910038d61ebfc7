use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use body_based_router::commands;
use body_based_router::config::{self, LoggingConfig};
use body_based_router::error::Result;
use body_based_router::state::AppState;
use body_based_router::transport::{ExtProcServer, StreamOptions};
use body_based_router::web;

#[derive(Parser, Debug)]
#[command(name = "body-based-router")]
#[command(about = "ext_proc filter that routes LLM requests on metadata found in their bodies", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Expect request bodies as streamed chunks
    #[arg(long, global = true)]
    streaming: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the ext_proc server (default)
    Run,
    /// Check configuration and build the plugin chain
    Check {
        /// Request body to run through the chain
        #[arg(long, value_name = "FILE")]
        sample: Option<PathBuf>,

        /// Request path used for the sample body
        #[arg(long, requires = "sample")]
        path: Option<String>,
    },
}

fn init_tracing(logging: &LoggingConfig, debug: bool) {
    let level = if debug { "debug" } else { logging.level.as_str() };
    let directives = match std::env::var("RUST_LOG") {
        Ok(env) if !debug => env,
        _ => format!("warn,body_based_router={level}"),
    };
    let filter = EnvFilter::builder().parse_lossy(directives);

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => config::load_from_path(path),
        None => config::load_from_env_or_file(),
    };
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging, args.debug);

    let mut config = match loaded {
        Ok(config) => {
            match &args.config {
                Some(path) => info!("Configuration loaded successfully from {}", path.display()),
                None => info!("Configuration loaded successfully"),
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };
    if args.streaming {
        config.server.streaming = true;
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Check { sample, path } => {
            return commands::run_config_check(config, sample.as_deref(), path.as_deref());
        }
        Command::Run => {
            info!("Starting body-based router");
        }
    }

    let (state, shutdown_rx) = AppState::new(config)?;

    let options = StreamOptions {
        streaming: state.config.server.streaming,
        max_frame_bytes: state.config.server.max_message_bytes,
    };
    let server = ExtProcServer::bind(&state.config.server.address(), state.handler.clone(), options)
        .await?;

    let server_handle = tokio::spawn(server.serve(shutdown_rx));

    let admin_handle = if state.config.admin.enabled {
        let admin_state = state.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = web::start_server(admin_state).await {
                error!("Admin server error: {}", e);
            }
        }))
    } else {
        None
    };

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    state.shutdown();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("ext_proc server error: {}", e),
        Err(e) => error!("ext_proc server task failed: {}", e),
    }
    if let Some(handle) = admin_handle {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}
