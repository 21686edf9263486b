// ============================
// crates/guard-bin/src/main.rs
// ============================
//! `sessionguard`: validate configuration or run the engine's maintenance loop.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use guard_lib::auth::HashCost;
use guard_lib::{AuthEngine, Clock, EngineStorage, Settings, StaticIdentityProvider, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "sessionguard", version, about = "Token lifecycle and session security engine")]
struct Cli {
    /// TOML configuration file (default: ./sessionguard.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate configuration and run the token self-test
    Check,
    /// Start the engine and keep maintenance running until Ctrl-C
    Run,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Settings::load().context("failed to load configuration")?,
    };
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = load_settings(cli.config.as_ref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let identity = Arc::new(StaticIdentityProvider::new(HashCost::default())?);
    let engine = AuthEngine::new(&settings, identity, EngineStorage::in_memory(clock.clone()), clock)
        .context("invalid configuration")?;

    match cli.command {
        Command::Check => {
            let healthy = engine.is_healthy();
            engine.close().await;
            if !healthy {
                error!("token self-test failed");
                anyhow::bail!("token self-test failed for algorithm {:?}", engine.config().token.algorithm);
            }
            info!("configuration OK");
        },
        Command::Run => {
            info!("sessionguard running, press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("shutting down");
            engine.close().await;
        },
    }
    Ok(())
}
