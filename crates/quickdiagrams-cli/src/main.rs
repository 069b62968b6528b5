mod banner;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quickdiagrams_config::{AppConfig, ConfigLoader};
use quickdiagrams_db::{
    MigrationRunner, SqliteConnectionProvider, StoreTarget, registered_migrations,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(name = "quickdiagrams", version, about = "QuickDiagrams storage and schema migrations")]
struct Cli {
    /// Path to a YAML or TOML config file (default: ~/.quickdiagrams/config.yml)
    #[arg(short, long, global = true, env = "QUICKDIAGRAMS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Apply pending schema migrations (default)
    Migrate,
    /// Show applied and pending schema migrations
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref(), std::io::stdout)?;
    init_tracing(&config);

    let provider = build_provider(&config)?;
    let store = describe_target(provider.target());
    let runner = MigrationRunner::new(provider);
    let migrations = registered_migrations();

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let report = runner
                .run(&migrations, &cancel)
                .await
                .with_context(|| format!("schema migration of {store} failed, refusing to start"))?;
            info!(
                "store {store} ready: {} migration(s) applied, {} already present",
                report.applied.len(),
                report.skipped
            );
        }
        Command::Status => {
            let status = runner
                .status(&migrations, &cancel)
                .await
                .with_context(|| format!("failed to read migration status of {store}"))?;
            banner::print_status(&store, &status);
        }
    }

    Ok(())
}

/// Load configuration. The global subscriber depends on the configured log
/// level, so loading logs through a provisional subscriber writing to `writer`.
fn load_config<W>(path: Option<&Path>, writer: W) -> Result<AppConfig>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let provisional = tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_LOG_FILTER))
        .with_writer(writer)
        .finish();

    tracing::subscriber::with_default(provisional, || -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => ConfigLoader::load(path)?,
            None => ConfigLoader::load_default()?,
        };
        ConfigLoader::apply_env_overrides(&mut config);
        Ok(config)
    })
}

fn init_tracing(config: &AppConfig) {
    let default_filter = config.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .init();
}

/// `RUST_LOG` wins over the given default.
fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn build_provider(config: &AppConfig) -> Result<SqliteConnectionProvider> {
    let busy_timeout = Duration::from_millis(config.database.busy_timeout_ms);
    if config.database.in_memory {
        return Ok(SqliteConnectionProvider::new(
            StoreTarget::Memory,
            busy_timeout,
        ));
    }

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }
    Ok(SqliteConnectionProvider::new(
        StoreTarget::File(db_path),
        busy_timeout,
    ))
}

fn describe_target(target: &StoreTarget) -> String {
    match target {
        StoreTarget::File(path) => path.display().to_string(),
        StoreTarget::Memory => ":memory:".to_string(),
    }
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}
