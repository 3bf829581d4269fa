use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::{
    Cycle, CycleOptions, LedgerLock, OrchestratorError, Settings, DEFAULT_CONFIG_FILE,
};
use sifherd_core::{BuildKey, BuildStatus};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sifherd")]
#[command(about = "Keeps container builds on the cluster in step with the remote store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Reconcile and plan without persisting or submitting anything
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one orchestration cycle
    Run,
    /// Show every ledger record
    Status,
    /// Forget the record of one build so it is planned again
    Clear { entity: String, version: String },
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => run(&cli.config, cli.dry_run).await,
        Some(Commands::Status) => status(&cli.config).await,
        Some(Commands::Clear { entity, version }) => clear(&cli.config, entity, version).await,
        Some(Commands::Init) => init(&cli.config).await,
    }
}

async fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run(config: &Path, dry_run: bool) -> Result<()> {
    init_tracing();
    let settings = load_settings(config).await?;

    tracing::info!("Ledger: {}", settings.ledger_path().display());
    tracing::info!("Remote: {}:{}", settings.remote.host, settings.remote.containers_path);

    let cycle = Cycle::from_settings(settings)?;
    let summary = match cycle.run(CycleOptions { dry_run }).await {
        Ok(summary) => summary,
        Err(e) => {
            let message = abort_message(&e);
            return Err(anyhow::Error::new(e).context(message));
        }
    };

    println!();
    print!("{}", summary);
    println!();

    Ok(())
}

/// Setup errors stop the cycle before the ledger is touched; anything else
/// may have left partial progress behind.
fn abort_message(err: &OrchestratorError) -> &'static str {
    if err.is_setup_error() {
        "Cycle aborted during setup, ledger left untouched"
    } else {
        "Cycle failed"
    }
}

async fn status(config: &Path) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = orchestrator::LedgerStore::new(settings.ledger_path());
    let ledger = store.load().await?;

    println!();
    println!("Ledger: {}", store.path().display());
    println!();

    if ledger.is_empty() {
        println!("No builds recorded yet.");
        println!();
        return Ok(());
    }

    println!(
        "Builds ({}): {} building, {} completed, {} failed",
        ledger.len(),
        ledger.count(BuildStatus::Building),
        ledger.count(BuildStatus::Completed),
        ledger.count(BuildStatus::Failed),
    );
    for (key, record) in ledger.iter() {
        let status_icon = match record.status() {
            BuildStatus::Building => "◐",
            BuildStatus::Completed => "●",
            BuildStatus::Failed => "✗",
        };
        println!(
            "  {} [{}] {} job {} (started {}, updated {})",
            status_icon,
            record.status(),
            key,
            record.job_id,
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(error) = record.error() {
            println!("      error: {}", error);
        }
        if record.inconsistent_completions > 0 {
            println!(
                "      completions without artifact: {}",
                record.inconsistent_completions
            );
        }
    }

    println!();

    Ok(())
}

async fn clear(config: &Path, entity: String, version: String) -> Result<()> {
    init_tracing();
    let settings = load_settings(config).await?;
    let key = BuildKey::new(entity, version)?;
    let store = orchestrator::LedgerStore::new(settings.ledger_path());

    let lock = LedgerLock::acquire(store.path(), settings.lock_ttl()).await?;
    let removed = store.clear(&key).await?;
    lock.release().await?;

    if removed {
        println!("Cleared {}; it will be planned on the next run.", key);
    } else {
        println!("No record for {}.", key);
    }

    Ok(())
}

async fn init(config: &Path) -> Result<()> {
    if config.exists() {
        println!("Configuration already exists at {}", config.display());
        return Ok(());
    }

    let content = Settings::default().to_toml()?;
    if let Some(parent) = config.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(config, content)
        .await
        .with_context(|| format!("Failed to write {}", config.display()))?;

    println!("Wrote default configuration to {}", config.display());
    println!();
    println!("Next steps:");
    println!("  1. Set [remote] host and containers_path");
    println!("  2. Point [paths] source_dir at the benchmark checkout");
    println!("  3. Run 'sifherd --dry-run' to preview the first cycle");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sifherd=info,orchestrator=info,cluster=info".into()),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_before_subcommand() {
        let cli = Cli::parse_from(["sifherd", "--dry-run", "run"]);
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Some(Commands::Run)));
    }

    #[test]
    fn test_dry_run_after_subcommand() {
        let cli = Cli::parse_from(["sifherd", "run", "--dry-run"]);
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Some(Commands::Run)));
    }

    #[test]
    fn test_dry_run_without_subcommand() {
        let cli = Cli::parse_from(["sifherd", "--dry-run"]);
        assert!(cli.dry_run);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_is_live_by_default() {
        let cli = Cli::parse_from(["sifherd", "run"]);
        assert!(!cli.dry_run);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_abort_message_separates_setup_errors() {
        let unreachable = OrchestratorError::RemoteUnreachable("ssh: timed out".to_string());
        assert_eq!(
            abort_message(&unreachable),
            "Cycle aborted during setup, ledger left untouched"
        );

        let template = OrchestratorError::Template("missing placeholder".to_string());
        assert_eq!(abort_message(&template), "Cycle failed");
    }
}
