//! alock CLI - run commands under a named inter-process lock

use alock_core::config::Config;
use alock_core::locking::{LockGuard, LockManager, NamedLock};
use alock_core::Error;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Exit code when the lock name is invalid (EX_USAGE)
const EXIT_INVALID_NAME: u8 = 64;
/// Exit code when the lock file cannot be opened (EX_IOERR)
const EXIT_UNAVAILABLE: u8 = 74;
/// Exit code when the lock was not acquired in time (EX_TEMPFAIL)
const EXIT_TIMEOUT: u8 = 75;
/// Exit code when the configuration file is broken (EX_CONFIG)
const EXIT_CONFIG: u8 = 78;
/// Exit code when waiting was interrupted
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "alock")]
#[command(author, version, about = "Named locks shared between processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Lock directory (overrides config and ALOCK_LOCK_DIR)
    #[arg(long, global = true)]
    lock_dir: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args, Default)]
struct WaitArgs {
    /// Give up after this many seconds (default: wait forever)
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Milliseconds between two attempts
    #[arg(long)]
    poll_interval: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command while holding a lock
    Run {
        /// Lock name
        name: String,
        #[command(flatten)]
        wait: WaitArgs,
        /// Command and arguments
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },

    /// Acquire a lock and hold it until interrupted
    Hold {
        /// Lock name
        name: String,
        #[command(flatten)]
        wait: WaitArgs,
        /// Release after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Show whether a lock is held
    Status {
        /// Lock name
        name: String,
    },

    /// Print the lock file used for a name
    Path {
        /// Lock name
        name: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("alock_core=warn,alock_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let lock_error = e.downcast_ref::<Error>();
            if let Some(suggestion) = lock_error.and_then(Error::suggestion) {
                eprintln!("Hint: {suggestion}");
            }
            ExitCode::from(exit_code_for(lock_error))
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run {
            name,
            wait,
            command,
        } => {
            let lock = named_lock(cli.lock_dir, &name, &wait)?;
            cmd_run(&lock, &command).await
        }

        Commands::Hold {
            name,
            wait,
            duration,
        } => {
            let lock = named_lock(cli.lock_dir, &name, &wait)?;
            cmd_hold(&lock, duration.and_then(secs), cli.quiet).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status { name } => {
            let lock = named_lock(cli.lock_dir, &name, &WaitArgs::default())?;
            cmd_status(&lock, cli.format).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Path { name } => {
            let manager = lock_manager(cli.lock_dir)?;
            println!("{}", manager.resolve(&name)?.path().display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config { action } => {
            cmd_config(action, cli.quiet)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn lock_manager(lock_dir: Option<PathBuf>) -> anyhow::Result<LockManager> {
    let mut config = Config::load()
        .map_err(|e| Error::ConfigError(format!("{e:#}")))?
        .lock_config();
    if let Some(dir) = lock_dir {
        config = config.with_lock_dir(dir);
    }
    Ok(LockManager::new(config))
}

fn named_lock(lock_dir: Option<PathBuf>, name: &str, wait: &WaitArgs) -> anyhow::Result<NamedLock> {
    let mut lock = lock_manager(lock_dir)?.named(name)?;
    if let Some(timeout) = wait.timeout {
        lock = match secs(timeout) {
            Some(timeout) => lock.with_timeout(timeout),
            None => lock.wait_forever(),
        };
    }
    if let Some(interval) = wait.poll_interval {
        lock = lock.with_poll_interval(Duration::from_millis(interval));
    }
    Ok(lock)
}

/// Seconds from the command line. Negative or NaN values count as zero;
/// `None` means the value is too large for a `Duration` (no limit).
fn secs(value: f64) -> Option<Duration> {
    if value.is_nan() || value <= 0.0 {
        return Some(Duration::ZERO);
    }
    Duration::try_from_secs_f64(value).ok()
}

fn exit_code_for(error: Option<&Error>) -> u8 {
    match error {
        Some(Error::InvalidName { .. }) => EXIT_INVALID_NAME,
        Some(Error::ResourceUnavailable { .. }) => EXIT_UNAVAILABLE,
        Some(Error::LockTimeout { .. }) => EXIT_TIMEOUT,
        Some(Error::Cancelled(_)) => EXIT_CANCELLED,
        Some(Error::ConfigError(_)) => EXIT_CONFIG,
        _ => 1,
    }
}

/// Cancellation token fired by Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received");
            trigger.cancel();
        }
    });
    token
}

async fn acquire(lock: &NamedLock, cancel: &CancellationToken) -> anyhow::Result<LockGuard> {
    let guard = lock.acquire_with_cancel(cancel).await?;
    info!(lock_name = %lock.name(), path = %lock.path().display(), "Holding lock");
    Ok(guard)
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_run(lock: &NamedLock, command: &[String]) -> anyhow::Result<ExitCode> {
    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("No command given");
    };

    let cancel = interrupt_token();
    let guard = acquire(lock, &cancel).await?;

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await;
    guard.release().await;

    let status = status.map_err(|e| anyhow::anyhow!("Failed to run {program}: {e}"))?;
    debug!(%status, "Command finished");
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

async fn cmd_hold(lock: &NamedLock, duration: Option<Duration>, quiet: bool) -> anyhow::Result<()> {
    let cancel = interrupt_token();
    let guard = acquire(lock, &cancel).await?;

    if !quiet {
        println!("held {}", guard.path().display());
    }

    match duration {
        Some(duration) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {}
            }
        }
        None => cancel.cancelled().await,
    }

    guard.release().await;
    if !quiet {
        println!("released {}", lock.name());
    }
    Ok(())
}

async fn cmd_status(lock: &NamedLock, format: OutputFormat) -> anyhow::Result<()> {
    let status = lock.status().await?;
    match format {
        OutputFormat::Text => println!("{}: {}", lock.name(), status),
        OutputFormat::Json => {
            let report = serde_json::json!({
                "name": lock.name(),
                "path": lock.path(),
                "lock": status,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}
