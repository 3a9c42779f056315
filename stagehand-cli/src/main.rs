mod commands;
mod config;
mod errors;

use std::path::Path;
use std::time::Duration;

use crate::{commands::Commands, config::resolve_config_path, errors::{CliError, Result}};
use clap::Parser;
use colored::Colorize;
use stagehand_daemon::anchor::{self, Role};
use stagehand_daemon::Config;
use tracing_subscriber::EnvFilter;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stagehand - keeps a set of services running and restarts them when their binaries change
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file (searched upward from the current directory by default)
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Allow running as root (not recommended for security reasons)
    #[arg(long, global = true)]
    pub allow_root: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    // A process launched by `start` carries the marker and becomes the daemon
    if let Role::Background { config_path } = Role::current() {
        std::process::exit(run_background(&config_path).await);
    }

    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_background(config_path: &Path) -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_ansi(false)
        .init();

    match anchor::serve(config_path).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Daemon startup failed: {}", e);
            1
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // SAFETY: getuid() is always safe to call
    if unsafe { libc::getuid() } == 0 {
        if !cli.allow_root {
            return Err(CliError::RootNotAllowed);
        }
        tracing::warn!("Running as root with --allow-root flag");
    }

    let config_path = resolve_config_path(cli.file.as_deref())?;
    let config = Config::load(&config_path)?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => handle_start(&config, &config_path).await,
        Commands::Stop => handle_stop(&config).await,
        Commands::Status => handle_status(&config),
        Commands::Check => {
            println!(
                "{} ({} services)",
                "Configuration OK".green(),
                config.services.len()
            );
            Ok(())
        }
    }
}

async fn handle_start(config: &Config, config_path: &Path) -> Result<()> {
    if let Ok(instance) = anchor::get_running_instance(config) {
        println!("Daemon is already running (pid {})", instance.pid());
        return Ok(());
    }

    let pid = anchor::launch(config, config_path).await?;
    println!("{} (pid {})", "Daemon started".green(), pid);
    println!("Logging to {}", config.storage.log.display());
    Ok(())
}

async fn handle_stop(config: &Config) -> Result<()> {
    let instance = match anchor::get_running_instance(config) {
        Ok(instance) => instance,
        Err(e) => {
            println!("Daemon is not running: {}", e);
            return Ok(());
        }
    };

    anchor::request_stop(&instance)?;
    println!("Stopping daemon (pid {})...", instance.pid());

    // Every service may use its full grace period, plus the SIGKILL wait
    let services = u32::try_from(config.services.len()).unwrap_or(u32::MAX);
    let timeout = config.grace_period.saturating_mul(services.saturating_add(1))
        + Duration::from_secs(2);
    let deadline = tokio::time::Instant::now() + timeout;

    while instance.is_alive() {
        if tokio::time::Instant::now() >= deadline {
            return Err(CliError::StopTimeout(timeout));
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }

    println!("{}", "Daemon stopped".green());
    Ok(())
}

fn handle_status(config: &Config) -> Result<()> {
    match anchor::get_running_instance(config) {
        Ok(instance) => {
            println!("{} (pid {})", "Daemon is running".green().bold(), instance.pid());
        }
        Err(e) => {
            println!("{}: {}", "Daemon is not running".yellow().bold(), e);
            return Ok(());
        }
    }

    if config.services.is_empty() {
        println!("No services configured");
        return Ok(());
    }

    for service in &config.services {
        let mut triggers = Vec::new();
        if service.restart.on_change {
            triggers.push("change");
        }
        if service.restart.on_error {
            triggers.push("error");
        }
        if service.restart.on_exit {
            triggers.push("exit");
        }
        let restart = if triggers.is_empty() {
            "never".dimmed().to_string()
        } else {
            triggers.join(", ")
        };

        println!(
            "  {}  {}  restart on: {}",
            service.name.bold(),
            service.binary_path.display(),
            restart
        );
    }
    Ok(())
}
