use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use migrator::{
    config::MigrationConfig,
    notify::{BellNotifier, Notifier, SilentNotifier},
    run_batch, tool,
};
use std::path::PathBuf;

/// Environment variable holding the account password
const PASSWORD_ENV: &str = "DMT_PASSWORD";

/// Batch runner for the FileMaker data migration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the migration tool; searched for under ./ and ../ when omitted
    #[arg(short, long)]
    tool: Option<PathBuf>,

    /// Number of migrations to run at once (1-10)
    #[arg(short = 'p', long)]
    processes: Option<usize>,

    /// Account for the source and clone files
    #[arg(short, long)]
    account: Option<String>,

    /// Extra arguments passed to the tool, e.g. "-force -ignore_fonts"
    #[arg(short, long, allow_hyphen_values = true)]
    extra_args: Option<String>,

    /// Do not ring the terminal bell when the run ends
    #[arg(long)]
    no_bell: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -v
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = MigrationConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(path) = args.tool {
        cfg.tool_path = Some(path);
    }
    if let Some(processes) = args.processes {
        cfg.concurrency = processes;
    }
    if let Some(account) = args.account {
        cfg.account = account;
    }
    if let Some(extra) = args.extra_args {
        cfg.extra_args = extra;
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        cfg.password = password;
    }

    cfg.validate().context("Invalid configuration")?;
    if cfg.password.is_empty() {
        warn!("No password configured (set {} or the config file)", PASSWORD_ENV);
    }

    info!("dmtbatch starting");
    info!("Configuration: {:?}", cfg);

    let tool_path = tool::find_tool(cfg.tool_path.as_deref())?;

    let cancel = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => warn!("Ctrl-C received, stopping running migrations"),
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let outcome = run_batch(&cfg, tool_path, cancel).await?;

    println!("{}", outcome.report.render());

    let notifier: Box<dyn Notifier> = if args.no_bell {
        Box::new(SilentNotifier)
    } else {
        Box::new(BellNotifier)
    };
    notifier.run_finished(outcome.report.job_count(), outcome.report.failed_count());

    if outcome.summary.cancelled {
        std::process::exit(130);
    }
    if outcome.report.failed_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
