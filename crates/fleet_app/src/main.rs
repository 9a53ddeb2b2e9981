mod config;
mod console;
mod context;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use fleet_core::RunOutcome;
use fleet_engine::JsonFileRecordStore;
use fleet_logging::{fleet_info, LogDestination};
use log::LevelFilter;

use crate::config::FleetConfig;
use crate::console::Console;

#[derive(Parser)]
#[command(name = "shotfleet")]
#[command(about = "Scrapes screenshot catalogues through rotating public proxies")]
#[command(version)]
struct Cli {
    /// RON configuration file
    #[arg(short, long, default_value = "fleet.ron")]
    config: PathBuf,

    /// Provider to scrape, by short name
    #[arg(short, long)]
    provider: Option<String>,

    /// Where application logs go
    #[arg(long, value_enum, default_value_t = LogTarget::File)]
    log: LogTarget,

    /// Log proxy and broker chatter too
    #[arg(short, long)]
    verbose: bool,

    /// List registered providers and exit
    #[arg(long)]
    list: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogTarget {
    File,
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = FleetConfig::load(&cli.config)?;
    let level = if cli.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    let log_file = config.log_dir.join("shotfleet.log");
    if !fleet_logging::initialize(cli.log.into(), &log_file, level) {
        eprintln!("Warning: logging disabled, could not set up {}", log_file.display());
    }

    let registry = config.build_registry()?;
    if cli.list {
        for entry in registry.entries() {
            let capability = if entry.can_scrape() { "scrape" } else { "display only" };
            println!("{:<16} {:<32} {}", entry.short_name, entry.pretty_name, capability);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(provider) = cli.provider else {
        bail!("no provider given; use --list to see the registered providers");
    };
    match registry.get(&provider) {
        Some(entry) if entry.can_scrape() => {}
        Some(_) => bail!("provider {provider} cannot scrape"),
        None => bail!("unknown provider {provider}"),
    }

    let store_dir = config.data_dir.join(&provider);
    let store = JsonFileRecordStore::open(store_dir.clone())
        .with_context(|| format!("opening record store in {}", store_dir.display()))?;
    fleet_info!("scraping {} into {}", provider, store_dir.display());

    let outcome = Console::new(config, registry, Arc::new(store))
        .run(&provider)
        .await;
    Ok(match outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Aborted => {
            println!("{provider}: aborted");
            ExitCode::from(130)
        }
        RunOutcome::Failed(reason) => {
            eprintln!("{provider}: {reason}");
            ExitCode::FAILURE
        }
    })
}
