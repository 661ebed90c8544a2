mod cli;
mod logging;
mod reporter;

use std::io::{self, Write};
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, ConfigArgs, JobArgs};
use colored::*;
use dotenv::dotenv;
use index_rebuilder::credentials::{ChainedCredentialStore, ConfigCredentialStore, EnvCredentialStore};
use index_rebuilder::db::SqlServerConnector;
use index_rebuilder::{
    scanner, AppConfig, CheckpointStore, FileCheckpointStore, JobDriver, JobParameters,
    RebuildStatus,
};
use reporter::CliReporter;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args = Cli::parse();
    let guard = logging::init_logger(args.verbose);

    let result = match args.command {
        Some(Commands::Run { job, fresh }) => run_job(&job, fresh).await,
        Some(Commands::Scan { job }) => run_scan(&job).await,
        Some(Commands::Status { source }) => show_status(&source),
        Some(Commands::Reset { source, yes }) => reset_checkpoint(&source, yes),
        Some(Commands::PrintConfig { job }) => print_config(&job),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("{:#}", err);
        drop(guard);
        process::exit(1);
    }
}

fn resolve_parameters(job: &JobArgs) -> anyhow::Result<JobParameters> {
    let config = AppConfig::load(job.source.config.as_deref(), &job.overrides())
        .context("Error loading configuration")?;
    let credentials = ChainedCredentialStore::new()
        .with(EnvCredentialStore::new())
        .with(ConfigCredentialStore::new(config.credentials.clone()));
    Ok(JobParameters::resolve(&config, &credentials)?)
}

async fn run_job(job: &JobArgs, fresh: bool) -> anyhow::Result<()> {
    let params = resolve_parameters(job)?;
    let store = FileCheckpointStore::new(&params.checkpoint_path);
    if fresh {
        store.clear()?;
        info!("Discarded checkpoint {}", store.path().display());
    }

    let connector = SqlServerConnector::new(params.connection.clone());
    let driver = JobDriver::new(&connector, &store, params.plan.clone());
    let reporter = CliReporter::new();
    let report = driver.run(&reporter).await?;

    reporter::print_report(&report);
    Ok(())
}

async fn run_scan(job: &JobArgs) -> anyhow::Result<()> {
    let params = resolve_parameters(job)?;
    let plan = &params.plan;
    let connector = SqlServerConnector::new(params.connection.clone());

    let candidates = scanner::scan(
        &connector,
        &plan.job.database,
        f64::from(plan.job.threshold_percent),
        plan.job.table_filter.as_deref(),
        plan.scan_timeout,
    )
    .await?;

    println!(
        "{} indexes in {} at or above {}%:",
        format!("{}", candidates.len()).cyan(),
        plan.job.database,
        plan.job.threshold_percent
    );
    for candidate in &candidates {
        println!("  {}", candidate);
    }
    Ok(())
}

fn checkpoint_store(source: &ConfigArgs) -> anyhow::Result<FileCheckpointStore> {
    let config = AppConfig::load(source.config.as_deref(), &source.overrides())
        .context("Error loading configuration")?;
    Ok(FileCheckpointStore::new(config.checkpoint_path))
}

fn show_status(source: &ConfigArgs) -> anyhow::Result<()> {
    let store = checkpoint_store(source)?;
    let Some(checkpoint) = store.load()? else {
        println!("No checkpoint at {}", store.path().display());
        return Ok(());
    };

    println!("{}", format!("Checkpoint: {}", checkpoint.job).bold());
    println!(
        "  {} of {} indexes attempted, last updated {}",
        checkpoint.next_index,
        checkpoint.candidates.len(),
        checkpoint.updated_at.to_rfc3339()
    );
    for outcome in &checkpoint.outcomes {
        let marker = match outcome.status {
            RebuildStatus::Succeeded => "✓".green(),
            RebuildStatus::SucceededOffline => "✓".yellow(),
            RebuildStatus::Failed => "✗".red(),
        };
        println!("  {} {}", marker, outcome.candidate);
    }
    if let Some(next) = checkpoint.next_candidate() {
        println!("  {} {} (next)", "→".cyan(), next);
    }
    Ok(())
}

fn reset_checkpoint(source: &ConfigArgs, yes: bool) -> anyhow::Result<()> {
    let store = checkpoint_store(source)?;
    if !store.path().exists() {
        println!("No checkpoint at {}", store.path().display());
        return Ok(());
    }

    let prompt = format!(
        "Discard checkpoint {}? Pending indexes will be rescanned on the next run",
        store.path().display()
    );
    if yes || prompt_confirm(&prompt, Some(false))? {
        store.clear()?;
        println!("Checkpoint discarded");
    }
    Ok(())
}

fn print_config(job: &JobArgs) -> anyhow::Result<()> {
    let config = AppConfig::load(job.source.config.as_deref(), &job.overrides())
        .context("Error loading configuration")?;
    let rendered =
        toml::to_string_pretty(&config.redacted()).context("Error rendering configuration")?;
    println!("{}", rendered);
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
