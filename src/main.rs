use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use studywatch::{
    AppConfig, Cli, Command, Coordinator, JsonFileStore, Normalizer, PortalSource, RunMode,
    RunOutcome, RunReport,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Monitor = Coordinator<PortalSource, JsonFileStore>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("studywatch: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<u8> {
    let config_found = cli.config.exists();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {:?}", cli.config))?;
    init_tracing(cli, &config);
    if !config_found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    let source =
        PortalSource::new(config.portal_config()?).context("failed to set up portal client")?;
    let store = JsonFileStore::new(&config.storage.path);
    let normalizer = Normalizer::new(config.base_url()?);
    let mut monitor = Coordinator::new(source, store, normalizer, config.coordinator_options());

    match cli.command() {
        Command::Discover => discover(&monitor),
        Command::Reset => reset(&monitor),
        Command::DryRun => Ok(check(&monitor, RunMode::DryRun)),
        Command::Check => {
            for channel in config
                .build_channels()
                .context("failed to configure notification channels")?
            {
                monitor.push_channel(channel);
            }
            if monitor.channel_count() == 0 {
                println!(
                    "No notification channels configured; new studies will only be listed here."
                );
            }
            Ok(check(&monitor, RunMode::Normal))
        }
    }
}

fn init_tracing(cli: &Cli, config: &AppConfig) {
    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level.directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_directive())),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn discover(monitor: &Monitor) -> Result<u8> {
    let year_types = monitor
        .discover_categories()
        .context("failed to discover study year types")?;
    if year_types.is_empty() {
        println!("No study year types found. The portal may be unavailable.");
        return Ok(1);
    }
    println!("\nFound {} study year type(s):\n", year_types.len());
    println!("{:<10} Label", "ID");
    println!("{}", "-".repeat(60));
    for year_type in &year_types {
        println!("{:<10} {}", year_type.id, year_type.label);
    }
    println!("\nAdd desired IDs to your config under monitor.year_type_ids");
    Ok(0)
}

fn reset(monitor: &Monitor) -> Result<u8> {
    let cleared = monitor
        .reset_history()
        .context("failed to clear seen studies")?;
    println!("Cleared {cleared} seen studies. Next run will treat all studies as new.");
    Ok(0)
}

fn check(monitor: &Monitor, mode: RunMode) -> u8 {
    println!("Checking SPP OpsPortal for studies...");
    let report = monitor.run(mode);
    render_report(&report);
    report.exit_code() as u8
}

fn render_report(report: &RunReport) {
    if let RunOutcome::Aborted(reason) = &report.outcome {
        println!("Run aborted: {reason}");
        if report.delta.is_empty() {
            return;
        }
    }

    println!("Found {} total study entries", report.fetched);
    if !report.skipped.is_empty() {
        println!("Skipped {} malformed entries", report.skipped.len());
    }
    if report.delta.is_empty() {
        println!("No new studies since last check.");
        return;
    }

    let banner = "=".repeat(60);
    println!("\n{banner}");
    println!("  {} NEW STUDY POSTING(S) DETECTED", report.delta.len());
    println!("{banner}\n");
    for (idx, record) in report.delta.iter().enumerate() {
        println!("  {}. {}", idx + 1, record.title);
        println!("     Category: {}", record.year_type.label);
        println!("     URL: {}", record.url);
        for (name, value) in record.visible_details() {
            println!("     {name}: {value}");
        }
        println!();
    }

    if report.mode == RunMode::DryRun {
        println!("[DRY RUN] Skipping notifications and not marking studies as seen.");
        return;
    }

    for channel in &report.channels {
        match &channel.result {
            Ok(sent) => println!("{}: delivered to {sent} recipient(s).", channel.channel),
            Err(err) => println!("{}: FAILED ({err})", channel.channel),
        }
    }
    if report.committed {
        println!(
            "\nMarked {} studies as seen. Total tracked: {}",
            report.delta.len(),
            report.tracked
        );
    } else if !report.is_aborted() {
        println!("\nNo channel delivered; studies stay unseen and will be retried next run.");
    }
}
