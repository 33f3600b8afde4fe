use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use colored::Colorize;
use lal_ledger::{
    InMemoryLiveRecords, LedgerConfig, LedgerService, ReconcileOutcome, SyncStatus,
    VerificationResult,
};
use lal_store::{FileBlockStore, FileStoreConfig};
use lal_types::{Block, Metadata};
use serde::{Deserialize, Serialize};

use crate::cli::*;

type Service = LedgerService<FileBlockStore, InMemoryLiveRecords>;

/// How a command finished, mapped onto the process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// At least one chain failed verification.
    IntegrityFailure,
    /// Some items of a bulk operation failed.
    PartialFailure,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::IntegrityFailure => ExitCode::from(2),
            Outcome::PartialFailure => ExitCode::from(3),
        }
    }
}

/// Sections of the TOML file that configure the CLI itself; the ledger
/// sections are read by [`LedgerConfig`].
#[derive(Default, Deserialize)]
struct StoreSection {
    #[serde(default)]
    store: FileStoreConfig,
}

pub fn run_command(cli: Cli) -> anyhow::Result<Outcome> {
    let format = cli.format;
    let (config, store_config) = load_config(cli.config.as_deref())?;
    let live = match &cli.command {
        Command::Reconcile(args) => load_live(&args.live)?,
        Command::Drift(args) => load_live(&args.live)?,
        _ => InMemoryLiveRecords::new(),
    };
    let store = FileBlockStore::open(&cli.store, store_config)
        .with_context(|| format!("opening ledger at {}", cli.store.display()))?;
    let svc = LedgerService::with_config(store, live, config)?;

    match cli.command {
        Command::Append(args) => cmd_append(&svc, args, format),
        Command::History(args) => cmd_history(&svc, args, format),
        Command::Latest(args) => cmd_latest(&svc, args, format),
        Command::Timeline(args) => cmd_timeline(&svc, args, format),
        Command::State(args) => cmd_state(&svc, args, format),
        Command::Project(args) => cmd_project(&svc, args, format),
        Command::Verify(args) => cmd_verify(&svc, args, format),
        Command::Reconcile(args) => cmd_reconcile(&svc, args, format),
        Command::Drift(args) => cmd_drift(&svc, args, format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<(LedgerConfig, FileStoreConfig)> {
    let Some(path) = path else {
        return Ok((LedgerConfig::default(), FileStoreConfig::default()));
    };
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let ledger = LedgerConfig::from_toml_str(&input)?;
    let section: StoreSection =
        toml::from_str(&input).with_context(|| format!("parsing config {}", path.display()))?;
    Ok((ledger, section.store))
}

fn load_live(path: &Path) -> anyhow::Result<InMemoryLiveRecords> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("reading live records {}", path.display()))?;
    InMemoryLiveRecords::from_json_str(&input)
        .with_context(|| format!("parsing live records {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_block(block: &Block) {
    let marker = if block.is_valid {
        String::new()
    } else {
        format!(" {}", "INVALID".red().bold())
    };
    println!(
        "{} {:<20} {}  {}  {}{}",
        format!("#{}", block.sequence_index).yellow(),
        block.event_type.as_str(),
        block.occurred_at.to_rfc3339().dimmed(),
        block.actor_id,
        block.current_hash.short_hex().cyan(),
        marker
    );
}

fn cmd_append(svc: &Service, args: AppendArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let metadata: Metadata = args.meta.into_iter().collect();
    let block = svc.append_event(
        &args.parcel,
        &args.actor,
        &args.project,
        args.event,
        metadata,
        args.at.unwrap_or_else(Utc::now),
    )?;

    match format {
        OutputFormat::Json => print_json(&block)?,
        OutputFormat::Text => {
            println!("{} Appended {}", "✓".green().bold(), block);
            println!("  Previous: {}", block.previous_hash.to_hex().dimmed());
        }
    }
    Ok(Outcome::Success)
}

fn cmd_history(svc: &Service, args: ParcelArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let history = svc.get_history(&args.parcel)?;
    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Text if history.is_empty() => {
            println!("No blocks for {}.", args.parcel.to_string().bold());
        }
        OutputFormat::Text => {
            println!("Parcel {} ({} blocks)", args.parcel.to_string().bold(), history.len());
            history.iter().for_each(print_block);
        }
    }
    Ok(Outcome::Success)
}

fn cmd_latest(svc: &Service, args: ParcelArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let latest = svc.get_latest(&args.parcel)?;
    match (format, &latest) {
        (OutputFormat::Json, _) => print_json(&latest)?,
        (OutputFormat::Text, Some(block)) => print_block(block),
        (OutputFormat::Text, None) => println!("No blocks for {}.", args.parcel.to_string().bold()),
    }
    Ok(Outcome::Success)
}

fn cmd_timeline(svc: &Service, args: ParcelArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let timeline = svc.timeline(&args.parcel)?;
    match format {
        OutputFormat::Json => print_json(&timeline)?,
        OutputFormat::Text => {
            println!("Timeline for {}", args.parcel.to_string().bold());
            for entry in &timeline.entries {
                let status = if entry.is_valid {
                    "✓".green()
                } else {
                    "✗".red()
                };
                println!(
                    "  {} {} {}  {}  by {}",
                    status,
                    format!("#{}", entry.sequence_index).yellow(),
                    entry.occurred_at.format("%Y-%m-%d %H:%M"),
                    entry.summary,
                    entry.actor_id
                );
            }
        }
    }
    Ok(Outcome::Success)
}

fn cmd_state(svc: &Service, args: ParcelArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let state = svc.parcel_state(&args.parcel)?;
    match format {
        OutputFormat::Json => print_json(&state)?,
        OutputFormat::Text => {
            let show = |value: Option<String>| value.unwrap_or_else(|| "-".into());
            println!("Parcel {}", args.parcel.to_string().bold());
            println!("  Blocks: {} ({} invalid)", state.chain_length, state.invalid_blocks);
            println!("  Owner: {}", show(state.owner_name.clone()));
            println!("  Measured area: {}", show(state.measured_area.map(|a| a.to_string())));
            println!("  Notice: {}", show(state.notice_number.clone()));
            println!("  Documents: {}", state.documents);
            println!("  Payment: {:?}", state.payment);
            println!("  Award: {}", show(state.award_amount.map(|a| a.to_string())));
            println!(
                "  Last snapshot: {}",
                show(state.last_snapshot_digest.map(|d| d.short_hex()))
            );
        }
    }
    Ok(Outcome::Success)
}

fn cmd_project(svc: &Service, args: ProjectArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let blocks = svc.get_project_history(&args.project)?;
    let summary = svc.project_summary(&args.project)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "summary": summary,
            "blocks": blocks,
        }))?,
        OutputFormat::Text => {
            println!(
                "Project {}: {} parcels, {} blocks, {} invalid",
                args.project.to_string().bold(),
                summary.parcels,
                summary.blocks,
                summary.invalid_blocks
            );
            for (event_type, count) in &summary.events_by_type {
                println!("  {:<20} {count}", event_type.as_str());
            }
            for block in &blocks {
                print!("  {} ", block.parcel_key.to_string().bold());
                print_block(block);
            }
        }
    }
    Ok(Outcome::Success)
}

fn cmd_verify(svc: &Service, args: VerifyArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let results = match &args.parcel {
        Some(parcel) => vec![svc.verify(parcel)?],
        None => svc.verify_all()?,
    };

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => results.iter().for_each(print_verification),
    }

    if results.iter().all(|r| r.valid) {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::IntegrityFailure)
    }
}

fn print_verification(result: &VerificationResult) {
    let parcel = result.parcel_key.to_string();
    match (result.first_bad_sequence, result.fault) {
        (Some(seq), Some(fault)) => {
            println!(
                "{} {} integrity alert: {} at sequence index {}",
                "✗".red().bold(),
                parcel.bold(),
                fault.to_string().red(),
                seq
            );
            println!("  {} block(s) newly marked invalid", result.invalidated);
        }
        _ => println!(
            "{} {} chain intact ({} blocks)",
            "✓".green().bold(),
            parcel.bold(),
            result.blocks_checked
        ),
    }
}

fn cmd_reconcile(
    svc: &Service,
    args: ReconcileArgs,
    format: OutputFormat,
) -> anyhow::Result<Outcome> {
    if let [parcel] = args.parcel.as_slice() {
        let appended = svc.reconcile_from_live(parcel, &args.actor, &args.project, &args.reason)?;
        match (format, &appended) {
            (OutputFormat::Json, _) => print_json(&appended)?,
            (OutputFormat::Text, Some(block)) => {
                println!("{} Reconciled {}", "✓".green().bold(), block);
            }
            (OutputFormat::Text, None) => {
                println!("{} {} unchanged", "=".dimmed(), parcel.to_string().bold());
            }
        }
        return Ok(Outcome::Success);
    }

    let reports = svc.reconcile_many(&args.parcel, &args.actor, &args.project, &args.reason);
    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Text => {
            for report in &reports {
                let parcel = report.parcel_key.to_string();
                match &report.outcome {
                    ReconcileOutcome::Appended { sequence_index } => println!(
                        "{} {} snapshot at #{}",
                        "✓".green().bold(),
                        parcel.bold(),
                        sequence_index
                    ),
                    ReconcileOutcome::Unchanged => {
                        println!("{} {} unchanged", "=".dimmed(), parcel.bold())
                    }
                    ReconcileOutcome::Failed { error, .. } => {
                        println!("{} {} {}", "✗".red().bold(), parcel.bold(), error.red())
                    }
                }
            }
        }
    }

    let failed = reports
        .iter()
        .any(|r| matches!(r.outcome, ReconcileOutcome::Failed { .. }));
    Ok(if failed {
        Outcome::PartialFailure
    } else {
        Outcome::Success
    })
}

fn cmd_drift(svc: &Service, args: DriftArgs, format: OutputFormat) -> anyhow::Result<Outcome> {
    let status = svc.sync_status(&args.parcel)?;
    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Text => {
            let parcel = args.parcel.to_string();
            match &status {
                SyncStatus::InSync { content_digest } => println!(
                    "{} {} in sync [{}]",
                    "✓".green().bold(),
                    parcel.bold(),
                    content_digest.short_hex().cyan()
                ),
                SyncStatus::Drifted { changed_fields } => println!(
                    "{} {} drifted: {}",
                    "!".yellow().bold(),
                    parcel.bold(),
                    changed_fields.join(", ").yellow()
                ),
                SyncStatus::NeverReconciled => {
                    println!("{} {} never reconciled", "!".yellow().bold(), parcel.bold())
                }
                SyncStatus::LiveRecordMissing => {
                    println!("{} {} has no live record", "✗".red().bold(), parcel.bold())
                }
            }
        }
    }
    Ok(Outcome::Success)
}
