use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use lal_types::{ActorId, EventType, ParcelKey, ProjectId};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "lal",
    about = "Land Acquisition Ledger: tamper-evident parcel event history",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Ledger log file
    #[arg(long, global = true, default_value = "lal-ledger.log")]
    pub store: PathBuf,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Append a lifecycle event to a parcel chain
    Append(AppendArgs),
    /// Show every block of a parcel
    History(ParcelArgs),
    /// Show the newest block of a parcel
    Latest(ParcelArgs),
    /// Show the audit timeline of a parcel
    Timeline(ParcelArgs),
    /// Show the folded state of a parcel
    State(ParcelArgs),
    /// Show all blocks and a summary for a project
    Project(ProjectArgs),
    /// Verify chain integrity
    Verify(VerifyArgs),
    /// Reconcile parcels against live records
    Reconcile(ReconcileArgs),
    /// Compare live records with the last reconciled snapshot
    Drift(DriftArgs),
}

#[derive(Args)]
pub struct AppendArgs {
    #[arg(long)]
    pub parcel: ParcelKey,
    #[arg(long)]
    pub actor: ActorId,
    #[arg(long)]
    pub project: ProjectId,
    /// Event type, e.g. MEASUREMENT_RECORDED or measurement-recorded
    #[arg(long)]
    pub event: EventType,
    /// Metadata entry `key=value`; values are parsed as JSON when possible
    #[arg(long = "meta", value_parser = parse_meta)]
    pub meta: Vec<(String, Value)>,
    /// RFC 3339 timestamp of the event (defaults to now)
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Args)]
pub struct ParcelArgs {
    #[arg(long)]
    pub parcel: ParcelKey,
}

#[derive(Args)]
pub struct ProjectArgs {
    #[arg(long)]
    pub project: ProjectId,
}

#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["parcel", "all"])))]
pub struct VerifyArgs {
    #[arg(long)]
    pub parcel: Option<ParcelKey>,
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ReconcileArgs {
    /// Parcel to reconcile; repeat for a bulk run
    #[arg(long, required = true)]
    pub parcel: Vec<ParcelKey>,
    #[arg(long)]
    pub actor: ActorId,
    #[arg(long)]
    pub project: ProjectId,
    #[arg(long, default_value = "manual reconcile")]
    pub reason: String,
    /// JSON file mapping parcel keys to live-record field maps
    #[arg(long)]
    pub live: PathBuf,
}

#[derive(Args)]
pub struct DriftArgs {
    #[arg(long)]
    pub parcel: ParcelKey,
    #[arg(long)]
    pub live: PathBuf,
}

fn parse_meta(input: &str) -> Result<(String, Value), String> {
    let (key, raw) = input
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{input}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("metadata key must not be empty".into());
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp `{input}`: {e}"))
}
