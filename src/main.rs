//! unesm - datamine Bethesda master files with versioned snapshots
//!
//! Usage:
//!   unesm init                         - Set up profiles for master file paths
//!   unesm snapshot [--label L]         - Parse the master file, commit a snapshot
//!   unesm list                         - Show committed snapshots
//!   unesm diff [--old A --new B]       - Field-level diff between snapshots
//!   unesm search QUERY                 - Search records by name/editor id/FormID
//!   unesm show FORMID                  - Show one record's decoded fields
//!   unesm export --format json -o F    - Bulk dump records and fields
//!   unesm unreleased                   - Scan editor ids for unreleased content
//!   unesm purge --keep N / clear       - Retention
//!   unesm stats / strings search Q     - Reporting

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use unesm::config::{self, Config, Profile};
use unesm::diff::{DiffEngine, DiffReport};
use unesm::export::ExportFormat;
use unesm::query;
use unesm::snapshot::{take_snapshot, SnapshotOptions};
use unesm::store::{DiffEntryRow, Snapshot, Store};
use unesm::CancelToken;

#[derive(Parser)]
#[command(name = "unesm")]
#[command(version)]
#[command(about = "Datamine Bethesda master files: snapshots, search, and diffs", long_about = None)]
struct Cli {
    /// Path to the master file (overrides profiles)
    #[arg(long, global = true)]
    esm: Option<PathBuf>,

    /// Named profile from 'unesm init'
    #[arg(long, short, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DiffFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum DumpFormat {
    Json,
    Csv,
}

impl From<DumpFormat> for ExportFormat {
    fn from(f: DumpFormat) -> Self {
        match f {
            DumpFormat::Json => ExportFormat::Json,
            DumpFormat::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Set up profiles for master file paths (interactive)
    Init,
    /// Parse the master file and commit a snapshot
    Snapshot {
        /// Label stored with the snapshot
        #[arg(long)]
        label: Option<String>,
        /// Language token for the localized string tables
        #[arg(long, default_value = "en")]
        language: String,
        /// Also persist every raw subrecord (full-fidelity mode)
        #[arg(long)]
        keep_subrecords: bool,
    },
    /// List committed snapshots
    List,
    /// Diff two snapshots (defaults to the two most recent)
    Diff {
        /// Diff the two most recent snapshots (the default)
        #[arg(long, conflicts_with_all = ["old", "new"])]
        latest: bool,
        /// Older snapshot id
        #[arg(long)]
        old: Option<i64>,
        /// Newer snapshot id
        #[arg(long)]
        new: Option<i64>,
        /// Diff the latest snapshot against PROFILE's latest (cross-database)
        #[arg(long, conflicts_with = "other_esm")]
        vs: Option<String>,
        /// Diff the latest snapshot against another master's database
        #[arg(long)]
        other_esm: Option<PathBuf>,
        /// Restrict to one record type
        #[arg(long = "type")]
        type_filter: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: DiffFormat,
        /// Write the diff to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Search records by name, editor id, or FormID
    Search {
        query: String,
        /// Restrict to one record type
        #[arg(long = "type")]
        type_filter: Option<String>,
        /// Glob over editor ids (e.g. 'ATX_*')
        #[arg(long)]
        edid: Option<String>,
    },
    /// Show one record with its decoded fields
    Show {
        /// FormID as 0x-hex or decimal
        form_id: String,
        /// Resolve FormID field values to editor ids
        #[arg(long)]
        expand: bool,
    },
    /// Dump records and decoded fields
    Export {
        #[arg(long, value_enum)]
        format: DumpFormat,
        /// Restrict to one record type
        #[arg(long = "type")]
        type_filter: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Scan editor ids for unreleased-content prefixes
    Unreleased,
    /// Delete all but the N most recent snapshots
    Purge {
        #[arg(long)]
        keep: i64,
    },
    /// Delete every snapshot
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Snapshot and database statistics
    Stats,
    /// Localized string operations
    Strings {
        #[command(subcommand)]
        command: StringsCommand,
    },
}

#[derive(Subcommand)]
enum StringsCommand {
    /// Substring search over the latest snapshot's strings
    Search { query: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let code = match run(cli, cancel).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

/// 1 for user errors, 2 for data/store errors, 130 when cancelled.
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<unesm::Error>() {
        Some(unesm::Error::Cancelled) => 130,
        Some(unesm::Error::ConfigMissing(_)) => 1,
        Some(_) => 2,
        None => 1,
    }
}

/// Resolved paths and the open store for the active profile.
struct Env {
    esm: PathBuf,
    store: Store,
}

async fn open_env(cli: &Cli) -> Result<Env> {
    let config = Config::load()?;
    let esm = config.resolve_esm(cli.esm.as_deref(), cli.profile.as_deref())?;
    let store = Store::open(Store::derive_db_path(&esm)).await?;
    Ok(Env { esm, store })
}

async fn require_latest(store: &Store) -> Result<Snapshot> {
    store
        .latest_snapshot()
        .await?
        .ok_or_else(|| anyhow!("no snapshots yet. Run 'unesm snapshot' first"))
}

async fn run(cli: Cli, cancel: CancelToken) -> Result<()> {
    match &cli.command {
        Commands::Init => init_profiles(),
        Commands::Snapshot {
            label,
            language,
            keep_subrecords,
        } => {
            let env = open_env(&cli).await?;
            let options = SnapshotOptions {
                label: label.clone().unwrap_or_else(|| "snapshot".into()),
                language: language.clone(),
                keep_subrecords: *keep_subrecords,
                progress: true,
                ..SnapshotOptions::default()
            };
            let ba2 = config::derive_ba2_path(&env.esm);
            println!("Parsing {}...", env.esm.display());
            let outcome =
                take_snapshot(&env.store, &env.esm, Some(ba2.as_path()), &options, &cancel)
                    .await?;
            println!(
                "Snapshot #{} committed: {} records, {} strings",
                outcome.snapshot_id, outcome.record_count, outcome.string_count
            );
            Ok(())
        }
        Commands::List => {
            let env = open_env(&cli).await?;
            let snapshots = env.store.list_snapshots().await?;
            if snapshots.is_empty() {
                println!("No snapshots. Run 'unesm snapshot' first.");
                return Ok(());
            }
            println!(
                "{:>4} {:<20} {:<20} {:>9} {:>9} {}",
                "ID", "Label", "Created", "Records", "Strings", "Source hash"
            );
            for s in snapshots {
                println!(
                    "{:>4} {:<20} {:<20} {:>9} {:>9} {}",
                    s.id,
                    s.label,
                    s.created_at,
                    s.record_count,
                    s.string_count,
                    &s.esm_sha256[..16.min(s.esm_sha256.len())]
                );
            }
            Ok(())
        }
        Commands::Diff {
            latest: _,
            old,
            new,
            vs,
            other_esm,
            type_filter,
            format,
            output,
        } => {
            let env = open_env(&cli).await?;
            run_diff(
                &env,
                *old,
                *new,
                vs.as_deref(),
                other_esm.as_deref(),
                type_filter.as_deref(),
                *format,
                output.as_deref(),
                &cancel,
            )
            .await
        }
        Commands::Search {
            query,
            type_filter,
            edid,
        } => {
            let env = open_env(&cli).await?;
            let snap = require_latest(&env.store).await?;
            let hits = query::find(
                &env.store,
                snap.id,
                query,
                type_filter.as_deref(),
                edid.as_deref(),
            )
            .await?;
            if hits.is_empty() {
                println!("No matches");
                return Ok(());
            }
            for r in &hits {
                println!(
                    "0x{:08X} {:<4} {:<40} {}",
                    r.form_id,
                    r.record_type,
                    r.editor_id.as_deref().unwrap_or("-"),
                    r.full_name.as_deref().unwrap_or("")
                );
            }
            println!("\n{} matches", hits.len());
            Ok(())
        }
        Commands::Show { form_id, expand } => {
            let env = open_env(&cli).await?;
            let snap = require_latest(&env.store).await?;
            let form_id = query::parse_form_id(form_id)
                .ok_or_else(|| anyhow!("invalid FormID '{}': use 0x-hex or decimal", form_id))?;
            let Some(detail) = query::get(&env.store, snap.id, form_id).await? else {
                println!("0x{:08X} not found in snapshot #{}", form_id, snap.id);
                return Ok(());
            };

            let r = &detail.record;
            println!("FormID:    0x{:08X}", r.form_id);
            println!("Type:      {}", r.record_type);
            println!("Editor ID: {}", r.editor_id.as_deref().unwrap_or("-"));
            println!("Name:      {}", r.full_name.as_deref().unwrap_or("-"));
            println!("Hash:      {}", &r.data_hash[..16.min(r.data_hash.len())]);
            if !detail.fields.is_empty() {
                println!("\nFields:");
                for f in &detail.fields {
                    let mut line = format!("  {:<28} {:<8} {}", f.name, f.kind, f.value);
                    if *expand && f.kind == "formid" {
                        if let Some(target) = query::parse_form_id(&f.value) {
                            if let Some(name) = resolve_ref(&env.store, snap.id, target).await? {
                                line.push_str(&format!("  ({})", name));
                            }
                        }
                    }
                    println!("{}", line);
                }
            }
            Ok(())
        }
        Commands::Export {
            format,
            type_filter,
            output,
        } => {
            let env = open_env(&cli).await?;
            let snap = require_latest(&env.store).await?;
            let mut file = std::fs::File::create(output)
                .with_context(|| format!("cannot create {}", output.display()))?;
            let count = unesm::export::export(
                &env.store,
                snap.id,
                (*format).into(),
                type_filter.as_deref(),
                &mut file,
            )
            .await?;
            println!("Exported {} records to {}", count, output.display());
            Ok(())
        }
        Commands::Unreleased => {
            let env = open_env(&cli).await?;
            let snap = require_latest(&env.store).await?;
            let hits = query::unreleased(&env.store, snap.id).await?;
            for r in &hits {
                println!(
                    "0x{:08X} {:<4} {:<40} {}",
                    r.form_id,
                    r.record_type,
                    r.editor_id.as_deref().unwrap_or("-"),
                    r.full_name.as_deref().unwrap_or("")
                );
            }
            println!("\n{} unreleased candidates", hits.len());
            Ok(())
        }
        Commands::Purge { keep } => {
            let env = open_env(&cli).await?;
            let removed = env.store.purge(*keep).await?;
            println!("Removed {} snapshots, kept the {} most recent", removed, keep);
            Ok(())
        }
        Commands::Clear { yes } => {
            let env = open_env(&cli).await?;
            if !yes && !confirm("Delete ALL snapshots?")? {
                println!("Aborted.");
                return Ok(());
            }
            let removed = env.store.clear_all().await?;
            println!("Removed {} snapshots", removed);
            Ok(())
        }
        Commands::Stats => {
            let env = open_env(&cli).await?;
            let snap = require_latest(&env.store).await?;
            println!("Database:  {}", env.store.db_path().display());
            println!("Size:      {}", format_size(env.store.db_size()));
            println!(
                "Latest:    #{} '{}' ({} records, {} strings)",
                snap.id, snap.label, snap.record_count, snap.string_count
            );
            println!("\n{:<6} {:>9}", "Type", "Count");
            for (kind, count) in env.store.type_counts(snap.id).await?.into_iter().take(30) {
                println!("{:<6} {:>9}", kind, count);
            }
            Ok(())
        }
        Commands::Strings { command } => {
            let StringsCommand::Search { query } = command;
            let env = open_env(&cli).await?;
            let snap = require_latest(&env.store).await?;
            let hits = query::strings_search(&env.store, snap.id, query).await?;
            for (id, text) in &hits {
                println!("0x{:08X}  {}", id, text);
            }
            println!("\n{} matches", hits.len());
            Ok(())
        }
    }
}

async fn resolve_ref(store: &Store, snapshot_id: i64, form_id: u32) -> Result<Option<String>> {
    if let Some(name) = store.keyword_name(snapshot_id, form_id).await? {
        return Ok(Some(name));
    }
    Ok(store
        .get_record(snapshot_id, form_id)
        .await?
        .and_then(|r| r.editor_id.or(r.full_name)))
}

#[allow(clippy::too_many_arguments)]
async fn run_diff(
    env: &Env,
    old: Option<i64>,
    new: Option<i64>,
    vs: Option<&str>,
    other_esm: Option<&Path>,
    type_filter: Option<&str>,
    format: DiffFormat,
    output: Option<&Path>,
    cancel: &CancelToken,
) -> Result<()> {
    // Cross-database: our latest is the old side, the other master's latest
    // is the new side.
    let other_store = match (vs, other_esm) {
        (Some(profile), _) => {
            let config = Config::load()?;
            let esm = config.profile_esm(profile)?;
            Some(Store::open(Store::derive_db_path(&esm)).await?)
        }
        (None, Some(esm)) => Some(Store::open(Store::derive_db_path(esm)).await?),
        (None, None) => None,
    };

    let (report, old_snap, new_snap) = match &other_store {
        Some(other) => {
            let old_snap = require_latest(&env.store).await?;
            let new_snap = require_latest(other).await?;
            let report = DiffEngine::cross(&env.store, other)
                .compare(old_snap.id, new_snap.id, type_filter, cancel)
                .await?;
            (report, old_snap, new_snap)
        }
        None => {
            let (old_snap, new_snap) = match (old, new) {
                (Some(a), Some(b)) => {
                    let old_snap = env
                        .store
                        .get_snapshot(a)
                        .await?
                        .ok_or(unesm::Error::SnapshotNotFound(a))?;
                    let new_snap = env
                        .store
                        .get_snapshot(b)
                        .await?
                        .ok_or(unesm::Error::SnapshotNotFound(b))?;
                    (old_snap, new_snap)
                }
                (None, None) => env.store.two_latest().await?.ok_or_else(|| {
                    anyhow!("need at least two snapshots to diff. Run 'unesm snapshot' again after an update")
                })?,
                _ => return Err(anyhow!("--old and --new must be given together")),
            };
            let report = DiffEngine::new(&env.store)
                .compare(old_snap.id, new_snap.id, type_filter, cancel)
                .await?;
            (report, old_snap, new_snap)
        }
    };

    if report.identical_sources {
        eprintln!("warning: both snapshots were taken from identical master files");
    } else {
        persist_diff(&env.store, &report).await?;
    }

    let rendered = match format {
        DiffFormat::Json => serde_json::to_string_pretty(&report)? + "\n",
        DiffFormat::Text => render_diff_text(&report, &old_snap, &new_snap),
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("Diff written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

async fn persist_diff(store: &Store, report: &DiffReport) -> Result<()> {
    let mut entries = Vec::with_capacity(report.total_changes());
    for r in &report.added {
        entries.push(DiffEntryRow {
            form_id: r.form_id,
            change_type: "added".into(),
            record_type: Some(r.record_type.clone()),
            editor_id: r.editor_id.clone(),
            full_name: r.full_name.clone(),
            old_hash: None,
            new_hash: Some(r.data_hash.clone()),
        });
    }
    for r in &report.removed {
        entries.push(DiffEntryRow {
            form_id: r.form_id,
            change_type: "removed".into(),
            record_type: Some(r.record_type.clone()),
            editor_id: r.editor_id.clone(),
            full_name: r.full_name.clone(),
            old_hash: Some(r.data_hash.clone()),
            new_hash: None,
        });
    }
    for r in &report.modified {
        entries.push(DiffEntryRow {
            form_id: r.form_id,
            change_type: "modified".into(),
            record_type: Some(r.record_type.clone()),
            editor_id: r.editor_id.clone(),
            full_name: r.full_name.clone(),
            old_hash: Some(r.old_hash.clone()),
            new_hash: Some(r.new_hash.clone()),
        });
    }
    store
        .save_diff(report.old_snapshot_id, report.new_snapshot_id, &entries)
        .await?;
    Ok(())
}

fn render_diff_text(report: &DiffReport, old_snap: &Snapshot, new_snap: &Snapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Diff snapshot #{} '{}' -> #{} '{}'\n",
        old_snap.id, old_snap.label, new_snap.id, new_snap.label
    ));
    out.push_str(&format!(
        "Added: {}  Removed: {}  Modified: {}\n",
        report.added.len(),
        report.removed.len(),
        report.modified.len()
    ));

    if !report.added.is_empty() {
        out.push_str("\nADDED:\n");
        for r in &report.added {
            out.push_str(&format!(
                "  {} {:<4} {:<40} {}\n",
                r.form_id_hex(),
                r.record_type,
                r.editor_id.as_deref().unwrap_or("-"),
                r.full_name.as_deref().unwrap_or("")
            ));
        }
    }
    if !report.removed.is_empty() {
        out.push_str("\nREMOVED:\n");
        for r in &report.removed {
            out.push_str(&format!(
                "  {} {:<4} {:<40} {}\n",
                r.form_id_hex(),
                r.record_type,
                r.editor_id.as_deref().unwrap_or("-"),
                r.full_name.as_deref().unwrap_or("")
            ));
        }
    }
    if !report.modified.is_empty() {
        out.push_str("\nMODIFIED:\n");
        for r in &report.modified {
            out.push_str(&format!(
                "  {} {:<4} {:<40} {}\n",
                r.form_id_hex(),
                r.record_type,
                r.editor_id.as_deref().unwrap_or("-"),
                r.full_name.as_deref().unwrap_or("")
            ));
            for f in &r.fields {
                match (&f.old, &f.new) {
                    (Some(old), Some(new)) => {
                        out.push_str(&format!("    {}: {} -> {}\n", f.name, old, new))
                    }
                    (None, Some(new)) => {
                        out.push_str(&format!("    {}: (added) {}\n", f.name, new))
                    }
                    (Some(old), None) => {
                        out.push_str(&format!("    {}: (removed) {}\n", f.name, old))
                    }
                    (None, None) => {}
                }
            }
        }
    }
    out
}

fn init_profiles() -> Result<()> {
    let mut config = Config::load()?;

    if !config.profiles.is_empty() {
        println!("Current profiles:");
        for (name, p) in &config.profiles {
            let marker = if config.default_profile.as_deref() == Some(name) {
                " (default)"
            } else {
                ""
            };
            println!("  {}: {}{}", name, p.esm.display(), marker);
        }
        if !confirm("Overwrite existing configuration?")? {
            println!("Aborted.");
            return Ok(());
        }
        config = Config::default();
    }

    println!("Each profile stores a path to a master file (e.g. SeventySix.esm).\n");
    loop {
        let default_name = if config.profiles.is_empty() {
            Some("default")
        } else {
            None
        };
        let name = prompt("Profile name", default_name)?;
        if !config::validate_profile_name(&name) {
            println!("Invalid name '{}'. Use letters, digits, hyphens, underscores.", name);
            continue;
        }

        let esm = loop {
            let path = PathBuf::from(prompt("Path to the master file", None)?);
            if path.is_file() {
                break path;
            }
            println!("File not found: {}", path.display());
        };

        if config.default_profile.is_none() {
            config.default_profile = Some(name.clone());
        }
        config.profiles.insert(name, Profile { esm });

        if !confirm("Add another profile?")? {
            break;
        }
    }

    let path = config.save()?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn prompt(message: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", message, d),
        None => print!("{}: ", message),
    }
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim().trim_matches('"').trim_matches('\'');
    if trimmed.is_empty() {
        if let Some(d) = default {
            return Ok(d.to_string());
        }
    }
    Ok(trimmed.to_string())
}

fn confirm(message: &str) -> Result<bool> {
    let answer = prompt(&format!("{} [y/N]", message), None)?;
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} B", size)
    }
}
