//! Larder CLI - Track household inventory from the command line
//!
//! Works entirely offline; syncing with the hosted store is explicit.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use larder_core::backup::{BackupOptions, BackupService};
use larder_core::export::{render_items_export, suggested_export_file_name};
use larder_core::inventory::{Inventory, ItemFilter};
use larder_core::models::{MutationRecord, SnapshotId};
use larder_core::queue::MutationQueue;
use larder_core::reconcile::{MergePolicy, Reconciler};
use larder_core::remote::{HttpRemote, RemoteBackups, RemoteConfig, RemoteItems};
use larder_core::store::LocalStore;
use larder_core::sync::{SyncOptions, SyncOutcome, SyncService, SyncTrigger};
use larder_core::{Item, ItemDraft};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "larder")]
#[command(about = "Track your household inventory from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional path to the local data directory
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Quick add: larder "Oat milk"
    #[arg(trailing_var_arg = true)]
    item: Vec<String>,
}

#[derive(clap::Args, Default)]
struct DraftArgs {
    /// Category, e.g. dairy or pantry
    #[arg(short = 'c', long)]
    category: Option<String>,
    /// Brand name
    #[arg(long)]
    brand: Option<String>,
    /// Storage location, e.g. fridge
    #[arg(short = 'l', long)]
    location: Option<String>,
    /// Free-form notes
    #[arg(long)]
    notes: Option<String>,
    /// Quantity on hand
    #[arg(short = 'q', long)]
    quantity: Option<u32>,
    /// Expiry date
    #[arg(long, value_name = "YYYY-MM-DD")]
    expires: Option<String>,
    /// Production date
    #[arg(long, value_name = "YYYY-MM-DD")]
    produced: Option<String>,
    /// Medicine tag; repeat for several
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
}

impl DraftArgs {
    fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.brand.is_none()
            && self.location.is_none()
            && self.notes.is_none()
            && self.quantity.is_none()
            && self.expires.is_none()
            && self.produced.is_none()
            && self.tags.is_empty()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add an item to the inventory
    #[command(alias = "new")]
    Add {
        /// Item name
        name: Vec<String>,
        #[command(flatten)]
        draft: DraftArgs,
    },
    /// List items
    List {
        /// Filter by category
        #[arg(short = 'c', long)]
        category: Option<String>,
        /// Filter by storage location
        #[arg(short = 'l', long)]
        location: Option<String>,
        /// Only medicine items
        #[arg(long)]
        medicine: bool,
        /// Only items expiring within this many days
        #[arg(long, value_name = "DAYS")]
        expiring: Option<i64>,
        /// Substring match against name, brand, and notes
        #[arg(short = 's', long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one item in full
    Show {
        /// Item ID, unique ID prefix, or unique name
        id: String,
    },
    /// Edit an existing item
    Edit {
        /// Item ID, unique ID prefix, or unique name
        id: String,
        /// New item name
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        draft: DraftArgs,
    },
    /// Remove an item
    #[command(alias = "rm")]
    Remove {
        /// Item ID, unique ID prefix, or unique name
        id: String,
    },
    /// Run a sync pass against the hosted store
    Sync {
        /// Keep running and sync periodically
        #[arg(long)]
        watch: bool,
        /// Seconds between passes in watch mode
        #[arg(long, value_name = "SECS", default_value = "300")]
        interval: u64,
    },
    /// Show sync state and queue depth
    Status,
    /// Show recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect the pending mutation queue
    Queue {
        /// Show dead letters instead of pending mutations
        #[arg(long)]
        dead: bool,
        /// Move dead letters back into the queue
        #[arg(long)]
        retry_dead: bool,
        /// Drop all dead letters
        #[arg(long)]
        clear_dead: bool,
    },
    /// Take and manage backup snapshots
    #[command(group(clap::ArgGroup::new("backup_action").args(["list", "restore", "delete"])))]
    Backup {
        /// List known snapshots instead of creating one
        #[arg(long)]
        list: bool,
        /// Restore the given snapshot
        #[arg(long, value_name = "ID")]
        restore: Option<String>,
        /// Delete the given snapshot from both sides
        #[arg(long, value_name = "ID")]
        delete: Option<String>,
    },
    /// Export items
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Output file or directory (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Show the resolved configuration
    Config,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] larder_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No item name provided")]
    EmptyName,
    #[error("No fields to update; pass at least one field flag")]
    NothingToEdit,
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Invalid snapshot id '{0}'")]
    InvalidSnapshotId(String),
    #[error(
        "Sync is not configured. Set LARDER_ENDPOINT, LARDER_APP_ID and LARDER_API_KEY to enable `larder sync`."
    )]
    SyncNotConfigured,
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

impl From<ExportFormat> for larder_core::export::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => Self::Json,
            ExportFormat::Csv => Self::Csv,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("larder=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);

    match cli.command {
        Some(Commands::Add { name, draft }) => run_add(&name, &draft, &data_dir)?,
        Some(Commands::List {
            category,
            location,
            medicine,
            expiring,
            search,
            json,
        }) => {
            let filter = ItemFilter {
                category,
                location,
                medicine_only: medicine,
                expiring_within_days: expiring,
                search,
            };
            run_list(&filter, json, &data_dir)?;
        }
        Some(Commands::Show { id }) => run_show(&id, &data_dir)?,
        Some(Commands::Edit { id, name, draft }) => run_edit(&id, name.as_deref(), &draft, &data_dir)?,
        Some(Commands::Remove { id }) => run_remove(&id, &data_dir)?,
        Some(Commands::Sync { watch, interval }) => run_sync(watch, interval, &data_dir).await?,
        Some(Commands::Status) => run_status(&data_dir)?,
        Some(Commands::Conflicts { limit, json }) => run_conflicts(limit, json, &data_dir)?,
        Some(Commands::Queue {
            dead,
            retry_dead,
            clear_dead,
        }) => run_queue(dead, retry_dead, clear_dead, &data_dir)?,
        Some(Commands::Backup {
            list,
            restore,
            delete,
        }) => run_backup(list, restore.as_deref(), delete.as_deref(), &data_dir).await?,
        Some(Commands::Export { format, output }) => {
            run_export(format, output.as_deref(), &data_dir)?;
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        Some(Commands::Config) => run_config(&data_dir),
        None => {
            // Quick add mode: larder "Oat milk"
            if cli.item.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.item, &DraftArgs::default(), &data_dir)?;
            }
        }
    }

    Ok(())
}

fn run_add(name_parts: &[String], args: &DraftArgs, data_dir: &Path) -> Result<(), CliError> {
    let name = name_parts.join(" ");
    if name.trim().is_empty() {
        return Err(CliError::EmptyName);
    }

    let mut draft = ItemDraft::new(name);
    apply_draft_args(&mut draft, args)?;

    let (_, _, inventory) = open_inventory(data_dir)?;
    let item = inventory.add(draft)?;
    println!("{}", item.id);
    Ok(())
}

fn run_list(filter: &ItemFilter, as_json: bool, data_dir: &Path) -> Result<(), CliError> {
    let (_, _, inventory) = open_inventory(data_dir)?;
    let items = inventory.list(filter);

    if as_json {
        let rows = items.iter().map(item_to_list_row).collect::<Vec<ItemListRow>>();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if items.is_empty() {
        println!("No items");
    } else {
        for line in format_item_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}

fn run_show(id: &str, data_dir: &Path) -> Result<(), CliError> {
    let (_, queue, inventory) = open_inventory(data_dir)?;
    let item_id = inventory.resolve_id(id)?;
    let item = inventory
        .get(&item_id)
        .ok_or_else(|| larder_core::Error::NotFound(format!("item {item_id}")))?;

    let now = Utc::now().timestamp_millis();
    println!("id:        {}", item.id);
    println!("name:      {}", item.name);
    println!("category:  {}", item.category.as_deref().unwrap_or("-"));
    println!("brand:     {}", item.brand.as_deref().unwrap_or("-"));
    println!("location:  {}", item.location.as_deref().unwrap_or("-"));
    println!("quantity:  {}", item.quantity);
    if let Some(expiry) = item.expiry_date {
        println!("expires:   {} ({})", format_day(expiry), format_expiry(expiry, now));
    }
    if let Some(produced) = item.production_date {
        println!("produced:  {}", format_day(produced));
    }
    if item.is_medicine() {
        println!("tags:      {}", item.medicine_tags.join(", "));
    }
    if let Some(notes) = &item.notes {
        println!("notes:     {notes}");
    }
    println!("added:     {}", format_relative_time(item.created_at, now));
    println!("updated:   {}", format_relative_time(item.updated_at, now));
    if queue.queued_item_ids().contains(&item.id) {
        println!("sync:      change queued");
    }
    Ok(())
}

fn run_edit(
    id: &str,
    name: Option<&str>,
    args: &DraftArgs,
    data_dir: &Path,
) -> Result<(), CliError> {
    if name.is_none() && args.is_empty() {
        return Err(CliError::NothingToEdit);
    }

    let (_, _, inventory) = open_inventory(data_dir)?;
    let item_id = inventory.resolve_id(id)?;
    let item = inventory
        .get(&item_id)
        .ok_or_else(|| larder_core::Error::NotFound(format!("item {item_id}")))?;

    let mut draft = ItemDraft::from(&item);
    if let Some(name) = name {
        draft.name = name.to_string();
    }
    apply_draft_args(&mut draft, args)?;

    let updated = inventory.update(&item_id, draft)?;
    println!("{}", updated.id);
    Ok(())
}

fn run_remove(id: &str, data_dir: &Path) -> Result<(), CliError> {
    let (_, _, inventory) = open_inventory(data_dir)?;
    let item_id = inventory.resolve_id(id)?;
    let removed = inventory.remove(&item_id)?;
    println!("{}", removed.id);
    Ok(())
}

async fn run_sync(watch: bool, interval_secs: u64, data_dir: &Path) -> Result<(), CliError> {
    let service = open_sync_service(data_dir, Duration::from_secs(interval_secs))?;

    let outcome = service.sync(SyncTrigger::Manual).await;
    print_sync_outcome(&outcome, &service);

    if watch {
        println!("Watching; syncing every {interval_secs}s (ctrl-c to stop)");
        let handle = service.spawn_periodic();
        tokio::signal::ctrl_c().await?;
        handle.abort();
        println!("Stopped");
        return Ok(());
    }

    match outcome {
        SyncOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
        _ => Ok(()),
    }
}

fn run_status(data_dir: &Path) -> Result<(), CliError> {
    let (store, queue, _) = open_inventory(data_dir)?;
    let meta = store.load_sync_meta();
    let now = Utc::now().timestamp_millis();

    let last_sync = meta
        .last_sync_at
        .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now));
    let last_backup = meta
        .last_backup_at
        .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now));

    println!("items:        {}", store.load_items().len());
    println!("last sync:    {last_sync}");
    println!("last backup:  {last_backup}");
    println!("queued:       {} change(s)", queue.len());
    println!("dead letters: {}", queue.dead_letter_len());
    if let Some(error) = meta.last_error {
        println!("last error:   {error}");
    }
    Ok(())
}

fn run_conflicts(limit: usize, as_json: bool, data_dir: &Path) -> Result<(), CliError> {
    let store = open_store(data_dir)?;
    let conflicts = store.load_conflicts();
    let shown = &conflicts[..conflicts.len().min(limit)];

    if as_json {
        println!("{}", serde_json::to_string_pretty(shown)?);
        return Ok(());
    }
    if shown.is_empty() {
        println!("No conflicts recorded");
        return Ok(());
    }

    let now = Utc::now().timestamp_millis();
    for conflict in shown {
        println!(
            "{:<12}  {:<24}  local {} vs remote {}  ({})",
            format_relative_time(conflict.detected_at, now),
            conflict.item_name,
            format_timestamp(conflict.local_updated_at),
            format_timestamp(conflict.remote_updated_at),
            conflict.resolution.as_str()
        );
    }
    Ok(())
}

fn run_queue(
    dead: bool,
    retry_dead: bool,
    clear_dead: bool,
    data_dir: &Path,
) -> Result<(), CliError> {
    let (_, queue, _) = open_inventory(data_dir)?;

    if retry_dead {
        let moved = queue.requeue_dead_letters()?;
        println!("Requeued {moved} dead letter(s)");
        return Ok(());
    }
    if clear_dead {
        let dropped = queue.clear_dead_letters()?;
        println!("Dropped {dropped} dead letter(s)");
        return Ok(());
    }

    let entries = if dead { queue.dead_letters() } else { queue.entries() };
    if entries.is_empty() {
        println!("{}", if dead { "No dead letters" } else { "Queue is empty" });
        return Ok(());
    }
    for line in format_queue_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

async fn run_backup(
    list: bool,
    restore: Option<&str>,
    delete: Option<&str>,
    data_dir: &Path,
) -> Result<(), CliError> {
    let service = open_backup_service(data_dir)?;

    if list {
        let entries = service.list().await;
        if entries.is_empty() {
            println!("No backups");
            return Ok(());
        }
        let now = Utc::now().timestamp_millis();
        for entry in entries {
            let location = match (entry.local, entry.remote) {
                (true, true) => "local+remote",
                (true, false) => "local",
                _ => "remote",
            };
            println!(
                "{}  {:<12}  {:<12}  {:>4} item(s)  {}",
                entry.meta.id,
                format_relative_time(entry.meta.created_at, now),
                entry.meta.trigger.as_str(),
                entry.meta.item_count,
                location
            );
        }
        return Ok(());
    }

    if let Some(raw) = restore {
        let id = parse_snapshot_id(raw)?;
        let report = service.restore(id).await?;
        println!(
            "Restored {} item(s); previous state saved as {}",
            report.item_count, report.safety_snapshot
        );
        return Ok(());
    }

    if let Some(raw) = delete {
        let id = parse_snapshot_id(raw)?;
        if service.delete(id).await? {
            println!("{id}");
        } else {
            println!("No such backup: {id}");
        }
        return Ok(());
    }

    let meta = service.create(larder_core::models::BackupTrigger::Manual).await?;
    println!("{} ({} item(s))", meta.id, meta.item_count);
    Ok(())
}

fn run_export(
    format: ExportFormat,
    output_path: Option<&Path>,
    data_dir: &Path,
) -> Result<(), CliError> {
    let (_, _, inventory) = open_inventory(data_dir)?;
    let items = inventory.list(&ItemFilter::default());
    let core_format = larder_core::export::ExportFormat::from(format);
    let rendered = render_items_export(&items, core_format)?;

    if let Some(path) = output_path {
        let target = if path.is_dir() {
            path.join(suggested_export_file_name(
                core_format,
                Utc::now().timestamp_millis(),
            ))
        } else {
            path.to_path_buf()
        };
        std::fs::write(&target, rendered)?;
        println!("{}", target.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "larder", buffer);
}

fn run_config(data_dir: &Path) {
    let configured = remote_config_from_env();
    println!("data dir:     {}", data_dir.display());
    match &configured {
        Some(config) => {
            println!("endpoint:     {}", config.endpoint);
            println!("app id:       set");
            println!("api key:      set");
            println!(
                "master key:   {}",
                if config.master_key.is_some() { "set" } else { "not set" }
            );
        }
        None => println!("endpoint:     not set"),
    }
    println!("merge policy: {}", merge_policy_from_env().as_str());
    println!(
        "sync:         {}",
        if configured.is_some() { "configured" } else { "not configured" }
    );
}

fn apply_draft_args(draft: &mut ItemDraft, args: &DraftArgs) -> Result<(), CliError> {
    if let Some(category) = &args.category {
        draft.category = Some(category.clone());
    }
    if let Some(brand) = &args.brand {
        draft.brand = Some(brand.clone());
    }
    if let Some(location) = &args.location {
        draft.location = Some(location.clone());
    }
    if let Some(notes) = &args.notes {
        draft.notes = Some(notes.clone());
    }
    if let Some(quantity) = args.quantity {
        draft.quantity = quantity;
    }
    if let Some(expires) = &args.expires {
        draft.expiry_date = Some(parse_day(expires)?);
    }
    if let Some(produced) = &args.produced {
        draft.production_date = Some(parse_day(produced)?);
    }
    if !args.tags.is_empty() {
        draft.medicine_tags = args.tags.clone();
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ItemListRow {
    id: String,
    name: String,
    category: Option<String>,
    brand: Option<String>,
    location: Option<String>,
    quantity: u32,
    expiry_date: Option<String>,
    medicine_tags: Vec<String>,
    updated_at: i64,
    relative_time: String,
}

fn item_to_list_row(item: &Item) -> ItemListRow {
    let now = Utc::now().timestamp_millis();
    ItemListRow {
        id: item.id.as_str().to_string(),
        name: item.name.clone(),
        category: item.category.clone(),
        brand: item.brand.clone(),
        location: item.location.clone(),
        quantity: item.quantity,
        expiry_date: item.expiry_date.map(format_day),
        medicine_tags: item.medicine_tags.clone(),
        updated_at: item.updated_at,
        relative_time: format_relative_time(item.updated_at, now),
    }
}

fn format_item_lines(items: &[Item]) -> Vec<String> {
    let now = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let short_id = item.id.as_str().chars().take(10).collect::<String>();
            let name = clip(&item.name, 28);
            let location = item.location.as_deref().unwrap_or("-");
            let expiry = item
                .expiry_date
                .map(|at| format_expiry(at, now))
                .unwrap_or_default();

            format!(
                "{short_id:<10}  {name:<28}  x{quantity:<4}  {location:<12}  {expiry}",
                quantity = item.quantity
            )
        })
        .collect()
}

fn format_queue_lines(entries: &[MutationRecord]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let subject = entry
                .item
                .as_ref()
                .map_or_else(|| entry.item_id.to_string(), |item| item.name.clone());
            let mut line = format!(
                "#{seq:<5} {kind:<7} {subject:<28} attempts {attempts}",
                seq = entry.seq,
                kind = entry.kind.to_string(),
                subject = clip(&subject, 28),
                attempts = entry.attempts
            );
            if entry.next_attempt_at > 0 {
                line.push_str(&format!(", retry at {}", format_timestamp(entry.next_attempt_at)));
            }
            if let Some(error) = &entry.last_error {
                line.push_str(&format!(" ({error})"));
            }
            line
        })
        .collect()
}

fn clip(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut clipped = value.chars().take(take_len).collect::<String>();
        clipped.push_str("...");
        clipped
    }
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn format_expiry(expiry_ms: i64, now_ms: i64) -> String {
    let day = 86_400_000;
    let diff = expiry_ms - now_ms;
    if diff < 0 {
        let days = -diff / day;
        if days == 0 {
            "expired today".to_string()
        } else {
            format!("expired {days}d ago")
        }
    } else {
        let days = diff / day;
        if days == 0 {
            "expires today".to_string()
        } else if days <= 60 {
            format!("expires in {days}d")
        } else {
            format!("expires {}", format_day(expiry_ms))
        }
    }
}

fn format_day(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| timestamp_ms.to_string(), |dt| dt.format("%Y-%m-%d").to_string())
}

fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(
            || timestamp_ms.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
}

fn parse_day(value: &str) -> Result<i64, CliError> {
    let date = chrono::NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(value.to_string()))?;
    let Some(start_of_day) = date.and_hms_opt(0, 0, 0) else {
        return Err(CliError::InvalidDate(value.to_string()));
    };
    Ok(start_of_day.and_utc().timestamp_millis())
}

fn parse_snapshot_id(raw: &str) -> Result<SnapshotId, CliError> {
    raw.parse::<SnapshotId>()
        .map_err(|_| CliError::InvalidSnapshotId(raw.to_string()))
}

fn print_sync_outcome(outcome: &SyncOutcome, service: &SyncService) {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!(
                "Sync completed: {} replayed, {} fetched, {} conflict(s), {} pushed",
                report.drained, report.fetched, report.conflicts, report.pushed
            );
            if report.dead_lettered > 0 {
                println!(
                    "{} mutation(s) moved to dead letters; inspect with `larder queue --dead`",
                    report.dead_lettered
                );
            }
        }
        SyncOutcome::Offline => {
            let status = service.status();
            println!(
                "Remote unreachable; {} change(s) still queued",
                status.pending_mutations
            );
        }
        SyncOutcome::SkippedInFlight => println!("A sync pass is already running"),
        SyncOutcome::Failed(message) => println!("Sync failed: {message}"),
    }
}

fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("LARDER_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("larder")
}

fn remote_config_from_env() -> Option<RemoteConfig> {
    let endpoint = env::var("LARDER_ENDPOINT").ok()?;
    let app_id = env::var("LARDER_APP_ID").ok()?;
    let api_key = env::var("LARDER_API_KEY").ok()?;

    if endpoint.is_empty() || app_id.is_empty() || api_key.is_empty() {
        return None;
    }

    let master_key = env::var("LARDER_MASTER_KEY").ok().filter(|key| !key.is_empty());
    Some(RemoteConfig {
        endpoint,
        app_id,
        api_key,
        master_key,
    })
}

fn merge_policy_from_env() -> MergePolicy {
    match env::var("LARDER_MERGE_POLICY") {
        Ok(raw) => match raw.parse::<MergePolicy>() {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!("Ignoring LARDER_MERGE_POLICY: {}", e);
                MergePolicy::default()
            }
        },
        Err(_) => MergePolicy::default(),
    }
}

fn open_store(data_dir: &Path) -> Result<Arc<LocalStore>, CliError> {
    Ok(Arc::new(LocalStore::open(data_dir)?))
}

fn open_inventory(
    data_dir: &Path,
) -> Result<(Arc<LocalStore>, Arc<MutationQueue>, Inventory), CliError> {
    let store = open_store(data_dir)?;
    let queue = Arc::new(MutationQueue::load(Arc::clone(&store)));
    let inventory = Inventory::new(Arc::clone(&store), Arc::clone(&queue));
    Ok((store, queue, inventory))
}

fn open_backup_service(data_dir: &Path) -> Result<BackupService, CliError> {
    let store = open_store(data_dir)?;
    let mut service = BackupService::new(store, BackupOptions::default());
    if let Some(config) = remote_config_from_env() {
        let remote = Arc::new(HttpRemote::new(config)?);
        service = service.with_remote(remote as Arc<dyn RemoteBackups>);
    }
    Ok(service)
}

fn open_sync_service(data_dir: &Path, interval: Duration) -> Result<Arc<SyncService>, CliError> {
    let config = remote_config_from_env().ok_or(CliError::SyncNotConfigured)?;
    let (store, queue, _) = open_inventory(data_dir)?;
    let remote = Arc::new(HttpRemote::new(config)?);
    let backups = Arc::new(
        BackupService::new(Arc::clone(&store), BackupOptions::default())
            .with_remote(Arc::clone(&remote) as Arc<dyn RemoteBackups>),
    );
    let service = SyncService::new(
        store,
        queue,
        remote as Arc<dyn RemoteItems>,
        Reconciler::new(merge_policy_from_env()),
        SyncOptions { interval },
    )
    .with_backups(backups);
    Ok(Arc::new(service))
}
