//! contentsync command-line management tool.
//!
//! Provides subcommands for configuring Git sync of a workspace, committing
//! and pulling content, resolving conflicts, editing content, browsing
//! version history, viewing the audit log, and generating / validating
//! configuration files.

mod content;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use contentsync_core::config::AppConfig;
use contentsync_core::conflict::Resolution;
use contentsync_core::db::Database;
use contentsync_core::git::GitHubClient;
use contentsync_core::git_sync::{CommitOutcome, GitSync, PullOutcome};
use contentsync_core::ids::{ConflictId, WorkspaceId};
use contentsync_core::models::{ConflictStatus, Directory, SyncState};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// contentsync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "contentsync",
    version,
    about = "Sync structured content with a Git repository"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./contentsync.toml")]
    config: PathBuf,

    /// Log at the level configured in `[logging]` instead of warnings only.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./contentsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Connect the workspace to the configured repository.
    Configure,

    /// Show current synchronization status.
    Status,

    /// List sync records, including pending additions and deletions.
    Records,

    /// Commit every pending change as one commit.
    Commit {
        /// Commit message.
        #[arg(short, long, default_value = "Update content")]
        message: String,
    },

    /// Bring repository changes into the workspace.
    Pull,

    /// Manage sync conflicts.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Remove the Git sync configuration (content is kept).
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Create, edit and delete content.
    Content {
        #[command(subcommand)]
        action: content::ContentAction,
    },

    /// Browse snapshots and diffs.
    History {
        #[command(subcommand)]
        action: content::HistoryAction,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// List pending conflicts.
    List {
        /// Include resolved conflicts.
        #[arg(long)]
        all: bool,
    },
    /// Show a conflict with its diff.
    Show {
        /// Conflict ID.
        id: ConflictId,
    },
    /// Resolve a conflict.
    Resolve {
        /// Conflict ID.
        id: ConflictId,

        /// Resolution: incoming or local.
        #[arg(long)]
        accept: Resolution,
    },
}

/// Loaded configuration and database shared by subcommands.
pub struct Context {
    pub config: AppConfig,
    pub db: Arc<Database>,
}

impl Context {
    fn workspace(&self) -> WorkspaceId {
        self.config.workspace.id
    }

    fn git_sync(&self) -> GitSync {
        GitSync::new(self.db.clone()).with_path_rules(self.config.sync.path_rules())
    }

    fn provider(&self) -> Result<GitHubClient> {
        let token = self
            .config
            .require_token()
            .context("a GitHub token is required for this command")?;
        let client = GitHubClient::new(
            &self.config.github.api_url,
            token,
            &self.config.github.repo,
            &self.config.github.branch,
        )
        .context("failed to create GitHub client")?;
        Ok(client.with_retry_policy(self.config.sync.retry_policy()))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        AppConfig::load_from_file(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    } else {
        "warn".to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            // All other commands need the config and database
            let ctx = load_context(&cli.config)?;

            match command {
                Commands::Configure => cmd_configure(&ctx).await,
                Commands::Status => cmd_status(&ctx),
                Commands::Records => cmd_records(&ctx),
                Commands::Commit { message } => cmd_commit(&ctx, &message).await,
                Commands::Pull => cmd_pull(&ctx).await,
                Commands::Conflicts { action } => cmd_conflicts(&ctx, action).await,
                Commands::Reset { yes } => cmd_reset(&ctx, yes).await,
                Commands::Content { action } => content::run_content(&ctx, action).await,
                Commands::History { action } => content::run_history(&ctx, action),
                Commands::Audit { limit } => cmd_audit(&ctx, limit),
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_context(path: &Path) -> Result<Context> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("invalid configuration")?;

    let db = Database::new(&config.database.path).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(Context {
        config,
        db: Arc::new(db),
    })
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::sample(WorkspaceId::new()))
        .context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your repository and directory mappings");
    println!("  2. Set the referenced environment variable (GITHUB_TOKEN)");
    println!(
        "  3. Validate with: contentsync validate --config {}",
        output.display()
    );
    println!(
        "  4. Connect the workspace: contentsync configure --config {}",
        output.display()
    );

    Ok(())
}

/// Status lines for the environment variable references of `config`.
/// Problems are warnings: local commands run without a token.
fn env_report(config: &mut AppConfig) -> Vec<String> {
    if let Err(e) = config.resolve_env_vars() {
        return vec![format!("  [WARN] Environment variable error: {e}")];
    }
    match config.require_token() {
        Ok(_) => vec!["  [OK] Environment variable references resolved".to_string()],
        Err(e) => vec![format!("  [WARN] {e} (commit and pull need it)")],
    }
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    for line in env_report(&mut config) {
        println!("{line}");
    }

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Workspace     : {}", config.workspace.id);
    println!("  Database      : {}", config.database.path.display());
    println!("  GitHub repo   : {}@{}", config.github.repo, config.github.branch);
    println!(
        "  GitHub token  : {}",
        if config.github.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!(
        "  Base directory: {}",
        if config.github.base_directory.is_empty() {
            "(repository root)"
        } else {
            &config.github.base_directory
        }
    );
    println!("  Transformer   : {}", config.sync.transformer);
    println!("  Debounce      : {} ms", config.sync.debounce_ms);
    for dir in &config.sync.directories {
        println!("  Directory     : {} -> {}", dir.path, dir.content_group);
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_configure(ctx: &Context) -> Result<()> {
    let ws = ctx.workspace();
    let mut directories = Vec::with_capacity(ctx.config.sync.directories.len());
    for dir in &ctx.config.sync.directories {
        let group = ctx
            .db
            .get_or_create_content_group(ws, &dir.content_group)
            .context("failed to resolve content group")?;
        directories.push(Directory {
            path: dir.path.clone(),
            content_group_id: group.id,
        });
    }

    let provider = ctx.provider()?;
    let config = ctx
        .git_sync()
        .configure(ws, ctx.config.provider_config(), directories, &provider)
        .await
        .context("failed to configure Git sync")?;

    println!(
        "{}",
        style::success(&format!(
            "Workspace {} synced with {}@{}",
            ws, config.provider.repository, config.provider.branch
        ))
    );
    if let Some(head) = &config.last_commit_id {
        println!("  Branch head: {}", style::short_sha(head));
    }
    println!("  Run `contentsync pull` to import existing files.");
    Ok(())
}

fn cmd_status(ctx: &Context) -> Result<()> {
    let status = ctx
        .git_sync()
        .status(ctx.workspace())
        .context("failed to read sync status")?;

    println!("{}", style::header("contentsync Status"));
    println!();
    let state = match status.state {
        SyncState::Unconfigured => style::warn("unconfigured"),
        other => other.to_string(),
    };
    println!("  Sync state        : {}", state);
    println!(
        "  Repository        : {}",
        status.repository.as_deref().unwrap_or("none")
    );
    println!(
        "  Last commit       : {}",
        status
            .last_commit_id
            .as_deref()
            .map(style::short_sha)
            .unwrap_or("none")
    );
    println!(
        "  Last commit date  : {}",
        status
            .last_commit_date
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Tracked units     : {}", status.tracked);
    println!("  Pending additions : {}", status.pending_additions);
    println!("  Pending updates   : {}", status.pending_updates);
    println!("  Pending deletions : {}", status.pending_deletions);
    println!("  Pending conflicts : {}", status.pending_conflicts);

    Ok(())
}

fn cmd_records(ctx: &Context) -> Result<()> {
    let records = ctx
        .git_sync()
        .get_records(ctx.workspace())
        .context("failed to list sync records")?;

    if records.is_empty() {
        println!("No sync records.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Unit", "State", "Synced"]);
    for r in &records {
        let state = if r.is_addition() {
            Cell::new("added").fg(Color::Green)
        } else if r.is_deletion() {
            Cell::new("deleted").fg(Color::Red)
        } else if r.is_divergent() {
            Cell::new("modified").fg(Color::Yellow)
        } else {
            Cell::new("clean")
        };
        table.add_row(vec![
            Cell::new(&r.path),
            Cell::new(&r.unit),
            state,
            Cell::new(style::short_sha(&r.synced_hash)),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn cmd_commit(ctx: &Context, message: &str) -> Result<()> {
    let provider = ctx.provider()?;
    let outcome = ctx
        .git_sync()
        .commit(ctx.workspace(), message, &provider)
        .await
        .context("commit failed")?;

    match outcome {
        CommitOutcome::NothingToCommit => {
            println!("{}", style::success("Nothing to commit"));
            Ok(())
        }
        CommitOutcome::Committed {
            commit_id,
            additions,
            deletions,
            ..
        } => {
            println!(
                "{}",
                style::success(&format!(
                    "Committed {}: {} written, {} removed",
                    style::short_sha(&commit_id),
                    additions,
                    deletions
                ))
            );
            Ok(())
        }
        CommitOutcome::Stale {
            expected,
            remote_head,
        } => {
            println!(
                "{}",
                style::warn(&format!(
                    "Branch moved: expected {}, found {}",
                    expected.as_deref().map(style::short_sha).unwrap_or("none"),
                    style::short_sha(&remote_head)
                ))
            );
            anyhow::bail!("commit is stale; run `contentsync pull` and retry")
        }
    }
}

async fn cmd_pull(ctx: &Context) -> Result<()> {
    let provider = ctx.provider()?;
    let outcome = ctx
        .git_sync()
        .pull(ctx.workspace(), &provider)
        .await
        .context("pull failed")?;

    match outcome {
        PullOutcome::UpToDate => {
            println!("{}", style::success("Already up to date"));
            Ok(())
        }
        PullOutcome::Applied(summary) => {
            println!(
                "{}",
                style::success(&format!("Pulled {}", style::short_sha(&summary.commit_id)))
            );
            println!("  Updated   : {}", summary.applied);
            println!("  Created   : {}", summary.created);
            println!("  Deleted   : {}", summary.deleted);
            println!("  Converged : {}", summary.converged);
            for path in &summary.skipped {
                println!("  {}", style::dim(&format!("skipped {path} (no directory mapping)")));
            }
            Ok(())
        }
        PullOutcome::Conflicts(reports) => {
            println!(
                "{}",
                style::warn(&format!("{} conflict(s), nothing applied", reports.len()))
            );
            for report in &reports {
                println!();
                println!(
                    "{} {} ({})",
                    style::header(&report.conflict.path),
                    style::dim(&report.conflict.id.to_string()),
                    report.conflict.kind
                );
                style::print_diff(&report.diff);
            }
            println!();
            println!("Resolve with: contentsync conflicts resolve <id> --accept incoming|local");
            anyhow::bail!("pull blocked by conflicts")
        }
    }
}

async fn cmd_conflicts(ctx: &Context, action: ConflictsAction) -> Result<()> {
    let ws = ctx.workspace();
    match action {
        ConflictsAction::List { all } => {
            let status = if all { None } else { Some(ConflictStatus::Pending) };
            let conflicts = ctx
                .db
                .list_conflicts(ws, status)
                .context("failed to list conflicts")?;

            if conflicts.is_empty() {
                println!("{}", style::success("No conflicts"));
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Path", "Kind", "Status", "Created"]);
            for c in &conflicts {
                table.add_row(vec![
                    Cell::new(c.id),
                    Cell::new(&c.path),
                    Cell::new(c.kind),
                    Cell::new(c.status),
                    Cell::new(c.created_at.format("%Y-%m-%d %H:%M")),
                ]);
            }
            println!("{table}");
            Ok(())
        }

        ConflictsAction::Show { id } => {
            let conflict = ctx
                .db
                .get_conflict(id)
                .context("database error")?
                .filter(|c| c.workspace_id == ws)
                .ok_or_else(|| anyhow::anyhow!("conflict '{}' not found", id))?;

            println!("{}", style::header(&format!("Conflict: {}", conflict.id)));
            println!();
            println!("  Path       : {}", conflict.path);
            println!("  Unit       : {}", conflict.unit);
            println!("  Kind       : {}", conflict.kind);
            println!("  Status     : {}", conflict.status);
            println!("  Created at : {}", conflict.created_at.to_rfc3339());
            println!();

            match &conflict.incoming_text {
                Some(text) => {
                    println!("Incoming ({} bytes):", text.len());
                    println!("{}", "-".repeat(40));
                    println!("{}", truncate(text, 1000));
                }
                None => println!("{}", style::dim("Deleted in the repository.")),
            }
            Ok(())
        }

        ConflictsAction::Resolve { id, accept } => {
            ctx.git_sync()
                .resolve_pending(ws, id, accept)
                .await
                .context("failed to resolve conflict")?;
            println!(
                "{}",
                style::success(&format!("Conflict {} resolved ({})", id, accept))
            );
            Ok(())
        }
    }
}

async fn cmd_reset(ctx: &Context, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("reset drops all sync records; pass --yes to confirm");
    }
    ctx.git_sync()
        .reset(ctx.workspace())
        .await
        .context("failed to reset Git sync")?;
    println!("{}", style::success("Git sync configuration removed"));
    Ok(())
}

fn cmd_audit(ctx: &Context, limit: u32) -> Result<()> {
    let entries = ctx
        .db
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Timestamp", "Action", "Result", "Details"]);
    for entry in &entries {
        let result = if entry.success {
            Cell::new("ok").fg(Color::Green)
        } else {
            Cell::new("failed").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&entry.action),
            result,
            Cell::new(truncate(&entry.details, 60)),
        ]);
    }
    println!("{table}");
    println!("{} entries shown", entries.len());

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
