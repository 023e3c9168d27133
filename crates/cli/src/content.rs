//! Content editing and version history subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::warn;

use contentsync_core::document::{encode, Node};
use contentsync_core::ids::{ContentUnit, SnapshotId};
use contentsync_core::live::{EditDebouncer, LiveDocumentSource};
use contentsync_core::models::ContentMetadata;
use contentsync_core::transform::{ContentPieceContext, OutputContent, Transformer};
use contentsync_core::{ChangeTracker, VersionHistory};

use crate::style;
use crate::Context;

#[derive(Subcommand, Debug)]
pub enum ContentAction {
    /// List content pieces of the workspace.
    List,
    /// Create a content piece, optionally from a Markdown file.
    New {
        /// Content group name (created when missing).
        #[arg(long)]
        group: String,
        /// Title; overrides the file's frontmatter title.
        #[arg(long)]
        title: Option<String>,
        /// Markdown file with the initial body.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Repository filename, derived from the title when omitted.
        #[arg(long)]
        filename: Option<String>,
    },
    /// Replace the body of a unit with a Markdown file.
    Edit {
        /// Unit as `<piece>` or `<piece>:<variant>`.
        unit: ContentUnit,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a unit as Markdown.
    Show { unit: ContentUnit },
    /// Delete a unit (a base unit removes the whole piece).
    Delete { unit: ContentUnit },
    /// Create a variant usable by every piece.
    AddVariant { key: String },
    /// Watch a Markdown file and store it as the live document of a unit.
    Watch {
        unit: ContentUnit,
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// List snapshots of a unit.
    List { unit: ContentUnit },
    /// Snapshot the current body of a unit.
    Snapshot {
        unit: ContentUnit,
        #[arg(long)]
        label: Option<String>,
    },
    /// Diff a snapshot against another, the previous one, or the live body.
    Diff {
        from: SnapshotId,
        to: Option<SnapshotId>,
        #[arg(long, conflicts_with = "to")]
        live: bool,
    },
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

pub async fn run_content(ctx: &Context, action: ContentAction) -> Result<()> {
    let ws = ctx.config.workspace.id;
    let transformer = Transformer::from(ctx.config.sync.transformer);

    match action {
        ContentAction::List => {
            let pieces = ctx
                .db
                .list_content_pieces(ws)
                .context("failed to list content")?;
            if pieces.is_empty() {
                println!("No content pieces found.");
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Title", "Filename", "Updated"]);
            for piece in &pieces {
                table.add_row(vec![
                    Cell::new(piece.id),
                    Cell::new(&piece.metadata.title),
                    Cell::new(piece.filename.as_deref().unwrap_or("-")),
                    Cell::new(piece.updated_at.format("%Y-%m-%d %H:%M")),
                ]);
            }
            println!("{table}");
            Ok(())
        }

        ContentAction::New {
            group,
            title,
            file,
            filename,
        } => {
            let (buffer, mut metadata) = match file {
                Some(path) => {
                    let input = transformer.parse(&read_text(&path)?)?;
                    (input.buffer, input.metadata)
                }
                None => (encode(&Node::doc(Vec::new())), ContentMetadata::default()),
            };
            if let Some(title) = title {
                metadata.title = title;
            }
            if metadata.title.trim().is_empty() {
                anyhow::bail!("a title is required (--title or frontmatter)");
            }
            let group = ctx
                .db
                .get_or_create_content_group(ws, &group)
                .context("failed to resolve content group")?;
            let piece = ctx
                .db
                .create_content_piece(ws, group.id, metadata, filename, &buffer)
                .context("failed to create content piece")?;
            println!("{}", style::success(&format!("Created {}", piece.id)));
            Ok(())
        }

        ContentAction::Edit { unit, file } => {
            if ctx.db.get_content_piece(unit.piece)?.is_none() {
                anyhow::bail!("content piece {} not found", unit.piece);
            }
            let input = transformer.parse(&read_text(&file)?)?;
            ctx.db.set_content_buffer(&unit, &input.buffer)?;
            if unit.variant.is_none() {
                ctx.db.update_content_metadata(unit.piece, &input.metadata)?;
            }
            if ctx.db.has_git_sync_config(ws)? {
                ChangeTracker::new(ctx.db.clone()).record_local_change(
                    ws,
                    &unit,
                    &input.content_hash,
                )?;
            }
            println!("{}", style::success(&format!("Updated {unit}")));
            Ok(())
        }

        ContentAction::Show { unit } => {
            let piece = ctx
                .db
                .get_content_piece(unit.piece)?
                .ok_or_else(|| anyhow::anyhow!("content piece {} not found", unit.piece))?;
            let buffer = ctx
                .db
                .get_content_buffer(&unit)?
                .ok_or_else(|| anyhow::anyhow!("unit {unit} has no body"))?;
            let variant_key = match unit.variant {
                Some(id) => ctx.db.get_variant(id)?.map(|v| v.key),
                None => None,
            };
            let text = transformer.render(&OutputContent {
                buffer,
                context: ContentPieceContext {
                    metadata: piece.metadata,
                    variant_key,
                },
            })?;
            print!("{text}");
            Ok(())
        }

        ContentAction::Delete { unit } => {
            let affected: Vec<ContentUnit> = ctx
                .db
                .list_content_units(ws)?
                .into_iter()
                .filter(|u| *u == unit || (unit.variant.is_none() && u.piece == unit.piece))
                .collect();
            if affected.is_empty() {
                anyhow::bail!("unit {unit} not found");
            }
            ctx.db.delete_content_unit(&unit)?;
            if ctx.db.has_git_sync_config(ws)? {
                let tracker = ChangeTracker::new(ctx.db.clone());
                for removed in &affected {
                    tracker.record_deletion(ws, removed)?;
                }
            }
            println!(
                "{}",
                style::success(&format!("Deleted {} unit(s)", affected.len()))
            );
            Ok(())
        }

        ContentAction::AddVariant { key } => {
            let key = key.trim();
            if key.is_empty() || key.contains('/') || key.contains('.') {
                anyhow::bail!("variant key must be a single path segment without dots");
            }
            if ctx.db.list_variants(ws)?.iter().any(|v| v.key == key) {
                anyhow::bail!("variant '{key}' already exists");
            }
            let variant = ctx.db.create_variant(ws, key)?;
            println!(
                "{}",
                style::success(&format!("Created variant {} ({})", variant.key, variant.id))
            );
            Ok(())
        }

        ContentAction::Watch { unit, file } => watch(ctx, unit, file, transformer).await,
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

/// Reads the live document of a unit from a Markdown file.
struct FileDocumentSource {
    path: PathBuf,
    transformer: Transformer,
}

#[async_trait]
impl LiveDocumentSource for FileDocumentSource {
    async fn current_document(&self, unit: &ContentUnit) -> Option<Vec<u8>> {
        let text = tokio::fs::read_to_string(&self.path).await.ok()?;
        match self.transformer.parse(&text) {
            Ok(input) => Some(input.buffer),
            Err(e) => {
                warn!(%unit, error = %e, "file does not parse, keeping previous body");
                None
            }
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.and_then(|m| m.modified()).ok()
}

async fn watch(ctx: &Context, unit: ContentUnit, file: PathBuf, transformer: Transformer) -> Result<()> {
    let ws = ctx.config.workspace.id;
    if ctx.db.get_content_piece(unit.piece)?.is_none() {
        anyhow::bail!("content piece {} not found", unit.piece);
    }

    let source = Arc::new(FileDocumentSource {
        path: file.clone(),
        transformer,
    });
    let debouncer = EditDebouncer::new(
        ctx.db.clone(),
        ChangeTracker::new(ctx.db.clone()),
        source,
        ctx.config.sync.debounce(),
    );

    println!(
        "Watching {} for {unit} (debounce {} ms). Press Ctrl-C to stop.",
        file.display(),
        ctx.config.sync.debounce_ms
    );

    let mut last = modified(&file).await;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = modified(&file).await;
                if now != last {
                    last = now;
                    debouncer.notify(ws, unit.clone());
                    println!("{}", style::dim("change detected"));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let flushed = debouncer.flush_all().await?;
                println!();
                println!("{}", style::success(&format!("Stopped, {flushed} pending write(s) flushed")));
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub fn run_history(ctx: &Context, action: HistoryAction) -> Result<()> {
    let history = VersionHistory::new(ctx.db.clone());

    match action {
        HistoryAction::List { unit } => {
            let snapshots = history.list(&unit)?;
            if snapshots.is_empty() {
                println!("No snapshots for {unit}.");
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Label", "Hash", "Created"]);
            for s in &snapshots {
                table.add_row(vec![
                    Cell::new(s.id),
                    Cell::new(s.label.as_deref().unwrap_or("-")),
                    Cell::new(style::short_sha(&s.content_hash)),
                    Cell::new(s.created_at.format("%Y-%m-%d %H:%M:%S")),
                ]);
            }
            println!("{table}");
            Ok(())
        }

        HistoryAction::Snapshot { unit, label } => {
            let snapshot = history.snapshot(ctx.config.workspace.id, &unit, label.as_deref())?;
            println!("{}", style::success(&format!("Snapshot {}", snapshot.id)));
            Ok(())
        }

        HistoryAction::Diff { from, to, live } => {
            let diff = match (to, live) {
                (Some(to), _) => history.diff_versions(from, to)?,
                (None, true) => history.diff_with_live(from)?,
                (None, false) => history.diff_with_previous(from)?,
            };
            style::print_diff(&diff);
            Ok(())
        }
    }
}
