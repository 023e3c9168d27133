//! End-to-end tests for the content <-> Git synchronization flow.
//!
//! These tests exercise the real `GitSync`, `ChangeTracker`, `EditDebouncer`
//! and `VersionHistory` with:
//! - Real SQLite databases in a temporary directory
//! - The real Markdown transformers
//! - An in-memory repository implementing `GitProvider`
//!
//! No network I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use contentsync_core::conflict::Resolution;
use contentsync_core::db::Database;
use contentsync_core::document::{content_hash, decode, encode, Mark, Node, NodeKind};
use contentsync_core::errors::{GitHubError, SyncError};
use contentsync_core::git::{CommitRequest, CommitResult, GitProvider, RemoteFile, RemoteHead};
use contentsync_core::git_sync::{CommitOutcome, GitSync, PullOutcome};
use contentsync_core::history::{changed_nodes, diff, DiffTag, VersionHistory};
use contentsync_core::ids::{ContentGroupId, ContentUnit, WorkspaceId};
use contentsync_core::live::{EditDebouncer, MemoryDocumentSource};
use contentsync_core::models::{
    ContentMetadata, Directory, ProviderConfig, ProviderKind, SyncRecord, TransformerKind,
};
use contentsync_core::transform::{
    canonical_hash, ContentPieceContext, InputContentProcessor, OutputContent,
    OutputContentProcessor, Transformer,
};

// ===========================================================================
// Helpers
// ===========================================================================

#[derive(Default)]
struct RepoState {
    revision: u32,
    files: BTreeMap<String, String>,
    commits: Vec<CommitRequest>,
}

/// A single-branch repository held in memory.
#[derive(Default)]
struct MemoryRepository {
    state: Mutex<RepoState>,
}

impl MemoryRepository {
    fn head_id(state: &RepoState) -> String {
        format!("{:040x}", state.revision)
    }

    /// Simulate a push by someone else.
    fn external_commit(&self, files: &[(&str, Option<&str>)]) {
        let mut state = self.state.lock().unwrap();
        for (path, text) in files {
            match text {
                Some(text) => state.files.insert((*path).to_string(), (*text).to_string()),
                None => state.files.remove(*path),
            };
        }
        state.revision += 1;
    }

    fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits.len()
    }
}

#[async_trait]
impl GitProvider for MemoryRepository {
    async fn head(&self) -> Result<RemoteHead, GitHubError> {
        let state = self.state.lock().unwrap();
        Ok(RemoteHead {
            commit_id: Self::head_id(&state),
            commit_date: Utc::now(),
        })
    }

    async fn fetch_files(
        &self,
        _commit_id: &str,
        directory: &str,
    ) -> Result<Vec<RemoteFile>, GitHubError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .iter()
            .filter(|(path, _)| directory.is_empty() || path.starts_with(directory))
            .map(|(path, text)| RemoteFile {
                path: path.clone(),
                text: text.clone(),
            })
            .collect())
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitResult, GitHubError> {
        let mut state = self.state.lock().unwrap();
        let head = Self::head_id(&state);
        if request.expected_head.as_deref() != Some(head.as_str()) {
            return Ok(CommitResult::Stale { remote_head: head });
        }
        for addition in &request.additions {
            state
                .files
                .insert(addition.path.clone(), addition.text.clone());
        }
        for path in &request.deletions {
            state.files.remove(path);
        }
        state.commits.push(request.clone());
        state.revision += 1;
        Ok(CommitResult::Committed {
            commit_id: Self::head_id(&state),
            commit_date: Utc::now(),
        })
    }
}

struct Env {
    _dir: TempDir,
    db: Arc<Database>,
    sync: GitSync,
    repo: MemoryRepository,
    ws: WorkspaceId,
    docs: ContentGroupId,
    guides: ContentGroupId,
}

fn setup_db(dir: &TempDir) -> Arc<Database> {
    let db = Database::new(dir.path().join("contentsync.db")).unwrap();
    db.initialize().unwrap();
    Arc::new(db)
}

fn provider_config(transformer: TransformerKind) -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::GitHub,
        repository: "acme/handbook".into(),
        branch: "main".into(),
        base_directory: String::new(),
        transformer,
        variant_subdirectories: true,
    }
}

async fn setup() -> Env {
    let dir = TempDir::new().unwrap();
    let db = setup_db(&dir);
    let ws = WorkspaceId::new();
    let docs = db.create_content_group(ws, "Docs").unwrap().id;
    let guides = db.create_content_group(ws, "Guides").unwrap().id;
    let sync = GitSync::new(db.clone());
    let repo = MemoryRepository::default();
    sync.configure(
        ws,
        provider_config(TransformerKind::Markdown),
        vec![
            Directory {
                path: "/docs".into(),
                content_group_id: docs,
            },
            Directory {
                path: "/guides".into(),
                content_group_id: guides,
            },
        ],
        &repo,
    )
    .await
    .unwrap();
    Env {
        _dir: dir,
        db,
        sync,
        repo,
        ws,
        docs,
        guides,
    }
}

fn paragraphs(texts: &[&str]) -> Node {
    Node::doc(
        texts
            .iter()
            .map(|t| Node::paragraph(vec![Node::text(*t)]))
            .collect(),
    )
}

fn titled(title: &str) -> ContentMetadata {
    ContentMetadata {
        title: title.into(),
        ..ContentMetadata::default()
    }
}

fn synced_hashes(records: &[SyncRecord]) -> Vec<(String, String)> {
    records
        .iter()
        .map(|r| (r.path.clone(), r.synced_hash.clone()))
        .collect()
}

// ===========================================================================
// Outbound
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_live_edit_is_tracked_and_committed() {
    let env = setup().await;
    let v1 = paragraphs(&["Welcome to the handbook."]);
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Welcome"), None, &encode(&v1))
        .unwrap();
    let unit = ContentUnit::piece(piece.id);

    let first = env.sync.commit(env.ws, "Add welcome", &env.repo).await.unwrap();
    assert!(matches!(first, CommitOutcome::Committed { additions: 1, .. }));
    let h1 = env.db.get_sync_record(env.ws, &unit).unwrap().unwrap().synced_hash;
    assert_eq!(h1, content_hash(&v1));

    let source = Arc::new(MemoryDocumentSource::new());
    let debouncer = EditDebouncer::new(
        env.db.clone(),
        env.sync.tracker().clone(),
        source.clone(),
        Duration::from_secs(2),
    );
    let v2 = paragraphs(&["Welcome to the handbook.", "Start with the guides."]);
    source.set(&unit, encode(&v2));
    debouncer.notify(env.ws, unit.clone());
    tokio::time::sleep(Duration::from_secs(3)).await;

    let divergent = env.sync.tracker().divergent_units(env.ws).unwrap();
    assert_eq!(divergent.len(), 1);
    assert_eq!(divergent[0].unit, unit);
    assert_eq!(divergent[0].synced_hash, h1);
    let h2 = divergent[0].current_hash.clone();
    assert_eq!(h2, content_hash(&v2));

    let second = env.sync.commit(env.ws, "Edit welcome", &env.repo).await.unwrap();
    assert!(matches!(second, CommitOutcome::Committed { .. }));
    let record = env.db.get_sync_record(env.ws, &unit).unwrap().unwrap();
    assert_eq!(record.synced_hash, h2);
    assert!(env.sync.tracker().divergent_units(env.ws).unwrap().is_empty());

    let text = env.repo.file("docs/welcome.md").unwrap();
    assert!(text.starts_with("---\ntitle: Welcome\n---\n"), "{text}");
    assert!(text.contains("Start with the guides."));

    let history = VersionHistory::new(env.db.clone());
    let versions = history.list(&unit).unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[1].label.as_deref().unwrap().starts_with("commit "));
}

#[tokio::test]
async fn test_stale_commit_leaves_records_untouched() {
    let env = setup().await;
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Intro"), None, &encode(&paragraphs(&["a"])))
        .unwrap();
    let unit = ContentUnit::piece(piece.id);
    env.sync.commit(env.ws, "Add intro", &env.repo).await.unwrap();

    let edited = paragraphs(&["b"]);
    env.db.set_content_buffer(&unit, &encode(&edited)).unwrap();
    env.sync
        .tracker()
        .record_local_change(env.ws, &unit, &content_hash(&edited))
        .unwrap();
    env.db
        .create_content_piece(env.ws, env.guides, titled("Setup"), None, &encode(&paragraphs(&["c"])))
        .unwrap();

    let before = env.sync.get_records(env.ws).unwrap();
    let last_commit = env.sync.configuration(env.ws).unwrap().unwrap().last_commit_id;
    env.repo
        .external_commit(&[("README.md", Some("# Handbook\n"))]);

    let outcome = env.sync.commit(env.ws, "Edit", &env.repo).await.unwrap();
    let CommitOutcome::Stale {
        expected,
        remote_head,
    } = outcome
    else {
        panic!("expected a stale commit, got {outcome:?}");
    };
    assert_eq!(expected, last_commit);
    assert_ne!(Some(remote_head), last_commit);

    let after = env.sync.get_records(env.ws).unwrap();
    assert_eq!(synced_hashes(&before), synced_hashes(&after));
    assert_eq!(
        env.sync.configuration(env.ws).unwrap().unwrap().last_commit_id,
        last_commit
    );
    assert_eq!(env.repo.commit_count(), 1);
    assert!(env.repo.file("guides/setup.md").is_none());
}

#[tokio::test]
async fn test_variants_are_committed_to_subdirectories() {
    let env = setup().await;
    let de = env.db.create_variant(env.ws, "de").unwrap();
    let piece = env
        .db
        .create_content_piece(
            env.ws,
            env.guides,
            titled("Install"),
            None,
            &encode(&paragraphs(&["Run the installer."])),
        )
        .unwrap();
    let variant = ContentUnit::new(piece.id, Some(de.id));
    env.db
        .set_content_buffer(&variant, &encode(&paragraphs(&["Installer starten."])))
        .unwrap();

    let outcome = env.sync.commit(env.ws, "Add install", &env.repo).await.unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed { additions: 2, .. }));
    assert!(env.repo.file("guides/install.md").is_some());
    assert!(env
        .repo
        .file("guides/de/install.md")
        .unwrap()
        .contains("Installer starten."));
}

// ===========================================================================
// Inbound
// ===========================================================================

#[tokio::test]
async fn test_external_file_is_created_in_mapped_group() {
    let env = setup().await;
    env.repo.external_commit(&[
        ("guides/intro.md", Some("---\ntitle: Intro\n---\nHello from Git.\n")),
        ("guides/de/intro.md", Some("---\ntitle: Intro\n---\nHallo aus Git.\n")),
    ]);
    env.db.create_variant(env.ws, "de").unwrap();

    let outcome = env.sync.pull(env.ws, &env.repo).await.unwrap();
    let PullOutcome::Applied(summary) = outcome else {
        panic!("expected an applied pull");
    };
    assert_eq!(summary.created, 2);

    let pieces = env.db.list_content_pieces(env.ws).unwrap();
    assert_eq!(pieces.len(), 1);
    assert_eq!(pieces[0].content_group_id, env.guides);
    assert_eq!(pieces[0].metadata.title, "Intro");

    let units = env.db.list_content_units(env.ws).unwrap();
    assert_eq!(units.len(), 2);
    let records = env.sync.get_records(env.ws).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.is_divergent()));

    // Nothing to push back.
    assert_eq!(
        env.sync.commit(env.ws, "noop", &env.repo).await.unwrap(),
        CommitOutcome::NothingToCommit
    );
}

#[tokio::test]
async fn test_external_edit_and_case_only_rename_apply() {
    let env = setup().await;
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Faq"), None, &encode(&paragraphs(&["Old answer."])))
        .unwrap();
    let unit = ContentUnit::piece(piece.id);
    env.sync.commit(env.ws, "Add faq", &env.repo).await.unwrap();

    env.repo.external_commit(&[
        ("docs/faq.md", None),
        ("docs/FAQ.md", Some("---\ntitle: FAQ\n---\nNew answer.\n")),
    ]);
    let PullOutcome::Applied(summary) = env.sync.pull(env.ws, &env.repo).await.unwrap() else {
        panic!("expected an applied pull");
    };
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.created, 0);

    let record = env.db.get_sync_record(env.ws, &unit).unwrap().unwrap();
    assert_eq!(record.path, "docs/FAQ.md");
    assert!(!record.is_divergent());
    let doc = decode(&env.db.get_content_buffer(&unit).unwrap().unwrap()).unwrap();
    assert_eq!(doc.text_content(), "New answer.");
    assert_eq!(
        env.db.get_content_piece(piece.id).unwrap().unwrap().metadata.title,
        "FAQ"
    );
}

#[tokio::test]
async fn test_conflicting_pull_then_accept_incoming() {
    let env = setup().await;
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Notes"), None, &encode(&paragraphs(&["Shared."])))
        .unwrap();
    let unit = ContentUnit::piece(piece.id);
    env.sync.commit(env.ws, "Add notes", &env.repo).await.unwrap();

    let local = paragraphs(&["Shared.", "Drafted locally."]);
    env.db.set_content_buffer(&unit, &encode(&local)).unwrap();
    env.sync
        .tracker()
        .record_local_change(env.ws, &unit, &content_hash(&local))
        .unwrap();
    env.repo.external_commit(&[(
        "docs/notes.md",
        Some("---\ntitle: Notes\n---\nShared.\n\nPushed upstream.\n"),
    )]);

    let PullOutcome::Conflicts(reports) = env.sync.pull(env.ws, &env.repo).await.unwrap() else {
        panic!("expected conflicts");
    };
    assert_eq!(reports.len(), 1);
    let changes = changed_nodes(&reports[0].diff);
    assert!(changes.contains(&(DiffTag::Removed, NodeKind::Paragraph, "Drafted locally.".into())));
    assert!(changes.contains(&(DiffTag::Added, NodeKind::Paragraph, "Pushed upstream.".into())));

    // A resolution made against an outdated synced hash is refused.
    let stale = env
        .sync
        .resolve_conflict(env.ws, &unit, "x\n", "not-the-synced-hash", "docs/notes.md")
        .await
        .unwrap_err();
    assert!(matches!(stale, SyncError::Conflict { .. }));

    env.sync
        .resolve_pending(env.ws, reports[0].conflict.id, Resolution::AcceptIncoming)
        .await
        .unwrap();
    let doc = decode(&env.db.get_content_buffer(&unit).unwrap().unwrap()).unwrap();
    assert_eq!(doc.content.len(), 2);
    assert_eq!(doc.content[1].text_content(), "Pushed upstream.");
    assert!(env.sync.pending_conflicts(env.ws).unwrap().is_empty());
    assert!(env.sync.tracker().divergent_units(env.ws).unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_deletion_of_clean_unit() {
    let env = setup().await;
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Old"), None, &encode(&paragraphs(&["x"])))
        .unwrap();
    env.sync.commit(env.ws, "Add old", &env.repo).await.unwrap();
    env.repo.external_commit(&[("docs/old.md", None)]);

    let PullOutcome::Applied(summary) = env.sync.pull(env.ws, &env.repo).await.unwrap() else {
        panic!("expected an applied pull");
    };
    assert_eq!(summary.deleted, 1);
    assert!(env.db.get_content_piece(piece.id).unwrap().is_none());
    assert!(env.sync.get_records(env.ws).unwrap().is_empty());
}

// ===========================================================================
// Transformers and history
// ===========================================================================

#[tokio::test]
async fn test_transformer_idempotence_and_round_trip() {
    let text = "---\ntitle: Release notes\ndescription: What changed\nslug: release-notes\ntags:\n  - sync\nauthors:\n  - ada\ncanonicalLink: https://example.com/notes\n---\n# Release *notes*\n\nSee [the docs](https://example.com/docs) for `details`.\n\n- first\n- second\n";
    for kind in [TransformerKind::Markdown, TransformerKind::Docusaurus] {
        let transformer = Transformer::from(kind);
        let a = InputContentProcessor::process(&transformer, text).await.unwrap();
        let b = InputContentProcessor::process(&transformer, text).await.unwrap();
        assert_eq!(a.content_hash, b.content_hash);

        let rendered = OutputContentProcessor::process(
            &transformer,
            &OutputContent {
                buffer: a.buffer.clone(),
                context: ContentPieceContext {
                    metadata: a.metadata.clone(),
                    variant_key: None,
                },
            },
        )
        .await
        .unwrap();
        let again = InputContentProcessor::process(&transformer, &rendered).await.unwrap();
        assert_eq!(again.content_hash, a.content_hash, "{kind}:\n{rendered}");
        assert_eq!(again.metadata, a.metadata, "{kind}:\n{rendered}");
    }
}

#[tokio::test]
async fn test_internal_tree_survives_output_then_input() {
    let tree = Node::doc(vec![
        Node::heading(2, vec![Node::text("Overview")]),
        Node::paragraph(vec![
            Node::text("Mixed "),
            Node::marked_text("bold", vec![Mark::Bold]),
            Node::text(" and "),
            Node::marked_text(
                "linked",
                vec![Mark::Link {
                    href: "https://example.com".into(),
                }],
            ),
            Node::text("."),
        ]),
        Node::blockquote(vec![Node::paragraph(vec![Node::text("Quoted.")])]),
        Node::code_block(Some("toml"), "key = \"value\""),
    ]);
    let transformer = Transformer::from(TransformerKind::Markdown);
    let text = transformer
        .render(&OutputContent {
            buffer: encode(&tree),
            context: ContentPieceContext {
                metadata: titled("Overview"),
                variant_key: None,
            },
        })
        .unwrap();
    let parsed = transformer.parse(&text).unwrap();
    assert_eq!(parsed.content_hash, canonical_hash(&encode(&tree)).unwrap(), "{text}");
    assert_eq!(parsed.metadata.title, "Overview");
}

#[tokio::test]
async fn test_committed_emphasis_reads_back_unchanged() {
    let env = setup().await;
    let tree = Node::doc(vec![
        Node::paragraph(vec![
            Node::marked_text("Note.", vec![Mark::Bold]),
            Node::text("Read this"),
        ]),
        Node::paragraph(vec![Node::text("    Indented\n- not a list")]),
    ]);
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Notice"), None, &encode(&tree))
        .unwrap();
    let unit = ContentUnit::piece(piece.id);
    env.sync.commit(env.ws, "Add notice", &env.repo).await.unwrap();

    let record = env.db.get_sync_record(env.ws, &unit).unwrap().unwrap();
    let text = env.repo.file(&record.path).unwrap();
    let parsed = Transformer::from(TransformerKind::Markdown).parse(&text).unwrap();
    assert_eq!(parsed.content_hash, record.synced_hash, "{text}");

    env.repo
        .external_commit(&[("docs/other.md", Some("---\ntitle: Other\n---\nOther.\n"))]);
    let PullOutcome::Applied(summary) = env.sync.pull(env.ws, &env.repo).await.unwrap() else {
        panic!("expected an applied pull");
    };
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.created, 1);
    let doc = decode(&env.db.get_content_buffer(&unit).unwrap().unwrap()).unwrap();
    assert_eq!(doc.content[0].content[0].marks, vec![Mark::Bold]);
    assert!(!env.db.get_sync_record(env.ws, &unit).unwrap().unwrap().is_divergent());
}

#[test]
fn test_inserted_paragraph_is_the_only_change() {
    let n = paragraphs(&["The first paragraph stays.", "The last paragraph stays."]);
    let n1 = paragraphs(&[
        "The first paragraph stays.",
        "A brand new paragraph.",
        "The last paragraph stays.",
    ]);
    let d = diff(&n, &n1);
    assert_eq!(d.content.len(), 3);
    assert_eq!(d.content[0].diff, None);
    assert_eq!(d.content[1].diff, Some(DiffTag::Added));
    assert_eq!(d.content[2].diff, None);
    assert_eq!(
        changed_nodes(&d),
        vec![(DiffTag::Added, NodeKind::Paragraph, "A brand new paragraph.".to_string())]
    );
}

#[test]
fn test_diff_is_symmetric() {
    let a = Node::doc(vec![
        Node::heading(1, vec![Node::text("Title")]),
        Node::paragraph(vec![Node::text("kept as is")]),
        Node::paragraph(vec![Node::text("only on the left side")]),
        Node::bullet_list(vec![Node::list_item(vec![Node::paragraph(vec![Node::text(
            "item",
        )])])]),
    ]);
    let b = Node::doc(vec![
        Node::heading(2, vec![Node::text("Title")]),
        Node::paragraph(vec![Node::text("kept as is")]),
        Node::code_block(None, "right only"),
    ]);
    let forward = changed_nodes(&diff(&a, &b));
    let mut backward: Vec<_> = changed_nodes(&diff(&b, &a))
        .into_iter()
        .map(|(tag, kind, text)| (tag.inverse(), kind, text))
        .collect();
    let mut forward_sorted = forward.clone();
    forward_sorted.sort();
    backward.sort();
    assert_eq!(forward_sorted, backward);
    assert!(!forward.is_empty());
}

#[tokio::test]
async fn test_snapshots_follow_commits_and_pulls() {
    let env = setup().await;
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Log"), None, &encode(&paragraphs(&["one"])))
        .unwrap();
    let unit = ContentUnit::piece(piece.id);
    env.sync.commit(env.ws, "Add log", &env.repo).await.unwrap();
    env.repo
        .external_commit(&[("docs/log.md", Some("---\ntitle: Log\n---\none\n\ntwo\n"))]);
    env.sync.pull(env.ws, &env.repo).await.unwrap();

    let history = VersionHistory::new(env.db.clone());
    let versions = history.list(&unit).unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[1].label.as_deref().unwrap().starts_with("pull "));
    let d = history.diff_with_previous(versions[1].id).unwrap();
    assert_eq!(
        changed_nodes(&d),
        vec![(DiffTag::Added, NodeKind::Paragraph, "two".to_string())]
    );
}

#[tokio::test]
async fn test_reset_keeps_content() {
    let env = setup().await;
    let piece = env
        .db
        .create_content_piece(env.ws, env.docs, titled("Keep"), None, &encode(&paragraphs(&["x"])))
        .unwrap();
    env.sync.commit(env.ws, "Add", &env.repo).await.unwrap();
    env.sync.reset(env.ws).await.unwrap();

    assert!(env.sync.configuration(env.ws).unwrap().is_none());
    assert!(env.db.get_content_piece(piece.id).unwrap().is_some());
    assert!(matches!(
        env.sync.commit(env.ws, "again", &env.repo).await.unwrap_err(),
        SyncError::NotConfigured(_)
    ));

    // Reconfiguring starts from a clean slate.
    env.sync
        .configure(env.ws, provider_config(TransformerKind::Markdown), vec![], &env.repo)
        .await
        .unwrap();
    assert!(env.sync.get_records(env.ws).unwrap().is_empty());
}
