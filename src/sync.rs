use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::InstapaperClient;
use crate::error::ApiError;
use crate::frontmatter::{PropertyConfig, apply_properties};
use crate::model::{Article, Highlight, HighlightsPage};
use crate::render::{already_present, render, render_legacy};
use crate::vault::{Vault, resolve_note};

/// Seam between the orchestrator and the remote client, so runs can be
/// driven by a scripted source in tests.
#[allow(async_fn_in_trait)]
pub trait HighlightsSource {
    async fn fetch_highlights_page(&self, after: i64) -> Result<HighlightsPage, ApiError>;
}

impl HighlightsSource for InstapaperClient {
    async fn fetch_highlights_page(&self, after: i64) -> Result<HighlightsPage, ApiError> {
        InstapaperClient::fetch_highlights_page(self, after).await
    }
}

/// Rewrites blocks previously appended under `from` (or the fixed legacy
/// format when `from` is absent) into the `to` template's rendering.
#[derive(Debug, Clone)]
pub struct TemplateMigration {
    pub from: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// When false, a missing folder or note is skipped instead of created.
    pub create_files: bool,
    /// When false, only metadata is refreshed; no content is appended.
    pub sync_highlights: bool,
    pub sync_properties: bool,
    /// Also strip previously-written properties now disabled in config.
    pub remove_disabled_properties: bool,
    pub update_highlight_template: Option<TemplateMigration>,
    /// Consecutive page-fetch failures tolerated before the run stops.
    pub max_consecutive_errors: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            create_files: true,
            sync_highlights: true,
            sync_properties: true,
            remove_disabled_properties: false,
            update_highlight_template: None,
            max_consecutive_errors: 3,
        }
    }
}

/// Best-effort result of a run. `cursor` is the id of the last highlight
/// fully processed; the caller persists it. `count` is the number of blocks
/// appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub cursor: i64,
    pub count: u32,
}

/// Drives incremental sync for one connected account. Highlights are
/// processed strictly sequentially: the cursor only moves past a highlight
/// once its side effects have been attempted, so a persisted cursor always
/// means "everything up to and including this id was handled".
pub struct Syncer<S, V> {
    source: S,
    vault: V,
    folder: PathBuf,
    template: String,
    properties: PropertyConfig,
    busy: AtomicBool,
}

impl<S: HighlightsSource, V: Vault> Syncer<S, V> {
    pub fn new(
        source: S,
        vault: V,
        folder: PathBuf,
        template: String,
        properties: PropertyConfig,
    ) -> Self {
        Syncer {
            source,
            vault,
            folder,
            template,
            properties,
            busy: AtomicBool::new(false),
        }
    }

    /// Runs one sync pass from `start_cursor`. A second call while a run is
    /// in flight is a no-op reporting zero progress; callers retry on their
    /// own schedule. Nothing raises past this boundary.
    pub async fn sync(&self, start_cursor: i64, options: &SyncOptions) -> SyncOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("sync already running, ignoring request");
            // Report zero progress without regressing the caller's
            // watermark; callers persist the returned cursor blindly.
            return SyncOutcome {
                cursor: start_cursor,
                count: 0,
            };
        }
        let outcome = self.run(start_cursor, options).await;
        self.busy.store(false, Ordering::Release);
        outcome
    }

    async fn run(&self, start_cursor: i64, options: &SyncOptions) -> SyncOutcome {
        let mut cursor = start_cursor;
        let mut count = 0u32;

        if !self.vault.exists(&self.folder).await {
            if !options.create_files {
                return SyncOutcome { cursor, count };
            }
            if let Err(e) = self.vault.create_folder(&self.folder).await {
                tracing::error!(error = %e, folder = %self.folder.display(), "failed to create notes folder");
                return SyncOutcome { cursor, count };
            }
            // A fresh folder has no prior history; the stored watermark is
            // stale by definition, so re-baseline from the beginning.
            tracing::info!(folder = %self.folder.display(), "created notes folder, resetting cursor");
            cursor = 0;
        }

        let mut consecutive_errors = 0u32;
        loop {
            let page = match self.source.fetch_highlights_page(cursor).await {
                Ok(page) => {
                    consecutive_errors = 0;
                    page
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = consecutive_errors,
                        "failed to fetch highlights page"
                    );
                    if consecutive_errors >= options.max_consecutive_errors {
                        tracing::error!(
                            "stopping sync after {} consecutive fetch failures",
                            consecutive_errors
                        );
                        break;
                    }
                    continue;
                }
            };

            if page.is_empty() {
                break;
            }

            for highlight in &page.highlights {
                // Advance before processing: a cursor persisted after any
                // point must cover this highlight even if a later one in the
                // same page fails.
                cursor = cursor.max(highlight.id);

                let Some(article) = page.articles_by_id.get(&highlight.article_id) else {
                    // Orphan: the remote omitted the owning bookmark from
                    // this payload. Tolerated, not an error.
                    continue;
                };

                if self.process_highlight(highlight, article, options).await {
                    count += 1;
                }
            }
        }

        tracing::info!(cursor, count, "sync run finished");
        SyncOutcome { cursor, count }
    }

    /// Handles one highlight against its note file. Returns true iff a new
    /// block was appended. Per-item failures are logged and skipped; they
    /// never abort the run and never count toward the fetch threshold.
    async fn process_highlight(
        &self,
        highlight: &Highlight,
        article: &Article,
        options: &SyncOptions,
    ) -> bool {
        let resolved =
            resolve_note(&self.vault, &self.folder, article, options.create_files).await;
        let path = match resolved {
            Ok(Some(path)) => path,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, article = article.id, "failed to resolve note file");
                return false;
            }
        };

        let original = match self.vault.read_file(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read note file");
                return false;
            }
        };

        let mut text = original.clone();
        if options.sync_properties {
            text = apply_properties(
                &text,
                article,
                &self.properties,
                options.remove_disabled_properties,
            );
        }

        let mut appended = String::new();
        if already_present(&text, highlight) {
            if let Some(migration) = &options.update_highlight_template {
                text = migrate_block(&text, highlight, migration);
            }
        } else if options.sync_highlights {
            appended = render(highlight, &self.template);
        }

        let result = if text != original {
            text.push_str(&appended);
            self.vault.modify_file(&path, &text).await
        } else if !appended.is_empty() {
            self.vault.append_to_file(&path, &appended).await
        } else {
            return false;
        };

        match result {
            Ok(()) => !appended.is_empty(),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to write note file");
                false
            }
        }
    }
}

/// Textual find-and-replace of one previously rendered block. The old
/// rendering is recomputed from the recorded previous template, falling back
/// to the fixed legacy format; the first verbatim match is replaced. A
/// mismatch (the user edited the block) is silently skipped.
fn migrate_block(text: &str, highlight: &Highlight, migration: &TemplateMigration) -> String {
    let new = render(highlight, &migration.to);

    let mut candidates = Vec::with_capacity(2);
    if let Some(from) = &migration.from {
        candidates.push(render(highlight, from));
    }
    candidates.push(render_legacy(highlight));

    for old in candidates {
        if old != new && text.contains(&old) {
            return text.replacen(&old, &new, 1);
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tag;
    use crate::render::DEFAULT_TEMPLATE;
    use crate::vault::{MemoryVault, note_path};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    struct MockSource {
        pages: Mutex<Vec<Result<HighlightsPage, ApiError>>>,
        seen_after: Mutex<Vec<i64>>,
    }

    impl MockSource {
        fn new(pages: Vec<Result<HighlightsPage, ApiError>>) -> Self {
            let mut pages = pages;
            pages.reverse();
            MockSource {
                pages: Mutex::new(pages),
                seen_after: Mutex::new(vec![]),
            }
        }

        fn afters(&self) -> Vec<i64> {
            self.seen_after.lock().unwrap().clone()
        }
    }

    impl HighlightsSource for &MockSource {
        async fn fetch_highlights_page(&self, after: i64) -> Result<HighlightsPage, ApiError> {
            self.seen_after.lock().unwrap().push(after);
            self.pages
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(HighlightsPage::default()))
        }
    }

    fn article(id: i64, title: &str) -> Article {
        Article {
            id,
            title: title.to_string(),
            url: format!("https://example.com/{id}"),
            author: None,
            saved_at: 1_700_000_000,
            published_at: None,
            tags: vec![Tag {
                name: "saved".to_string(),
            }],
        }
    }

    fn highlight(id: i64, article_id: i64, text: &str) -> Highlight {
        Highlight {
            id,
            article_id: article_id.to_string(),
            time: 1_700_000_000 + id,
            text: text.to_string(),
            note: None,
        }
    }

    fn page(highlights: Vec<Highlight>, articles: Vec<Article>) -> HighlightsPage {
        let articles_by_id: HashMap<String, Article> = articles
            .into_iter()
            .map(|a| (a.id.to_string(), a))
            .collect();
        HighlightsPage {
            highlights,
            articles_by_id,
        }
    }

    fn folder() -> PathBuf {
        PathBuf::from("Instapaper")
    }

    fn syncer<'a>(
        source: &'a MockSource,
        vault: MemoryVault,
    ) -> Syncer<&'a MockSource, MemoryVault> {
        Syncer::new(
            source,
            vault,
            folder(),
            DEFAULT_TEMPLATE.to_string(),
            PropertyConfig::default(),
        )
    }

    fn note_for<'a>(s: &'a Syncer<&MockSource, MemoryVault>, a: &Article) -> Option<String> {
        s.vault.get(&note_path(Path::new("Instapaper"), a))
    }

    #[tokio::test]
    async fn fresh_sync_creates_file_and_appends_all() {
        let a = article(12, "An Article");
        let source = MockSource::new(vec![Ok(page(
            vec![highlight(3, 12, "first"), highlight(5, 12, "second")],
            vec![a.clone()],
        ))]);
        let s = syncer(&source, MemoryVault::new());

        let outcome = s.sync(0, &SyncOptions::default()).await;

        assert_eq!(outcome, SyncOutcome { cursor: 5, count: 2 });
        assert_eq!(s.vault.file_count(), 1);
        let body = note_for(&s, &a).unwrap();
        assert!(body.contains("> first"));
        assert!(body.contains("> second"));
        assert!(body.contains("^h3") && body.contains("^h5"));
        assert!(body.starts_with("---\n"), "frontmatter missing: {body}");
        // second fetch resumed from the advanced cursor
        assert_eq!(source.afters(), vec![0, 5]);
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let a = article(12, "An Article");
        let h = highlight(3, 12, "first");
        let source = MockSource::new(vec![
            Ok(page(vec![h.clone()], vec![a.clone()])),
            Ok(HighlightsPage::default()),
            Ok(page(vec![h.clone()], vec![a.clone()])),
        ]);
        let s = syncer(&source, MemoryVault::new());

        let first = s.sync(0, &SyncOptions::default()).await;
        let after_first = note_for(&s, &a).unwrap();

        // re-delivery of the same highlight (at-least-once) appends nothing
        let second = s.sync(0, &SyncOptions::default()).await;
        assert_eq!(first, SyncOutcome { cursor: 3, count: 1 });
        assert_eq!(second, SyncOutcome { cursor: 3, count: 0 });
        assert_eq!(note_for(&s, &a).unwrap(), after_first);
    }

    #[tokio::test]
    async fn stops_after_consecutive_fetch_failures_keeping_progress() {
        let a = article(12, "An Article");
        let source = MockSource::new(vec![
            Ok(page(vec![highlight(3, 12, "first")], vec![a.clone()])),
            Err(ApiError::Status(500)),
            Err(ApiError::Status(502)),
            Err(ApiError::Status(503)),
        ]);
        let s = syncer(&source, MemoryVault::new());

        let outcome = s.sync(0, &SyncOptions::default()).await;

        assert_eq!(outcome, SyncOutcome { cursor: 3, count: 1 });
        // same page retried in place, cursor never moved past page 1
        assert_eq!(source.afters(), vec![0, 3, 3, 3]);
    }

    #[tokio::test]
    async fn transient_failure_resets_counter_on_success() {
        let a = article(12, "An Article");
        let source = MockSource::new(vec![
            Err(ApiError::Status(500)),
            Err(ApiError::Status(500)),
            Ok(page(vec![highlight(3, 12, "first")], vec![a])),
            Err(ApiError::Status(500)),
            Err(ApiError::Status(500)),
            Ok(HighlightsPage::default()),
        ]);
        let s = syncer(&source, MemoryVault::new());

        let outcome = s.sync(0, &SyncOptions::default()).await;
        assert_eq!(outcome, SyncOutcome { cursor: 3, count: 1 });
    }

    #[tokio::test]
    async fn missing_folder_rebaselines_cursor() {
        let source = MockSource::new(vec![Ok(HighlightsPage::default())]);
        let s = syncer(&source, MemoryVault::new());

        let outcome = s.sync(500, &SyncOptions::default()).await;

        assert!(s.vault.has_folder(Path::new("Instapaper")));
        // first fetch starts from 0, not the stored 500
        assert_eq!(source.afters(), vec![0]);
        assert_eq!(outcome.cursor, 0);
    }

    #[tokio::test]
    async fn missing_folder_without_create_is_a_noop() {
        let source = MockSource::new(vec![]);
        let s = syncer(&source, MemoryVault::new());
        let options = SyncOptions {
            create_files: false,
            ..SyncOptions::default()
        };

        let outcome = s.sync(500, &options).await;

        assert_eq!(outcome, SyncOutcome { cursor: 500, count: 0 });
        assert!(source.afters().is_empty(), "must not fetch at all");
    }

    #[tokio::test]
    async fn orphan_highlight_advances_cursor_without_writes() {
        let source = MockSource::new(vec![Ok(page(vec![highlight(9, 777, "lost")], vec![]))]);
        let s = syncer(&source, MemoryVault::new());

        let outcome = s.sync(0, &SyncOptions::default()).await;

        assert_eq!(outcome, SyncOutcome { cursor: 9, count: 0 });
        assert_eq!(s.vault.file_count(), 0);
    }

    #[tokio::test]
    async fn resolution_failure_skips_item_and_continues() {
        let bad = article(1, "Bad");
        let good = article(2, "Good");
        let source = MockSource::new(vec![Ok(page(
            vec![highlight(10, 1, "lost"), highlight(11, 2, "kept")],
            vec![bad.clone(), good.clone()],
        ))]);
        let vault = MemoryVault::new();
        vault
            .poisoned
            .lock()
            .unwrap()
            .insert(note_path(Path::new("Instapaper"), &bad));
        let s = syncer(&source, vault);

        let outcome = s.sync(0, &SyncOptions::default()).await;

        // the failed item still moved the cursor; the run was not aborted
        assert_eq!(outcome, SyncOutcome { cursor: 11, count: 1 });
        assert!(note_for(&s, &good).unwrap().contains("> kept"));
    }

    #[tokio::test]
    async fn sync_highlights_disabled_refreshes_metadata_only() {
        let a = article(12, "An Article");
        let source = MockSource::new(vec![Ok(page(
            vec![highlight(3, 12, "first")],
            vec![a.clone()],
        ))]);
        let s = syncer(&source, MemoryVault::new());
        let options = SyncOptions {
            sync_highlights: false,
            ..SyncOptions::default()
        };

        let outcome = s.sync(0, &options).await;

        assert_eq!(outcome, SyncOutcome { cursor: 3, count: 0 });
        let body = note_for(&s, &a).unwrap();
        assert!(body.contains("url: https://example.com/12"));
        assert!(!body.contains("> first"));
    }

    #[tokio::test]
    async fn template_migration_rewrites_exact_block_only() {
        let from = "{text}\n{link}";
        let to = "{text}\nmoved {blockId}";
        let a = article(12, "An Article");
        let h = highlight(3, 12, "first");
        let vault = MemoryVault::new();
        let path = note_path(Path::new("Instapaper"), &a);
        let existing = format!("intro kept\n\n{}manual trailer kept\n", render(&h, from));
        vault.put(&path, &existing);
        vault.create_folder(Path::new("Instapaper")).await.unwrap();

        let source = MockSource::new(vec![Ok(page(vec![h.clone()], vec![a.clone()]))]);
        let s = syncer(&source, vault);
        let options = SyncOptions {
            sync_properties: false,
            update_highlight_template: Some(TemplateMigration {
                from: Some(from.to_string()),
                to: to.to_string(),
            }),
            ..SyncOptions::default()
        };

        let outcome = s.sync(0, &options).await;

        assert_eq!(outcome, SyncOutcome { cursor: 3, count: 0 });
        let body = note_for(&s, &a).unwrap();
        assert!(body.contains("intro kept"));
        assert!(body.contains("manual trailer kept"));
        assert!(body.contains("moved ^h3"));
        assert!(!body.contains(&render(&h, from)));
    }

    #[tokio::test]
    async fn template_migration_handles_legacy_blocks() {
        let a = article(12, "An Article");
        let h = highlight(3, 12, "first");
        let vault = MemoryVault::new();
        let path = note_path(Path::new("Instapaper"), &a);
        vault.put(&path, &render_legacy(&h));
        vault.create_folder(Path::new("Instapaper")).await.unwrap();

        let source = MockSource::new(vec![Ok(page(vec![h.clone()], vec![a.clone()]))]);
        let s = syncer(&source, vault);
        let options = SyncOptions {
            sync_properties: false,
            update_highlight_template: Some(TemplateMigration {
                from: None,
                to: DEFAULT_TEMPLATE.to_string(),
            }),
            ..SyncOptions::default()
        };

        s.sync(0, &options).await;

        let body = note_for(&s, &a).unwrap();
        assert!(!body.contains("🔗"), "legacy block not rewritten: {body}");
        assert!(body.contains("^h3"));
    }

    #[tokio::test]
    async fn template_migration_skips_edited_blocks() {
        let from = "{text}\n{link}";
        let a = article(12, "An Article");
        let h = highlight(3, 12, "first");
        let vault = MemoryVault::new();
        let path = note_path(Path::new("Instapaper"), &a);
        // user edited inside the old block, but the anchor is still there
        let edited = format!("> first (edited by hand)\n{}\n\n", h.link());
        vault.put(&path, &edited);
        vault.create_folder(Path::new("Instapaper")).await.unwrap();

        let source = MockSource::new(vec![Ok(page(vec![h.clone()], vec![a.clone()]))]);
        let s = syncer(&source, vault);
        let options = SyncOptions {
            sync_properties: false,
            update_highlight_template: Some(TemplateMigration {
                from: Some(from.to_string()),
                to: "{text} {blockId}".to_string(),
            }),
            ..SyncOptions::default()
        };

        let outcome = s.sync(0, &options).await;

        assert_eq!(outcome.count, 0);
        assert_eq!(note_for(&s, &a).unwrap(), edited);
    }

    #[tokio::test]
    async fn concurrent_start_is_a_noop() {
        let source = MockSource::new(vec![]);
        let s = syncer(&source, MemoryVault::new());
        s.busy.store(true, Ordering::Release);

        let outcome = s.sync(40, &SyncOptions::default()).await;

        // zero progress, but the caller's watermark must come back intact
        assert_eq!(outcome, SyncOutcome { cursor: 40, count: 0 });
        assert!(source.afters().is_empty());
        assert!(s.busy.load(Ordering::Acquire), "guard must stay held");
    }

    #[test]
    fn migrate_block_first_match_only() {
        let h = highlight(3, 12, "first");
        let from = "{text} {blockId}";
        let rendered = render(&h, from);
        let doubled = format!("{rendered}{rendered}");
        let out = migrate_block(
            &doubled,
            &h,
            &TemplateMigration {
                from: Some(from.to_string()),
                to: "new {blockId}".to_string(),
            },
        );
        assert_eq!(out.matches("new ^h3").count(), 1);
        assert!(out.contains(&rendered), "second occurrence must survive");
    }
}
