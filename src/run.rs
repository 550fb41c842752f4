use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::blocklist::Blocklist;
use crate::cascade::{Decision, DecisionCascade};
use crate::config::Settings;
use crate::db::{Database, DismissalStore};
use crate::dedup::DuplicateIndex;
use crate::fetch::{page_offsets, scan_ceiling, Page, PageFetcher};
use crate::geo::LocationResolver;
use crate::models::{DismissReason, DismissalRecord, Listing, RunStats, SearchParams};
use crate::similarity::LevenshteinComparator;
use crate::source::{ListingSource, SearchQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: i64,
    pub status: RunStatus,
    pub stats: RunStats,
}

/// What happened to one listing after classification.
enum Outcome {
    Skipped,
    Kept,
    ClassifyFailed,
    DismissFailed,
    Suppressed { record: DismissalRecord, synced: bool },
}

/// Per-run accumulators threaded through every page.
#[derive(Default)]
struct Sweep {
    stats: RunStats,
    pending: Vec<DismissalRecord>,
    /// Listing ids already handled this run; records only reach the store at the end.
    seen: HashSet<String>,
}

/// Drives one sweep from location resolution to the final batch write.
pub struct RunCoordinator {
    db: Arc<Database>,
    store: Arc<dyn DismissalStore>,
    source: Arc<dyn ListingSource>,
    settings: Settings,
    cancel: CancellationToken,
}

impl RunCoordinator {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn ListingSource>,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store: db.clone(),
            db,
            source,
            settings,
            cancel,
        }
    }

    /// Routes dismissal reads and writes through a different store.
    pub fn with_store(mut self, store: Arc<dyn DismissalStore>) -> Self {
        self.store = store;
        self
    }

    pub async fn run(&self, params: &SearchParams, blocklist: Blocklist) -> Result<RunOutcome> {
        let user = self.settings.user.as_deref();
        let params_json = serde_json::to_string(params).context("Failed to encode run parameters")?;
        let run_id = self.db.start_run(&params_json, user)?;
        info!(
            run_id,
            keywords = %params.keywords,
            location = %params.location,
            limit = params.limit,
            "Starting run"
        );

        let resolver = LocationResolver::new(self.db.clone(), self.source.clone());
        let resolved = resolver.resolve(&params.location).await;
        let query = SearchQuery::new(params, resolved.filter(&params.location));

        let fetcher = PageFetcher::new(self.source.clone(), query, &self.settings);
        let cascade = DecisionCascade::new(
            blocklist,
            DuplicateIndex::new(self.store.clone()),
            Arc::new(LevenshteinComparator),
            self.source.clone(),
            &self.settings,
        );

        let mut sweep = Sweep::default();

        let first = fetcher.fetch_page(0).await;
        let ceiling = scan_ceiling(first.total, params.limit);
        // A failed first page says nothing about the result set; only a served empty page ends the run.
        let has_more = first.failed || !first.listings.is_empty();
        info!(run_id, total = ?first.total, ceiling, first_failed = first.failed, "Scope determined");
        self.process_page(first, ceiling, &cascade, run_id, &mut sweep).await;

        if has_more && !self.cancel.is_cancelled() {
            let pages = fetcher
                .remaining_pages(page_offsets(ceiling))
                .take_until(self.cancel.cancelled());
            let mut pages = std::pin::pin!(pages);
            while let Some(page) = pages.next().await {
                self.process_page(page, ceiling, &cascade, run_id, &mut sweep).await;
                if self.cancel.is_cancelled() {
                    break;
                }
            }
        }

        let Sweep { mut stats, pending, .. } = sweep;
        self.persist(&pending, &mut stats);

        let status = if self.cancel.is_cancelled() {
            warn!(run_id, "Run cancelled, keeping partial results");
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        if let Err(e) = self.db.finish_run(run_id, status.as_str(), &stats) {
            warn!(run_id, error = %e, "Failed to record run statistics");
        }

        info!(
            run_id,
            status = status.as_str(),
            processed = stats.processed,
            suppressed = stats.suppressed,
            synced = stats.synced,
            skipped = stats.skipped,
            persisted = stats.persisted,
            dismiss_failures = stats.dismiss_failures,
            classify_failures = stats.classify_failures,
            pages_failed = stats.pages_failed,
            duplicate_keys = cascade.duplicates().len(),
            "Run finished"
        );

        Ok(RunOutcome {
            run_id,
            status,
            stats,
        })
    }

    async fn process_page(
        &self,
        mut page: Page,
        ceiling: usize,
        cascade: &DecisionCascade,
        run_id: i64,
        sweep: &mut Sweep,
    ) {
        let stats = &mut sweep.stats;
        if page.failed {
            stats.pages_failed += 1;
        }
        page.listings.truncate(ceiling.saturating_sub(page.offset));
        if page.listings.is_empty() {
            return;
        }

        let ids: Vec<String> = page.listings.iter().map(|l| l.id.clone()).collect();
        let mut recorded = match self.store.existing_ids(&ids) {
            Ok(recorded) => recorded,
            Err(e) => {
                // Without the existence set a recorded listing could be acted on twice.
                warn!(offset = page.offset, error = %e, "Existence check failed, skipping page");
                stats.pages_failed += 1;
                return;
            }
        };

        for id in ids {
            if !sweep.seen.insert(id.clone()) {
                recorded.insert(id);
            }
        }

        for listing in &page.listings {
            stats.count_flags(listing);
        }

        let recorded = &recorded;
        let outcomes: Vec<Outcome> = stream::iter(page.listings)
            .map(move |listing| async move { self.handle(listing, cascade, recorded, run_id).await })
            .buffer_unordered(self.settings.classify_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Skipped => stats.skipped += 1,
                Outcome::Kept => {}
                Outcome::ClassifyFailed => stats.classify_failures += 1,
                Outcome::DismissFailed => stats.dismiss_failures += 1,
                Outcome::Suppressed { record, synced } => {
                    if synced {
                        stats.synced += 1;
                    } else {
                        stats.suppressed += 1;
                    }
                    sweep.pending.push(record);
                }
            }
        }
    }

    async fn handle(
        &self,
        listing: Listing,
        cascade: &DecisionCascade,
        recorded: &HashSet<String>,
        run_id: i64,
    ) -> Outcome {
        let reason = match cascade.classify(&listing, recorded).await {
            Ok(Decision::Skip) => return Outcome::Skipped,
            Ok(Decision::Keep) => return Outcome::Kept,
            Ok(Decision::Suppress(reason)) => reason,
            Err(e) => {
                warn!(id = %listing.id, title = %listing.title, error = %e, "Classification failed, keeping listing");
                return Outcome::ClassifyFailed;
            }
        };
        self.act(&listing, reason, run_id).await
    }

    async fn act(&self, listing: &Listing, reason: DismissReason, run_id: i64) -> Outcome {
        let synced = !reason.needs_upstream_action();
        if synced {
            info!(id = %listing.id, title = %listing.title, "Recording upstream dismissal");
        } else {
            sleep(self.settings.action_delay).await;
            if let Err(e) = self
                .source
                .dismiss(&listing.id, listing.dismiss_token.as_deref())
                .await
            {
                warn!(id = %listing.id, title = %listing.title, error = %e, "Dismiss failed, not recording");
                return Outcome::DismissFailed;
            }
            info!(
                id = %listing.id,
                title = %listing.title,
                company = %listing.company,
                reason = %reason,
                "Dismissed"
            );
        }

        let record = DismissalRecord::from_listing(
            listing,
            &reason,
            self.settings.user.as_deref(),
            Some(run_id),
        );
        Outcome::Suppressed { record, synced }
    }

    /// One batch write; on failure every record is retried on its own once.
    fn persist(&self, records: &[DismissalRecord], stats: &mut RunStats) {
        if records.is_empty() {
            return;
        }
        match self.store.save_dismissals(records) {
            Ok(inserted) => stats.persisted += inserted,
            Err(e) => {
                warn!(count = records.len(), error = %e, "Batch write failed, writing records one by one");
                for record in records {
                    match self.store.save_dismissal(record) {
                        Ok(inserted) => stats.persisted += inserted as usize,
                        Err(e) => {
                            warn!(id = %record.listing_id, error = %e, "Dismissal record lost");
                            stats.persist_failures += 1;
                        }
                    }
                }
            }
        }
    }
}
