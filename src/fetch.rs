use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::SourceError;
use crate::models::Listing;
use crate::parse::{parse_page, ParsedPage};
use crate::source::{ListingSource, SearchQuery, PAGE_SIZE};

/// Scan ceiling used when neither the source nor the caller bounds the run.
pub const FALLBACK_CEILING: usize = 1000;

/// One fetched offset window. A failed page is empty, never an error.
#[derive(Debug, Default)]
pub struct Page {
    pub offset: usize,
    pub listings: Vec<Listing>,
    pub total: Option<usize>,
    pub failed: bool,
}

/// `limit == 0` means no caller limit.
pub fn scan_ceiling(total: Option<usize>, limit: usize) -> usize {
    match (total, limit) {
        (Some(total), 0) => total,
        (Some(total), limit) => total.min(limit),
        (None, 0) => FALLBACK_CEILING,
        (None, limit) => limit,
    }
}

/// Offsets after the first page, up to the ceiling.
pub fn page_offsets(ceiling: usize) -> Vec<usize> {
    (PAGE_SIZE..ceiling).step_by(PAGE_SIZE).collect()
}

pub struct PageFetcher {
    source: Arc<dyn ListingSource>,
    query: SearchQuery,
    page_delay: Duration,
    page_concurrency: usize,
    max_retries: u32,
    backoff_unit: Duration,
}

impl PageFetcher {
    pub fn new(source: Arc<dyn ListingSource>, query: SearchQuery, settings: &Settings) -> Self {
        Self {
            source,
            query,
            page_delay: settings.page_delay,
            page_concurrency: settings.page_concurrency.max(1),
            max_retries: settings.max_retries,
            backoff_unit: settings.backoff_unit,
        }
    }

    /// Fetches and parses one page, retrying transient failures with a
    /// linear backoff of `backoff_unit * attempt`.
    pub async fn try_fetch_page(&self, offset: usize) -> Result<ParsedPage, SourceError> {
        let mut attempt = 0;
        loop {
            match self.source.search_listings(&self.query, offset, PAGE_SIZE).await {
                Ok(payload) => return Ok(parse_page(&payload)),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff_unit * attempt;
                    warn!(
                        offset,
                        attempt,
                        error = %e,
                        "Transient page fetch failure, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn fetch_page(&self, offset: usize) -> Page {
        match self.try_fetch_page(offset).await {
            Ok(parsed) => {
                debug!(offset, count = parsed.listings.len(), total = ?parsed.total, "Fetched page");
                Page {
                    offset,
                    listings: parsed.listings,
                    total: parsed.total,
                    failed: false,
                }
            }
            Err(e) => {
                warn!(offset, error = %e, "Page fetch failed, continuing without it");
                Page {
                    offset,
                    failed: true,
                    ..Default::default()
                }
            }
        }
    }

    /// Fetches the given offsets concurrently; pages arrive in completion order.
    ///
    /// Request starts are spaced `page_delay` apart from a common origin, so
    /// pooled workers never fire together.
    pub fn remaining_pages(&self, offsets: Vec<usize>) -> impl Stream<Item = Page> + '_ {
        let origin = Instant::now();
        stream::iter(offsets.into_iter().enumerate())
            .map(move |(index, offset)| async move {
                sleep_until(start_at(origin, self.page_delay, index)).await;
                self.fetch_page(offset).await
            })
            .buffer_unordered(self.page_concurrency)
    }
}

/// Scheduled start of the `index`-th pooled request.
fn start_at(origin: Instant, page_delay: Duration, index: usize) -> Instant {
    let slot = u32::try_from(index + 1).unwrap_or(u32::MAX);
    origin + page_delay.saturating_mul(slot)
}
