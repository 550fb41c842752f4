//! In-process fakes shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::db::{Database, DismissalStore};
use crate::error::SourceError;
use crate::models::{DismissalRecord, GeoCandidate};
use crate::source::{ListingSource, SearchQuery};

#[derive(Default)]
struct FakeState {
    calls: HashMap<String, usize>,
    regions: HashMap<String, String>,
    failing_regions: HashSet<String>,
    candidates: HashMap<String, Vec<GeoCandidate>>,
    pages: HashMap<usize, Value>,
    page_failures: HashMap<usize, VecDeque<u16>>,
    descriptions: HashMap<String, String>,
    failing_dismissals: HashSet<String>,
    dismissed: Vec<String>,
    queries: Vec<String>,
}

/// Scripted listing source. Every trait call is counted by method name.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
}

impl FakeSource {
    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn record_call(&self, name: &str) {
        self.with_state(|s| *s.calls.entry(name.to_string()).or_default() += 1);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.with_state(|s| s.calls.get(name).copied().unwrap_or(0))
    }

    pub fn set_region(&self, place: &str, region_id: &str) {
        self.with_state(|s| {
            s.regions
                .insert(place.trim().to_lowercase(), region_id.to_string())
        });
    }

    pub fn fail_region(&self, place: &str) {
        self.with_state(|s| s.failing_regions.insert(place.trim().to_lowercase()));
    }

    pub fn set_candidates(&self, region_id: &str, candidates: Vec<GeoCandidate>) {
        self.with_state(|s| s.candidates.insert(region_id.to_string(), candidates));
    }

    pub fn set_page(&self, offset: usize, payload: Value) {
        self.with_state(|s| s.pages.insert(offset, payload));
    }

    /// Statuses returned, in order, before the page at `offset` succeeds.
    pub fn fail_page(&self, offset: usize, statuses: &[u16]) {
        self.with_state(|s| {
            s.page_failures
                .insert(offset, statuses.iter().copied().collect())
        });
    }

    pub fn set_description(&self, listing_id: &str, text: &str) {
        self.with_state(|s| s.descriptions.insert(listing_id.to_string(), text.to_string()));
    }

    pub fn fail_dismissal(&self, listing_id: &str) {
        self.with_state(|s| s.failing_dismissals.insert(listing_id.to_string()));
    }

    pub fn dismissed(&self) -> Vec<String> {
        self.with_state(|s| s.dismissed.clone())
    }

    pub fn queries(&self) -> Vec<String> {
        self.with_state(|s| s.queries.clone())
    }
}

#[async_trait]
impl ListingSource for FakeSource {
    async fn search_listings(
        &self,
        query: &SearchQuery,
        offset: usize,
        _page_size: usize,
    ) -> Result<Value, SourceError> {
        self.record_call("search_listings");
        self.with_state(|s| {
            s.queries.push(query.to_query_string());
            if let Some(status) = s.page_failures.get_mut(&offset).and_then(VecDeque::pop_front) {
                return Err(SourceError::Status(status));
            }
            Ok(s.pages
                .get(&offset)
                .cloned()
                .unwrap_or_else(|| page(vec![], None)))
        })
    }

    async fn dismiss(&self, listing_id: &str, _dismiss_token: Option<&str>) -> Result<(), SourceError> {
        self.record_call("dismiss");
        self.with_state(|s| {
            if s.failing_dismissals.contains(listing_id) {
                return Err(SourceError::Status(403));
            }
            s.dismissed.push(listing_id.to_string());
            Ok(())
        })
    }

    async fn undo_dismiss(&self, listing_id: &str) -> Result<(), SourceError> {
        self.record_call("undo_dismiss");
        self.with_state(|s| s.dismissed.retain(|id| id != listing_id));
        Ok(())
    }

    async fn fetch_description(&self, listing_id: &str) -> Result<Option<String>, SourceError> {
        self.record_call("fetch_description");
        Ok(self.with_state(|s| s.descriptions.get(listing_id).cloned()))
    }

    async fn resolve_region_id(&self, place: &str) -> Result<Option<String>, SourceError> {
        self.record_call("resolve_region_id");
        let key = place.trim().to_lowercase();
        self.with_state(|s| {
            if s.failing_regions.contains(&key) {
                return Err(SourceError::Status(500));
            }
            Ok(s.regions.get(&key).cloned())
        })
    }

    async fn fetch_sub_region_candidates(
        &self,
        region_id: &str,
    ) -> Result<Vec<GeoCandidate>, SourceError> {
        self.record_call("fetch_sub_region_candidates");
        Ok(self.with_state(|s| s.candidates.get(region_id).cloned().unwrap_or_default()))
    }
}

/// Store wrapper counting membership queries.
pub struct CountingStore {
    pub inner: Arc<Database>,
    pub existing_id_queries: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            existing_id_queries: AtomicUsize::new(0),
        }
    }

    pub fn existing_id_queries(&self) -> usize {
        self.existing_id_queries.load(Ordering::SeqCst)
    }
}

impl DismissalStore for CountingStore {
    fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        self.existing_id_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.existing_ids(ids)
    }

    fn earliest_duplicate(&self, title: &str, company: &str) -> Result<Option<String>> {
        self.inner.earliest_duplicate(title, company)
    }

    fn save_dismissals(&self, records: &[DismissalRecord]) -> Result<usize> {
        self.inner.save_dismissals(records)
    }

    fn save_dismissal(&self, record: &DismissalRecord) -> Result<bool> {
        self.inner.save_dismissal(record)
    }
}

/// A search-result job card in the shape the remote API returns.
pub fn card(id: &str, title: &str, company: &str) -> Value {
    json!({
        "entityUrn": format!("urn:li:fsd_jobPostingCard:({},JOB_SEARCH)", id),
        "jobPostingUrn": format!("urn:li:fsd_jobPosting:{}", id),
        "*jobPosting": format!("urn:li:fsd_jobPosting:{}", id),
        "title": {"text": title},
        "primaryDescription": {"text": company},
        "secondaryDescription": {"text": "Toronto, ON"},
        "logo": {"actionTarget": format!("https://www.linkedin.com/company/{}/life", company.to_lowercase().replace(' ', "-"))},
        "footerItems": [],
        "primaryActionsUnions": []
    })
}

/// Wraps cards (plus any extra included entities) into a search payload.
pub fn page_with(cards: Vec<Value>, extra: Vec<Value>, total: Option<usize>) -> Value {
    let elements: Vec<Value> = cards
        .iter()
        .map(|c| json!({"jobCardUnion": {"*jobPostingCard": c["entityUrn"].clone()}}))
        .collect();
    let mut included = cards;
    included.extend(extra);
    let mut data = json!({ "elements": elements });
    if let Some(total) = total {
        data["paging"] = json!({ "total": total, "start": 0, "count": 25 });
    }
    json!({ "data": data, "included": included })
}

pub fn page(cards: Vec<Value>, total: Option<usize>) -> Value {
    page_with(cards, vec![], total)
}

/// Seeker-state entity marking a listing as applied to.
pub fn applied_state(id: &str) -> Value {
    json!({
        "entityUrn": format!("urn:li:fsd_jobSeekerJobState:{}", id),
        "jobSeekerJobStateActions": [{"jobSeekerJobStateEnums": "APPLIED"}]
    })
}
