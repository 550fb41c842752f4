use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One job card from a single search page. Never persisted directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub dismiss_token: Option<String>,
    pub natively_dismissed: bool,
    pub is_reposted: bool,
    pub is_easy_apply: bool,
    pub is_early_applicant: bool,
    pub is_actively_reviewing: bool,
    pub is_applied: bool,
    pub is_viewed: bool,
    pub listed_at: Option<DateTime<Utc>>,
    pub job_url: String,
    pub company_url: Option<String>,
}

/// Why a listing was suppressed. `code()` is the persisted tag.
#[derive(Debug, Clone, PartialEq)]
pub enum DismissReason {
    JobTitle { keyword: String },
    Company { keyword: String },
    Applied,
    DuplicateDescription { matched_id: String, similarity: f64 },
    NativeDismissal,
}

impl DismissReason {
    pub fn code(&self) -> String {
        match self {
            DismissReason::JobTitle { .. } => "job_title".to_string(),
            DismissReason::Company { .. } => "company".to_string(),
            DismissReason::Applied => "applied".to_string(),
            DismissReason::DuplicateDescription {
                matched_id,
                similarity,
            } => format!("duplicate_description:{}:{:.4}", matched_id, similarity),
            DismissReason::NativeDismissal => "native_dismissal".to_string(),
        }
    }

    /// Native dismissals are already in effect upstream; nothing to send.
    pub fn needs_upstream_action(&self) -> bool {
        !matches!(self, DismissReason::NativeDismissal)
    }
}

impl fmt::Display for DismissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DismissReason::JobTitle { keyword } => write!(f, "title keyword '{}'", keyword),
            DismissReason::Company { keyword } => write!(f, "company '{}'", keyword),
            DismissReason::Applied => write!(f, "already applied"),
            DismissReason::DuplicateDescription {
                matched_id,
                similarity,
            } => write!(f, "duplicate of {} ({:.4})", matched_id, similarity),
            DismissReason::NativeDismissal => write!(f, "dismissed upstream"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DismissalRecord {
    pub listing_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub reason: String,
    pub job_url: String,
    pub company_url: Option<String>,
    pub is_reposted: bool,
    pub listed_at: Option<String>,
    pub dismissed_at: String,
    pub user_id: Option<String>,
    pub run_id: Option<i64>,
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl DismissalRecord {
    pub fn from_listing(
        listing: &Listing,
        reason: &DismissReason,
        user_id: Option<&str>,
        run_id: Option<i64>,
    ) -> Self {
        Self {
            listing_id: listing.id.clone(),
            title: listing.title.clone(),
            company: listing.company.clone(),
            location: listing.location.clone(),
            reason: reason.code(),
            job_url: listing.job_url.clone(),
            company_url: listing.company_url.clone(),
            is_reposted: listing.is_reposted,
            listed_at: listing
                .listed_at
                .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()),
            dismissed_at: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            user_id: user_id.map(str::to_string),
            run_id,
        }
    }
}

/// Cached resolution of a location query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCacheEntry {
    pub query: String,
    pub region_id: String,
    pub sub_region_id: Option<String>,
}

impl GeoCacheEntry {
    /// A sub-region equal to its region carries no information and is dropped.
    pub fn new(query: String, region_id: String, sub_region_id: Option<String>) -> Self {
        let sub_region_id = sub_region_id.filter(|sub| *sub != region_id);
        Self {
            query,
            region_id,
            sub_region_id,
        }
    }

    pub fn effective_id(&self) -> &str {
        self.sub_region_id.as_deref().unwrap_or(&self.region_id)
    }

    pub fn is_refined(&self) -> bool {
        self.sub_region_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCandidate {
    pub id: String,
    pub name: String,
    pub corrected_name: Option<String>,
    pub region_ids: Vec<String>,
}

impl GeoCandidate {
    pub fn match_name(&self) -> &str {
        self.corrected_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BlocklistKind {
    #[value(name = "title")]
    JobTitle,
    Company,
}

impl BlocklistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlocklistKind::JobTitle => "job_title",
            BlocklistKind::Company => "company_linkedin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TimeWindow {
    #[default]
    All,
    #[value(name = "24h")]
    Day,
    Week,
    Month,
}

impl TimeWindow {
    pub fn range_code(&self) -> Option<&'static str> {
        match self {
            TimeWindow::All => None,
            TimeWindow::Day => Some("r86400"),
            TimeWindow::Week => Some("r604800"),
            TimeWindow::Month => Some("r2592000"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkplaceType {
    OnSite,
    Remote,
    Hybrid,
}

impl WorkplaceType {
    pub fn code(&self) -> u8 {
        match self {
            WorkplaceType::OnSite => 1,
            WorkplaceType::Remote => 2,
            WorkplaceType::Hybrid => 3,
        }
    }
}

/// Parameters of one sweep, as given on the command line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchParams {
    pub keywords: String,
    pub location: String,
    #[serde(skip)]
    pub time_window: TimeWindow,
    pub limit: usize,
    pub easy_apply: bool,
    pub relevance: bool,
    #[serde(skip)]
    pub workplace_types: Vec<WorkplaceType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub synced: usize,
    pub reposted: usize,
    pub easy_apply: usize,
    pub early_applicant: usize,
    pub actively_reviewing: usize,
    pub applied: usize,
    pub viewed: usize,
    pub dismiss_failures: usize,
    pub classify_failures: usize,
    pub pages_failed: usize,
    pub persisted: usize,
    pub persist_failures: usize,
}

impl RunStats {
    /// Per-listing flag counters. Applied takes precedence over viewed.
    pub fn count_flags(&mut self, listing: &Listing) {
        self.processed += 1;
        if listing.is_reposted {
            self.reposted += 1;
        }
        if listing.is_easy_apply {
            self.easy_apply += 1;
        }
        if listing.is_early_applicant {
            self.early_applicant += 1;
        }
        if listing.is_actively_reviewing {
            self.actively_reviewing += 1;
        }
        if listing.is_applied {
            self.applied += 1;
        } else if listing.is_viewed {
            self.viewed += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub params: String,
    pub status: String,
    pub processed: i64,
    pub suppressed: i64,
    pub skipped: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
}
