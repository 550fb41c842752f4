use async_trait::async_trait;
use serde_json::Value;

use crate::error::SourceError;
use crate::models::{GeoCandidate, SearchParams, TimeWindow, WorkplaceType};

/// Listings per search request. Fixed by the Listing Source.
pub const PAGE_SIZE: usize = 25;

/// The remote job board. Session handling lives entirely behind this trait.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn search_listings(
        &self,
        query: &SearchQuery,
        offset: usize,
        page_size: usize,
    ) -> Result<Value, SourceError>;

    async fn dismiss(&self, listing_id: &str, dismiss_token: Option<&str>) -> Result<(), SourceError>;

    async fn undo_dismiss(&self, listing_id: &str) -> Result<(), SourceError>;

    async fn fetch_description(&self, listing_id: &str) -> Result<Option<String>, SourceError>;

    async fn resolve_region_id(&self, place: &str) -> Result<Option<String>, SourceError>;

    async fn fetch_sub_region_candidates(
        &self,
        region_id: &str,
    ) -> Result<Vec<GeoCandidate>, SourceError>;
}

/// How the location constrains a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationFilter {
    Anywhere,
    Region(String),
    SubRegion(String),
    /// Unresolvable place text, folded into the keywords.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keywords: String,
    pub location: LocationFilter,
    pub relevance: bool,
    pub time_window: TimeWindow,
    pub workplace_types: Vec<WorkplaceType>,
    pub easy_apply: bool,
}

impl SearchQuery {
    pub fn new(params: &SearchParams, location: LocationFilter) -> Self {
        Self {
            keywords: params.keywords.trim().to_string(),
            location,
            relevance: params.relevance,
            time_window: params.time_window,
            workplace_types: params.workplace_types.clone(),
            easy_apply: params.easy_apply,
        }
    }

    /// Renders the Rest.li `query=` tuple.
    pub fn to_query_string(&self) -> String {
        let sort = if self.relevance { "R" } else { "DD" };
        let mut filters = vec![format!("sortBy:List({})", sort)];

        if let Some(range) = self.time_window.range_code() {
            filters.push(format!("timePostedRange:List({})", range));
        }
        if !self.workplace_types.is_empty() {
            let codes: Vec<String> = self
                .workplace_types
                .iter()
                .map(|w| w.code().to_string())
                .collect();
            filters.push(format!("workplaceType:List({})", codes.join(",")));
        }
        if self.easy_apply {
            filters.push("applyWithLinkedin:List(true)".to_string());
        }
        if let LocationFilter::SubRegion(id) = &self.location {
            filters.push(format!("populatedPlace:List({})", id));
        }

        let mut parts = vec![
            "origin:JOB_SEARCH_PAGE_JOB_FILTER".to_string(),
            "spellCorrectionEnabled:true".to_string(),
        ];
        if let LocationFilter::Region(id) = &self.location {
            parts.push(format!("locationUnion:(geoId:{})", id));
        }
        parts.push(format!("selectedFilters:({})", filters.join(",")));

        let mut keywords = self.keywords.clone();
        if let LocationFilter::Text(place) = &self.location {
            if keywords.is_empty() {
                keywords = place.clone();
            } else {
                keywords = format!("{} {}", keywords, place);
            }
        }
        if !keywords.is_empty() {
            parts.push(format!("keywords:{}", urlencoding::encode(&keywords)));
        }

        format!("({})", parts.join(","))
    }
}
