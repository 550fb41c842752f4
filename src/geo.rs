use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::GeoStore;
use crate::models::{GeoCacheEntry, GeoCandidate};
use crate::source::{ListingSource, LocationFilter};

/// Outcome of resolving a place name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub id: Option<String>,
    pub refined: bool,
}

impl ResolvedLocation {
    pub fn unresolved() -> Self {
        Self {
            id: None,
            refined: false,
        }
    }

    fn from_entry(entry: &GeoCacheEntry) -> Self {
        Self {
            id: Some(entry.effective_id().to_string()),
            refined: entry.is_refined(),
        }
    }

    /// Search filter for this resolution; `place` is used when nothing resolved.
    pub fn filter(&self, place: &str) -> LocationFilter {
        match (&self.id, self.refined) {
            (Some(id), true) => LocationFilter::SubRegion(id.clone()),
            (Some(id), false) => LocationFilter::Region(id.clone()),
            (None, _) if is_worldwide(place) => LocationFilter::Anywhere,
            (None, _) => LocationFilter::Text(place.trim().to_string()),
        }
    }
}

/// Cache key for a location query: trimmed, each word capitalised.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut prev_is_alpha = false;
    for c in query.trim().chars() {
        if c.is_alphabetic() {
            if prev_is_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(c);
            prev_is_alpha = false;
        }
    }
    out
}

fn is_worldwide(place: &str) -> bool {
    let place = place.trim();
    place.is_empty() || place.eq_ignore_ascii_case("worldwide")
}

/// First candidate whose name equals `place` or begins with its city part
/// followed by a boundary. Candidates are assumed sorted by relevance.
pub fn match_candidate<'a>(place: &str, candidates: &'a [GeoCandidate]) -> Option<&'a GeoCandidate> {
    let full = place.trim().to_lowercase();
    let city_key = full.split(',').next().unwrap_or("").trim().to_string();

    candidates.iter().find(|candidate| {
        let name = candidate.match_name().trim().to_lowercase();
        if name == full {
            return true;
        }
        if city_key.is_empty() {
            return false;
        }
        match name.strip_prefix(&city_key) {
            Some(rest) => matches!(rest.chars().next(), None | Some(',' | ' ' | '-')),
            None => false,
        }
    })
}

pub struct LocationResolver {
    store: Arc<dyn GeoStore>,
    source: Arc<dyn ListingSource>,
}

impl LocationResolver {
    pub fn new(store: Arc<dyn GeoStore>, source: Arc<dyn ListingSource>) -> Self {
        Self { store, source }
    }

    /// Lookup failures degrade to a coarser location instead of erroring.
    pub async fn resolve(&self, place: &str) -> ResolvedLocation {
        if is_worldwide(place) {
            return ResolvedLocation::unresolved();
        }
        let query = normalize_query(place);

        match self.store.geo_cache(&query) {
            Ok(Some(entry)) => {
                info!(
                    query = %query,
                    id = entry.effective_id(),
                    refined = entry.is_refined(),
                    "Location cache hit"
                );
                return ResolvedLocation::from_entry(&entry);
            }
            Ok(None) => {}
            Err(e) => warn!(query = %query, error = %e, "Location cache read failed"),
        }

        match self.store.candidate_by_corrected_name(place) {
            Ok(Some(candidate)) => {
                if let Some(region_id) = candidate.region_ids.first() {
                    let entry =
                        GeoCacheEntry::new(query.clone(), region_id.clone(), Some(candidate.id.clone()));
                    info!(query = %query, candidate = %candidate.id, "Location matched a known place name");
                    self.write_cache(&entry);
                    return ResolvedLocation::from_entry(&entry);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(query = %query, error = %e, "Candidate lookup failed"),
        }

        info!(place, "Resolving location");
        let region_id = match self.source.resolve_region_id(place).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(place, "Could not resolve a region for location");
                return ResolvedLocation::unresolved();
            }
            Err(e) => {
                warn!(place, error = %e, "Region lookup failed");
                return ResolvedLocation::unresolved();
            }
        };
        debug!(place, region_id = %region_id, "Resolved region");

        let candidates = self.candidates(&region_id).await;
        let sub_region = match match_candidate(place, &candidates) {
            Some(candidate) => {
                info!(place, name = %candidate.name, id = %candidate.id, "Refined location");
                Some(candidate.id.clone())
            }
            None => {
                info!(place, region_id = %region_id, "No sub-region match, using region");
                None
            }
        };

        let entry = GeoCacheEntry::new(query, region_id, sub_region);
        self.write_cache(&entry);
        ResolvedLocation::from_entry(&entry)
    }

    async fn candidates(&self, region_id: &str) -> Vec<GeoCandidate> {
        match self.store.candidates_for_region(region_id) {
            Ok(cached) if !cached.is_empty() => {
                debug!(region_id, count = cached.len(), "Candidate cache hit");
                return cached;
            }
            Ok(_) => {}
            Err(e) => warn!(region_id, error = %e, "Candidate cache read failed"),
        }

        let fetched = match self.source.fetch_sub_region_candidates(region_id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(region_id, error = %e, "Failed to fetch sub-region candidates");
                return Vec::new();
            }
        };
        if !fetched.is_empty() {
            if let Err(e) = self.store.save_candidates(region_id, &fetched) {
                warn!(region_id, error = %e, "Failed to store sub-region candidates");
            }
        }
        fetched
    }

    fn write_cache(&self, entry: &GeoCacheEntry) {
        if let Err(e) = self.store.save_geo_cache(entry) {
            warn!(query = %entry.query, error = %e, "Location cache write failed");
        }
    }
}
