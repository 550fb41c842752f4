use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::SourceError;
use crate::models::GeoCandidate;
use crate::source::{ListingSource, SearchQuery};

const SEARCH_PATH: &str = "/voyager/api/voyagerJobsDashJobCards";
const SEARCH_DECORATION: &str =
    "com.linkedin.voyager.dash.deco.jobs.search.JobSearchCardsCollectionLite-88";
const FEEDBACK_PATH: &str = "/voyager/api/voyagerJobsDashJobPostingRelevanceFeedback";
const GRAPHQL_PATH: &str = "/voyager/api/graphql";
const DESCRIPTION_QUERY_ID: &str =
    "voyagerJobsDashJobPostingDetailSections.5b0469809f45002e8d68c712fd6e6285";
const TYPEAHEAD_QUERY_ID: &str = "voyagerSearchDashReusableTypeahead.4c7caa85341b17b470153ad3d1a29caf";
const CLUSTERS_PATH: &str = "/voyager/api/voyagerJobsDashSearchFilterClustersResource";
const CLUSTERS_DECORATION: &str = "com.linkedin.voyager.dash.deco.search.SearchFilterCluster-44";
const GEO_TYPES: &str = "POSTCODE_1,POSTCODE_2,POPULATED_PLACE,ADMIN_DIVISION_1,ADMIN_DIVISION_2,COUNTRY_REGION,MARKET_AREA,COUNTRY_CLUSTER";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Voyager API client authenticated with a browser session cookie.
pub struct VoyagerClient {
    client: reqwest::Client,
    base_url: String,
}

impl VoyagerClient {
    pub fn new(session: &SessionConfig, base_url: &str) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.linkedin.normalized+json+2.1"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert("x-li-lang", HeaderValue::from_static("en_US"));
        headers.insert("x-restli-protocol-version", HeaderValue::from_static("2.0.0"));
        headers.insert(
            "csrf-token",
            HeaderValue::from_str(&session.csrf_token)
                .map_err(|e| SourceError::Decode(format!("invalid csrf token: {}", e)))?,
        );
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&session.cookie_header)
                .map_err(|e| SourceError::Decode(format!("invalid cookie header: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(url = %url, "GET");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    async fn post_feedback(&self, action: &str, urn: &str) -> Result<(), SourceError> {
        let url = format!("{}{}?action={}", self.base_url, FEEDBACK_PATH, action);
        let body = json!({
            "jobPostingRelevanceFeedbackUrn": urn,
            "channel": "JOB_SEARCH",
        });
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if matches!(status.as_u16(), 200 | 201 | 204) {
            Ok(())
        } else {
            Err(SourceError::Status(status.as_u16()))
        }
    }
}

fn feedback_urn(listing_id: &str) -> String {
    format!(
        "urn:li:fsd_jobPostingRelevanceFeedback:urn:li:fsd_jobPosting:{}",
        listing_id
    )
}

#[async_trait]
impl ListingSource for VoyagerClient {
    async fn search_listings(
        &self,
        query: &SearchQuery,
        offset: usize,
        page_size: usize,
    ) -> Result<Value, SourceError> {
        let path = format!(
            "{}?decorationId={}&count={}&q=jobSearch&query={}&servedEventEnabled=false&start={}",
            SEARCH_PATH,
            SEARCH_DECORATION,
            page_size,
            query.to_query_string(),
            offset
        );
        self.get_json(&path).await
    }

    async fn dismiss(&self, listing_id: &str, dismiss_token: Option<&str>) -> Result<(), SourceError> {
        let urn = dismiss_token
            .map(str::to_string)
            .unwrap_or_else(|| feedback_urn(listing_id));
        self.post_feedback("dismiss", &urn).await
    }

    async fn undo_dismiss(&self, listing_id: &str) -> Result<(), SourceError> {
        self.post_feedback("undoDismiss", &feedback_urn(listing_id)).await
    }

    async fn fetch_description(&self, listing_id: &str) -> Result<Option<String>, SourceError> {
        let urn = format!("urn:li:fsd_jobPosting:{}", listing_id);
        let path = format!(
            "{}?variables=(cardSectionTypes:List(JOB_DESCRIPTION_CARD),jobPostingUrn:{},includeSecondaryActionsV2:true)&queryId={}",
            GRAPHQL_PATH,
            urlencoding::encode(&urn),
            DESCRIPTION_QUERY_ID
        );
        let data = self.get_json(&path).await?;

        let target = format!("urn:li:fsd_jobDescription:{}", listing_id);
        let text = data
            .get("included")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|item| item.get("entityUrn").and_then(Value::as_str) == Some(target.as_str()))
            .filter_map(|item| item.pointer("/descriptionText/text").and_then(Value::as_str))
            .find(|text| !text.trim().is_empty())
            .map(str::to_string);
        if text.is_none() {
            warn!(listing_id, "Description not found in response");
        }
        Ok(text)
    }

    async fn resolve_region_id(&self, place: &str) -> Result<Option<String>, SourceError> {
        let path = format!(
            "{}?includeWebMetadata=true&variables=(keywords:{},query:(typeaheadFilterQuery:(geoSearchTypes:List({})),typeaheadUseCase:JOBS),type:GEO)&queryId={}",
            GRAPHQL_PATH,
            urlencoding::encode(place.trim()),
            GEO_TYPES,
            TYPEAHEAD_QUERY_ID
        );
        let data = self.get_json(&path).await?;
        let id = data
            .pointer("/data/data/searchDashReusableTypeaheadByType/elements")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|el| el.pointer("/target/*geo").and_then(Value::as_str))
            .filter_map(|urn| urn.rsplit(':').next())
            .find(|id| !id.is_empty())
            .map(str::to_string);
        Ok(id)
    }

    async fn fetch_sub_region_candidates(
        &self,
        region_id: &str,
    ) -> Result<Vec<GeoCandidate>, SourceError> {
        let path = format!(
            "{}?decorationId={}&q=filters&query=(origin:JOB_SEARCH_PAGE_JOB_FILTER,locationUnion:(geoId:{}),selectedFilters:(sortBy:List(R)),spellCorrectionEnabled:true)",
            CLUSTERS_PATH, CLUSTERS_DECORATION, region_id
        );
        let data = self.get_json(&path).await?;

        let mut candidates = Vec::new();
        let elements = data
            .pointer("/data/elements")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for element in elements {
            let filters = element
                .get("secondaryFilterGroups")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|group| group.get("filters").and_then(Value::as_array))
                .flatten()
                .filter(|f| f.get("parameterName").and_then(Value::as_str) == Some("populatedPlace"));
            for filter in filters {
                let values = filter
                    .get("secondaryFilterValues")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten();
                for value in values {
                    let id = value.get("value").and_then(Value::as_str);
                    let name = value.get("displayName").and_then(Value::as_str);
                    if let (Some(id), Some(name)) = (id, name) {
                        candidates.push(GeoCandidate {
                            id: id.to_string(),
                            name: name.to_string(),
                            corrected_name: None,
                            region_ids: vec![region_id.to_string()],
                        });
                    }
                }
            }
        }
        debug!(region_id, count = candidates.len(), "Fetched sub-region candidates");
        Ok(candidates)
    }
}
