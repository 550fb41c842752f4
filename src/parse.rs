//! Defensive parsing of search result batches.
//!
//! The search payload is undocumented and its shape drifts, so every field is
//! read through a chain of fallbacks. A missing field never fails a listing;
//! it just ends up empty.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::models::Listing;

const JOB_VIEW_URL: &str = "https://www.linkedin.com/jobs/view/";

/// Millisecond epoch values in this range are taken as timestamps (2001..2100).
const MIN_PLAUSIBLE_MS: i64 = 1_000_000_000_000;
const MAX_PLAUSIBLE_MS: i64 = 4_102_444_800_000;
const MAX_SCAN_DEPTH: usize = 6;

#[derive(Debug, Default)]
pub struct ParsedPage {
    pub listings: Vec<Listing>,
    pub total: Option<usize>,
}

/// The entities one job card is spread across in the payload.
struct CardView<'a> {
    card: &'a Value,
    posting: Option<&'a Value>,
    seeker_state: Option<&'a Value>,
    feedback: Option<&'a Value>,
}

type TimestampStrategy = fn(&CardView<'_>) -> Option<DateTime<Utc>>;

/// Listing-time sources, highest priority first.
const LISTED_AT_STRATEGIES: &[(&str, TimestampStrategy)] = &[
    ("footer_listed_date", footer_listed_date),
    ("posting_listed_at", posting_listed_at),
    ("posting_original_listed_at", posting_original_listed_at),
    ("card_listed_at", card_listed_at),
    ("deep_scan", deep_scan),
];

pub fn parse_page(payload: &Value) -> ParsedPage {
    let included = payload
        .get("included")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let urn_map: HashMap<&str, &Value> = included
        .iter()
        .filter_map(|item| item.get("entityUrn").and_then(Value::as_str).map(|urn| (urn, item)))
        .collect();

    let elements = payload
        .pointer("/data/elements")
        .or_else(|| payload.get("elements"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let listings = elements
        .iter()
        .filter_map(|element| card_for_element(element, &urn_map))
        .filter_map(|card| parse_card(card, &urn_map))
        .filter(|listing| seen.insert(listing.id.clone()))
        .collect();

    ParsedPage {
        listings,
        total: parse_total(payload),
    }
}

pub fn parse_total(payload: &Value) -> Option<usize> {
    payload
        .pointer("/data/paging/total")
        .or_else(|| payload.pointer("/paging/total"))
        .and_then(Value::as_u64)
        .map(|t| t as usize)
}

fn card_for_element<'a>(element: &'a Value, urn_map: &HashMap<&str, &'a Value>) -> Option<&'a Value> {
    let union = element.get("jobCardUnion")?;
    if let Some(urn) = union.get("*jobPostingCard").and_then(Value::as_str) {
        return urn_map.get(urn).copied();
    }
    // Some payload variants inline the card instead of referencing it.
    union.get("jobPostingCard")
}

fn parse_card(card: &Value, urn_map: &HashMap<&str, &Value>) -> Option<Listing> {
    let id = listing_id(card)?;

    let posting = card
        .get("*jobPosting")
        .and_then(Value::as_str)
        .or_else(|| card.get("jobPostingUrn").and_then(Value::as_str))
        .and_then(|urn| urn_map.get(urn).copied());
    let seeker_state = urn_map
        .get(format!("urn:li:fsd_jobSeekerJobState:{}", id).as_str())
        .copied();
    let dismiss_token = dismiss_token(card);
    let feedback = dismiss_token
        .as_deref()
        .and_then(|urn| urn_map.get(urn).copied());

    let view = CardView {
        card,
        posting,
        seeker_state,
        feedback,
    };

    let footer_types: Vec<&str> = footer_items(card)
        .filter_map(|item| item.get("type").and_then(Value::as_str))
        .collect();
    let states = seeker_states(&view);

    Some(Listing {
        title: text_at(card, "title")
            .or_else(|| posting.and_then(|p| p.get("title")).and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "Unknown".to_string()),
        company: text_at(card, "primaryDescription").unwrap_or_else(|| "Unknown".to_string()),
        location: text_at(card, "secondaryDescription").unwrap_or_else(|| "Unknown".to_string()),
        natively_dismissed: natively_dismissed(&view, &states),
        is_reposted: posting
            .and_then(|p| p.get("repostedJob"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_easy_apply: footer_types.contains(&"EASY_APPLY_TEXT"),
        is_early_applicant: footer_items(card).any(|item| {
            item.get("type").and_then(Value::as_str) == Some("APPLICANT_COUNT_TEXT")
                && text_at(item, "text")
                    .map(|t| t.to_lowercase().contains("early applicant"))
                    .unwrap_or(false)
        }),
        is_actively_reviewing: text_at(card.get("relevanceInsight").unwrap_or(&Value::Null), "text")
            .map(|t| t.to_lowercase().contains("actively reviewing"))
            .unwrap_or(false),
        is_applied: states.contains(&"APPLIED"),
        is_viewed: states.contains(&"VIEWED"),
        listed_at: listed_at(&view),
        job_url: format!("{}{}", JOB_VIEW_URL, id),
        company_url: company_url(card),
        dismiss_token,
        id,
    })
}

/// Numeric id from the posting urn, falling back to the card urn's tuple.
fn listing_id(card: &Value) -> Option<String> {
    let from_posting = ["jobPostingUrn", "*jobPosting"]
        .iter()
        .filter_map(|key| card.get(*key).and_then(Value::as_str))
        .filter_map(id_from_urn)
        .next();
    from_posting.or_else(|| card.get("entityUrn").and_then(Value::as_str).and_then(id_from_urn))
}

pub fn id_from_urn(urn: &str) -> Option<String> {
    let tail = match urn.find('(') {
        Some(open) => urn[open + 1..].split([',', ')']).next().unwrap_or(""),
        None => urn.rsplit(':').next().unwrap_or(""),
    };
    let tail = tail.trim();
    if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_alphanumeric()) {
        None
    } else {
        Some(tail.to_string())
    }
}

fn text_at(value: &Value, key: &str) -> Option<String> {
    let field = value.get(key)?;
    let text = match field {
        Value::String(s) => s.as_str(),
        other => other.get("text").and_then(Value::as_str)?,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn footer_items(card: &Value) -> impl Iterator<Item = &Value> {
    card.get("footerItems")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn seeker_states<'a>(view: &CardView<'a>) -> Vec<&'a str> {
    view.seeker_state
        .and_then(|s| s.get("jobSeekerJobStateActions"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|action| action.get("jobSeekerJobStateEnums").and_then(Value::as_str))
        .collect()
}

fn dismiss_token(card: &Value) -> Option<String> {
    card.get("primaryActionsUnions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|action| action.get("dismissJobAction"))
        .filter_map(|dismiss| dismiss.get("jobPostingRelevanceFeedbackUrn"))
        .filter_map(Value::as_str)
        .map(str::to_string)
        .next()
}

/// Any one positive signal is enough; an explicit `false` elsewhere does not veto it.
fn natively_dismissed(view: &CardView, states: &[&str]) -> bool {
    let from_feedback = view
        .feedback
        .and_then(|f| f.get("dismissed"))
        .and_then(Value::as_bool);
    let from_action = view
        .card
        .get("primaryActionsUnions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|action| action.pointer("/dismissJobAction/dismissed"))
        .filter_map(Value::as_bool)
        .any(|dismissed| dismissed);
    from_feedback == Some(true) || from_action || states.contains(&"DISMISSED")
}

/// Company page URL from the logo link, without the `/life` tab suffix.
fn company_url(card: &Value) -> Option<String> {
    let target = card
        .pointer("/logo/actionTarget")
        .and_then(Value::as_str)?
        .trim();
    if target.is_empty() {
        return None;
    }
    let target = target.split('?').next().unwrap_or(target);
    let target = target.strip_suffix('/').unwrap_or(target);
    let target = target.strip_suffix("/life").unwrap_or(target);
    Some(target.to_string())
}

fn listed_at(view: &CardView) -> Option<DateTime<Utc>> {
    LISTED_AT_STRATEGIES
        .iter()
        .find_map(|(_, strategy)| strategy(view))
}

fn from_millis(value: &Value) -> Option<DateTime<Utc>> {
    let ms = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    if !(MIN_PLAUSIBLE_MS..=MAX_PLAUSIBLE_MS).contains(&ms) {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

fn footer_listed_date(view: &CardView) -> Option<DateTime<Utc>> {
    footer_items(view.card)
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("LISTED_DATE"))
        .filter_map(|item| item.get("timeAt"))
        .find_map(from_millis)
}

fn posting_listed_at(view: &CardView) -> Option<DateTime<Utc>> {
    view.posting?.get("listedAt").and_then(from_millis)
}

fn posting_original_listed_at(view: &CardView) -> Option<DateTime<Utc>> {
    view.posting?.get("originalListedAt").and_then(from_millis)
}

fn card_listed_at(view: &CardView) -> Option<DateTime<Utc>> {
    view.card.get("listedAt").and_then(from_millis)
}

fn deep_scan(view: &CardView) -> Option<DateTime<Utc>> {
    scan_for_millis(view.card, 0).or_else(|| view.posting.and_then(|p| scan_for_millis(p, 0)))
}

fn scan_for_millis(value: &Value, depth: usize) -> Option<DateTime<Utc>> {
    if depth > MAX_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Number(_) => from_millis(value),
        Value::Array(items) => items.iter().find_map(|v| scan_for_millis(v, depth + 1)),
        Value::Object(map) => map.values().find_map(|v| scan_for_millis(v, depth + 1)),
        _ => None,
    }
}
