use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.linkedin.com";

/// Authenticated session material for the Listing Source.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_header: String,
    pub csrf_token: String,
}

impl SessionConfig {
    pub fn from_cookie_string(raw: &str) -> Result<Self> {
        let raw = raw.trim().trim_matches('"');
        let mut cookies: HashMap<&str, &str> = HashMap::new();
        for item in raw.split(';') {
            if let Some((k, v)) = item.trim().split_once('=') {
                cookies.insert(k.trim(), v.trim().trim_matches('"'));
            }
        }

        let csrf_token = cookies
            .get("JSESSIONID")
            .map(|v| v.to_string())
            .ok_or_else(|| anyhow!("JSESSIONID not found in cookie string; requests would be rejected"))?;

        Ok(Self {
            cookie_header: raw.to_string(),
            csrf_token,
        })
    }

    pub fn from_cookie_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cookie file: {}", path.display()))?;
        Self::from_cookie_string(&raw)
    }
}

/// Pipeline tunables. Defaults can be overridden through `SWEEP_*` variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub page_delay: Duration,
    pub action_delay: Duration,
    pub page_concurrency: usize,
    pub classify_concurrency: usize,
    pub similarity_threshold: f64,
    pub compare_descriptions: bool,
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub user: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_delay: Duration::from_millis(2000),
            action_delay: Duration::from_millis(1000),
            page_concurrency: 3,
            classify_concurrency: 2,
            similarity_threshold: 0.95,
            compare_descriptions: true,
            max_retries: 3,
            backoff_unit: Duration::from_secs(2),
            user: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("SWEEP_BASE_URL").unwrap_or(defaults.base_url),
            page_delay: env_millis("SWEEP_PAGE_DELAY_MS").unwrap_or(defaults.page_delay),
            action_delay: env_millis("SWEEP_ACTION_DELAY_MS").unwrap_or(defaults.action_delay),
            page_concurrency: env_parse::<usize>("SWEEP_PAGE_CONCURRENCY")
                .unwrap_or(defaults.page_concurrency)
                .clamp(2, 5),
            classify_concurrency: env_parse::<usize>("SWEEP_CLASSIFY_CONCURRENCY")
                .unwrap_or(defaults.classify_concurrency)
                .max(1),
            similarity_threshold: env_parse::<f64>("SWEEP_SIMILARITY_THRESHOLD")
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(defaults.similarity_threshold),
            compare_descriptions: std::env::var("SWEEP_COMPARE_DESCRIPTIONS")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "False"))
                .unwrap_or(defaults.compare_descriptions),
            max_retries: defaults.max_retries,
            backoff_unit: defaults.backoff_unit,
            user: std::env::var("SWEEP_USER").ok().filter(|u| !u.trim().is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
