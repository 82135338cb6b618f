use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tryon_contracts::models::DEFAULT_EDIT_MODEL;
use tryon_contracts::proxies::{default_proxies, parse_proxy_list, ProxyList};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const FETCH_TIMEOUT_SECS: (u64, u64, u64) = (15, 1, 120);
const REQUEST_TIMEOUT_SECS: (u64, u64, u64) = (90, 15, 300);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_base: String,
    pub model: String,
    pub proxies: ProxyList,
    pub fetch_timeout: Duration,
    pub request_timeout: Duration,
    pub home: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_EDIT_MODEL.to_string(),
            proxies: default_proxies(),
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECS.0),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS.0),
            home: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let proxies = match lookup("TRYON_PROXIES") {
            Some(raw) => parse_proxy_list(&raw).context("invalid TRYON_PROXIES")?,
            None => defaults.proxies,
        };
        Ok(Self {
            api_base: lookup("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            model: lookup("TRYON_IMAGE_MODEL").unwrap_or(defaults.model),
            proxies,
            fetch_timeout: seconds_in_range(lookup("TRYON_FETCH_TIMEOUT_SECS"), FETCH_TIMEOUT_SECS),
            request_timeout: seconds_in_range(
                lookup("TRYON_REQUEST_TIMEOUT_SECS"),
                REQUEST_TIMEOUT_SECS,
            ),
            home: lookup("TRYON_HOME").map(PathBuf::from),
        })
    }
}

/// Unparseable values fall back to the default; parsed ones are clamped.
fn seconds_in_range(raw: Option<String>, (default, min, max): (u64, u64, u64)) -> Duration {
    let parsed = raw.and_then(|text| text.trim().parse::<u64>().ok());
    Duration::from_secs(parsed.unwrap_or(default).clamp(min, max))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
