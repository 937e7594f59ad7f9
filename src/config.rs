use anyhow::{Context, Result};
use std::time::Duration;

use crate::infra::{mbta, nominatim};

/// Runtime settings, read from the environment (after `.env` is loaded).
///
/// Every variable is optional:
///
/// | variable                 | default                               |
/// |--------------------------|---------------------------------------|
/// | `TRANSIT_API_URL`        | `https://api-v3.mbta.com`             |
/// | `TRANSIT_API_KEY`        | unset (sent as `x-api-key` when set)  |
/// | `GEOCODER_URL`           | `https://nominatim.openstreetmap.org` |
/// | `GEOCODER_USER_AGENT`    | `fleet_sync/<version>`                |
/// | `GEOCODER_LANGUAGE`      | `id`                                  |
/// | `VEHICLE_PAGE_LIMIT`     | `100`                                 |
/// | `VEHICLE_FRESHNESS_SECS` | `60`                                  |
/// | `HTTP_TIMEOUT_SECS`      | `30`                                  |
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_language: String,
    pub vehicle_limit: usize,
    pub freshness: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let number = |name: &str, default: u64| -> Result<u64> {
            match var(name) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{name} must be a non-negative integer, got '{raw}'")),
                None => Ok(default),
            }
        };

        let vehicle_limit = number("VEHICLE_PAGE_LIMIT", 100)?;
        if vehicle_limit == 0 {
            anyhow::bail!("VEHICLE_PAGE_LIMIT must be at least 1");
        }

        Ok(Self {
            api_url: var("TRANSIT_API_URL").unwrap_or_else(|| mbta::DEFAULT_BASE_URL.to_string()),
            api_key: var("TRANSIT_API_KEY"),
            geocoder_url: var("GEOCODER_URL")
                .unwrap_or_else(|| nominatim::DEFAULT_BASE_URL.to_string()),
            geocoder_user_agent: var("GEOCODER_USER_AGENT")
                .unwrap_or_else(|| format!("fleet_sync/{}", env!("CARGO_PKG_VERSION"))),
            geocoder_language: var("GEOCODER_LANGUAGE").unwrap_or_else(|| "id".to_string()),
            vehicle_limit: usize::try_from(vehicle_limit)?,
            freshness: Duration::from_secs(number("VEHICLE_FRESHNESS_SECS", 60)?),
            http_timeout: Duration::from_secs(number("HTTP_TIMEOUT_SECS", 30)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.api_url, "https://api-v3.mbta.com");
        assert_eq!(config.api_key, None);
        assert_eq!(config.geocoder_language, "id");
        assert!(config.geocoder_user_agent.starts_with("fleet_sync/"));
        assert_eq!(config.vehicle_limit, 100);
        assert_eq!(config.freshness, Duration::from_secs(60));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("TRANSIT_API_URL", "http://localhost:8080"),
            ("TRANSIT_API_KEY", "secret"),
            ("GEOCODER_LANGUAGE", "en"),
            ("VEHICLE_PAGE_LIMIT", "250"),
            ("VEHICLE_FRESHNESS_SECS", " 15 "),
        ])
        .unwrap();
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.geocoder_language, "en");
        assert_eq!(config.vehicle_limit, 250);
        assert_eq!(config.freshness, Duration::from_secs(15));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config(&[("TRANSIT_API_KEY", ""), ("HTTP_TIMEOUT_SECS", "  ")]).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = config(&[("VEHICLE_FRESHNESS_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("VEHICLE_FRESHNESS_SECS"));
        assert!(config(&[("VEHICLE_PAGE_LIMIT", "0")]).is_err());
    }
}
