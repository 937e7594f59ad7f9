use async_trait::async_trait;
use reqwest::Request;
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::fetch::{HttpClient, fetch_json, get_request};
use crate::services::Geocoder;

pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

/// Nominatim answers `{"error": "Unable to geocode"}` with a 200 for points
/// it cannot resolve, so every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ReverseResponse {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub address: Option<AddressParts>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddressParts {
    pub road: Option<String>,
    pub pedestrian: Option<String>,
    pub suburb: Option<String>,
    pub village: Option<String>,
    pub city: Option<String>,
    pub town: Option<String>,
    pub county: Option<String>,
}

fn first_present<'a>(candidates: &[&'a Option<String>]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .filter_map(Option::as_deref)
        .map(str::trim)
        .find(|c| !c.is_empty())
}

/// Short place name: "street, locality" when a street-level name exists,
/// otherwise the first segment of the display name.
pub fn derive_address(response: &ReverseResponse) -> Option<String> {
    if let Some(parts) = &response.address {
        let street = first_present(&[&parts.road, &parts.pedestrian, &parts.suburb, &parts.village]);
        let locality = first_present(&[&parts.city, &parts.town, &parts.county]);
        match (street, locality) {
            (Some(street), Some(locality)) => return Some(format!("{street}, {locality}")),
            (Some(street), None) => return Some(street.to_string()),
            _ => {}
        }
    }

    response
        .display_name
        .as_deref()
        .and_then(|name| name.split(',').next())
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

pub struct NominatimClient<C> {
    http: C,
    base_url: String,
    user_agent: String,
    language: String,
}

impl<C: HttpClient> NominatimClient<C> {
    pub fn new(http: C, base_url: &str, user_agent: &str, language: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            language: language.to_string(),
        }
    }

    fn reverse_request(&self, lat: f64, lon: f64) -> Result<Request, FetchError> {
        get_request(
            &format!("{}/reverse", self.base_url),
            &[
                ("format", "json".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("zoom", "18".to_string()),
                ("addressdetails", "1".to_string()),
            ],
            &[
                (USER_AGENT, self.user_agent.as_str()),
                (ACCEPT_LANGUAGE, self.language.as_str()),
            ],
        )
    }
}

#[async_trait]
impl<C: HttpClient> Geocoder for NominatimClient<C> {
    #[tracing::instrument(skip(self))]
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, FetchError> {
        let req = self.reverse_request(lat, lon)?;
        let response: ReverseResponse =
            fetch_json(&self.http, req, &CancellationToken::new()).await?;
        Ok(derive_address(&response))
    }
}
