use std::time::Duration;

use async_trait::async_trait;
use common::config::GeocodingConfig;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{Result, StoreError},
    model::Coordinates,
};

/// Turns a free-text address into a point. Failures are always
/// `StoreError::LocationUnavailable`; callers never get a guessed point.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<Coordinates>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    search_url: Url,
    country_codes: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let base = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(|e| StoreError::Config(format!("invalid geocoding url: {}", e)))?;
        let search_url = base
            .join("search")
            .map_err(|e| StoreError::Config(format!("invalid geocoding url: {}", e)))?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build geocoding client: {}", e)))?;

        Ok(Self {
            client,
            search_url,
            country_codes: config.country_codes.clone(),
        })
    }

    fn unavailable(address: &str, reason: impl std::fmt::Display) -> StoreError {
        warn!(address = %address, reason = %reason, "Geocoding failed");
        StoreError::LocationUnavailable(address.to_string())
    }
}

pub(crate) fn parse_place(lat: &str, lon: &str) -> Option<Coordinates> {
    let point = Coordinates::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?);
    point.is_valid().then_some(point)
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn resolve(&self, address: &str) -> Result<Coordinates> {
        let mut url = self.search_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("format", "json")
                .append_pair("limit", "1")
                .append_pair("q", address);
            if let Some(codes) = &self.country_codes {
                query.append_pair("countrycodes", codes);
            }
        }

        debug!(address = %address, "Resolving address");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::unavailable(address, e))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(address, response.status()));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| Self::unavailable(address, e))?;

        places
            .first()
            .and_then(|place| parse_place(&place.lat, &place.lon))
            .ok_or_else(|| Self::unavailable(address, "no match"))
    }
}
