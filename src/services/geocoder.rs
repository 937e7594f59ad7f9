use async_trait::async_trait;

use crate::error::FetchError;

/// Reverse geocoding: a coordinate to a short human-readable place name.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the lookup succeeded but yielded nothing usable; the
    /// caller shows the raw coordinates instead.
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, FetchError>;
}
