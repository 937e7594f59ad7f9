use async_trait::async_trait;
use reqwest::Request;
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::fetch::{HttpClient, fetch_bytes, get_request};
use crate::models::{RouteDocument, RouteRecord, TripDocument, TripRecord, VehicleDocument};
use crate::paging::FetchCursor;
use crate::services::{RouteKey, TransitApi};

pub const DEFAULT_BASE_URL: &str = "https://api-v3.mbta.com";

const JSON_API: &str = "application/vnd.api+json";

/// JSON:API transit client (MBTA V3 dialect).
pub struct MbtaClient<C> {
    http: C,
    base_url: String,
    vehicle_limit: usize,
}

impl<C: HttpClient> MbtaClient<C> {
    pub fn new(http: C, base_url: &str, vehicle_limit: usize) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            vehicle_limit,
        }
    }

    fn request(&self, path: &str, query: &[(&str, String)]) -> Result<Request, FetchError> {
        get_request(
            &format!("{}/{path}", self.base_url),
            query,
            &[(ACCEPT, JSON_API)],
        )
    }

    fn vehicles_request(&self) -> Result<Request, FetchError> {
        self.request(
            "vehicles",
            &[
                ("page[limit]", self.vehicle_limit.to_string()),
                ("include", "route,trip".to_string()),
            ],
        )
    }

    fn routes_request(&self, cursor: FetchCursor) -> Result<Request, FetchError> {
        self.request(
            "routes",
            &[
                ("page[offset]", cursor.offset.to_string()),
                ("page[limit]", cursor.limit.to_string()),
                ("sort", "long_name".to_string()),
            ],
        )
    }

    fn trips_request(&self, cursor: FetchCursor, routes: &RouteKey) -> Result<Request, FetchError> {
        if routes.is_empty() {
            return Err(FetchError::MissingRouteFilter);
        }
        self.request(
            "trips",
            &[
                ("filter[route]", routes.joined()),
                ("page[offset]", cursor.offset.to_string()),
                ("page[limit]", cursor.limit.to_string()),
            ],
        )
    }
}

pub(crate) fn parse_vehicles(bytes: &[u8]) -> Result<VehicleDocument, FetchError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn parse_routes(bytes: &[u8]) -> Result<Vec<RouteRecord>, FetchError> {
    let document: RouteDocument = serde_json::from_slice(bytes)?;
    Ok(document.data.into_iter().map(RouteRecord::from).collect())
}

pub(crate) fn parse_trips(bytes: &[u8]) -> Result<Vec<TripRecord>, FetchError> {
    let document: TripDocument = serde_json::from_slice(bytes)?;
    Ok(document.data.into_iter().map(TripRecord::from).collect())
}

#[async_trait]
impl<C: HttpClient> TransitApi for MbtaClient<C> {
    #[tracing::instrument(skip(self))]
    async fn vehicles(&self) -> Result<VehicleDocument, FetchError> {
        let req = self.vehicles_request()?;
        // Vehicle polls are never superseded mid-flight; stale results are
        // dropped by the poller instead.
        let bytes = fetch_bytes(&self.http, req, &CancellationToken::new()).await?;
        parse_vehicles(&bytes)
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn routes(
        &self,
        cursor: FetchCursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<RouteRecord>, FetchError> {
        let req = self.routes_request(cursor)?;
        let bytes = fetch_bytes(&self.http, req, cancel).await?;
        parse_routes(&bytes)
    }

    #[tracing::instrument(skip(self, cancel), fields(routes = %routes))]
    async fn trips(
        &self,
        cursor: FetchCursor,
        routes: &RouteKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<TripRecord>, FetchError> {
        let req = self.trips_request(cursor, routes)?;
        let bytes = fetch_bytes(&self.http, req, cancel).await?;
        parse_trips(&bytes)
    }
}
