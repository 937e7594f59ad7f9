//! Trait and types for the transit-agency collection endpoints.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::models::{RouteRecord, TripRecord, VehicleDocument};
use crate::paging::FetchCursor;

/// Normalized set of selected route ids: deduplicated and sorted, so that
/// `["B", "A"]` and `["A", "B"]` name the same trip query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RouteKey(Vec<String>);

impl RouteKey {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        Self(ids)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.0
    }

    /// Comma-joined form used as the `filter[route]` query value.
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Abstraction over the transit-agency API.
#[async_trait]
pub trait TransitApi: Send + Sync {
    /// Full fleet snapshot with related routes and trips side-loaded.
    async fn vehicles(&self) -> Result<VehicleDocument, FetchError>;

    /// One page of the route catalog, ordered by display name.
    async fn routes(
        &self,
        cursor: FetchCursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<RouteRecord>, FetchError>;

    /// One page of trips for `routes`.
    ///
    /// Implementations must return [`FetchError::MissingRouteFilter`] without
    /// issuing a request when `routes` is empty.
    async fn trips(
        &self,
        cursor: FetchCursor,
        routes: &RouteKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<TripRecord>, FetchError>;
}
