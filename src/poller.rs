//! Fleet snapshot polling and enrichment.
//!
//! The snapshot is replaced wholesale on every successful fetch. Reads serve
//! the last known snapshot; a read past the freshness window starts a
//! background refetch. Failed fetches are never retried automatically: the
//! error is kept until the next manual [`VehiclePoller::refetch`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::models::{
    DEFAULT_ROUTE_COLOR, DEFAULT_ROUTE_TEXT_COLOR, Included, RouteRecord, TripRecord,
    VehicleDocument, VehicleRecord, VehicleStatus, non_empty,
};
use crate::schedule::lock;
use crate::services::TransitApi;

pub const VEHICLE_FRESHNESS: Duration = Duration::from_secs(60);

/// Joins each vehicle with its side-loaded route and trip.
///
/// Unknown or missing relationships leave the derived fields empty (colors
/// fall back to the defaults); they never drop the vehicle.
pub fn enrich(document: VehicleDocument) -> Vec<VehicleRecord> {
    let mut routes: HashMap<String, RouteRecord> = HashMap::new();
    let mut trips: HashMap<String, TripRecord> = HashMap::new();
    for entity in document.included {
        match entity {
            Included::Route(route) => {
                routes.insert(route.id.clone(), route.into());
            }
            Included::Trip(trip) => {
                trips.insert(trip.id.clone(), trip.into());
            }
            Included::Other => {}
        }
    }

    document
        .data
        .into_iter()
        .map(|vehicle| {
            let route_id = vehicle.relationships.route_id().map(str::to_string);
            let trip_id = vehicle.relationships.trip_id().map(str::to_string);
            let route = route_id.as_deref().and_then(|id| routes.get(id));
            let trip = trip_id.as_deref().and_then(|id| trips.get(id));
            let attrs = vehicle.attributes;

            VehicleRecord {
                id: vehicle.id,
                label: non_empty(attrs.label),
                status: attrs
                    .current_status
                    .unwrap_or_else(|| VehicleStatus::Other(String::new())),
                latitude: attrs.latitude,
                longitude: attrs.longitude,
                bearing: attrs.bearing,
                speed: attrs.speed,
                occupancy: non_empty(attrs.occupancy_status),
                updated_at: attrs.updated_at,
                trip_headsign: trip.and_then(|t| t.headsign.clone()),
                route_name: route.and_then(|r| r.name()).map(str::to_string),
                route_color: route
                    .and_then(|r| r.color.clone())
                    .unwrap_or_else(|| DEFAULT_ROUTE_COLOR.to_string()),
                route_text_color: route
                    .and_then(|r| r.text_color.clone())
                    .unwrap_or_else(|| DEFAULT_ROUTE_TEXT_COLOR.to_string()),
                route_id,
                trip_id,
            }
        })
        .collect()
}

/// Last failed fetch, kept for the error view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollError {
    pub message: String,
    pub user_message: &'static str,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

impl From<&FetchError> for PollError {
    fn from(e: &FetchError) -> Self {
        Self {
            message: e.to_string(),
            user_message: e.user_message(),
            retryable: e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    pub vehicles: Arc<Vec<VehicleRecord>>,
    pub fetched_at: Option<Instant>,
    pub is_stale: bool,
    pub is_refreshing: bool,
    pub error: Option<PollError>,
}

impl FleetSnapshot {
    /// No snapshot yet and the first request is still out.
    pub fn is_loading(&self) -> bool {
        self.fetched_at.is_none() && self.is_refreshing
    }
}

struct PollState {
    vehicles: Arc<Vec<VehicleRecord>>,
    fetched_at: Option<Instant>,
    /// Id of the most recently issued request.
    issued: u64,
    /// Id of the newest request whose outcome was applied.
    settled: u64,
    in_flight: usize,
    error: Option<PollError>,
}

struct Inner {
    api: Arc<dyn TransitApi>,
    freshness: Duration,
    state: Mutex<PollState>,
}

#[derive(Clone)]
pub struct VehiclePoller {
    inner: Arc<Inner>,
}

impl VehiclePoller {
    pub fn new(api: Arc<dyn TransitApi>, freshness: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                freshness,
                state: Mutex::new(PollState {
                    vehicles: Arc::new(Vec::new()),
                    fetched_at: None,
                    issued: 0,
                    settled: 0,
                    in_flight: 0,
                    error: None,
                }),
            }),
        }
    }

    /// Fetches a fresh snapshot now. On error nothing is committed.
    pub async fn fetch(&self) -> Result<Arc<Vec<VehicleRecord>>, FetchError> {
        let request = self.begin(&mut lock(&self.inner.state));
        self.run(request).await
    }

    /// Manual retry after an error; same as [`fetch`](Self::fetch).
    pub async fn refetch(&self) -> Result<Arc<Vec<VehicleRecord>>, FetchError> {
        self.fetch().await
    }

    /// Returns the last known snapshot, starting a background refetch if it
    /// is past the freshness window and no request is out.
    pub fn read(&self) -> FleetSnapshot {
        let mut state = lock(&self.inner.state);
        let stale = self.is_stale(&state);

        if stale && state.in_flight == 0 && state.error.is_none() {
            let request = self.begin(&mut state);
            let poller = self.clone();
            tokio::spawn(async move {
                // Errors are recorded on the snapshot.
                let _ = poller.run(request).await;
            });
        }

        FleetSnapshot {
            vehicles: state.vehicles.clone(),
            fetched_at: state.fetched_at,
            is_stale: stale,
            is_refreshing: state.in_flight > 0,
            error: state.error.clone(),
        }
    }

    fn is_stale(&self, state: &PollState) -> bool {
        state
            .fetched_at
            .is_none_or(|at| at.elapsed() >= self.inner.freshness)
    }

    fn begin(&self, state: &mut PollState) -> Request {
        state.issued += 1;
        state.in_flight += 1;
        Request {
            id: state.issued,
            poller: self.inner.clone(),
        }
    }

    async fn run(&self, request: Request) -> Result<Arc<Vec<VehicleRecord>>, FetchError> {
        debug!(request = request.id, "Fetching vehicles");
        let result = self.inner.api.vehicles().await.map(|doc| Arc::new(enrich(doc)));

        let mut state = lock(&self.inner.state);
        let current = request.id > state.settled;
        if current {
            state.settled = request.id;
        }

        match result {
            Ok(vehicles) => {
                if current {
                    info!(count = vehicles.len(), "Vehicle snapshot updated");
                    state.vehicles = vehicles.clone();
                    state.fetched_at = Some(Instant::now());
                    state.error = None;
                } else {
                    debug!(request = request.id, "Discarding snapshot from superseded request");
                }
                Ok(vehicles)
            }
            Err(e) => {
                warn!(error = %e, request = request.id, "Vehicle fetch failed");
                if current {
                    state.error = Some(PollError::from(&e));
                }
                Err(e)
            }
        }
    }
}

/// An issued vehicle request; releases its in-flight slot when dropped.
struct Request {
    id: u64,
    poller: Arc<Inner>,
}

impl Drop for Request {
    fn drop(&mut self) {
        let mut state = lock(&self.poller.state);
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}
