//! In-memory stand-ins for the upstream services, recording every call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::models::{Direction, RouteRecord, TripRecord, VehicleDocument};
use crate::paging::FetchCursor;
use crate::services::{Geocoder, RouteKey, TransitApi};

fn unavailable() -> FetchError {
    FetchError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: String::new(),
    }
}

pub(crate) fn route(id: &str, name: &str) -> RouteRecord {
    RouteRecord {
        id: id.to_string(),
        long_name: Some(name.to_string()),
        short_name: None,
        route_type: Some(3),
        description: None,
        color: None,
        text_color: None,
    }
}

pub(crate) fn trip(id: &str, route_id: &str, headsign: &str, direction: Direction) -> TripRecord {
    TripRecord {
        id: id.to_string(),
        headsign: Some(headsign.to_string()).filter(|h| !h.is_empty()),
        direction,
        route_id: Some(route_id.to_string()),
    }
}

pub(crate) fn vehicle_json(id: &str, route_id: Option<&str>, trip_id: Option<&str>) -> Value {
    let mut relationships = serde_json::Map::new();
    if let Some(route_id) = route_id {
        relationships.insert("route".into(), json!({"data": {"id": route_id, "type": "route"}}));
    }
    if let Some(trip_id) = trip_id {
        relationships.insert("trip".into(), json!({"data": {"id": trip_id, "type": "trip"}}));
    }
    json!({
        "id": id,
        "type": "vehicle",
        "attributes": {
            "label": format!("Bus {id}"),
            "current_status": "IN_TRANSIT_TO",
            "latitude": 42.3601,
            "longitude": -71.0589,
            "bearing": 90,
            "speed": null,
            "occupancy_status": "MANY_SEATS_AVAILABLE",
            "updated_at": "2024-05-20T10:30:00-04:00"
        },
        "relationships": relationships
    })
}

pub(crate) struct FakeTransit {
    routes: Vec<RouteRecord>,
    trips: Vec<TripRecord>,
    trip_delay: Duration,
    vehicles: Mutex<Value>,
    vehicle_delays: Mutex<VecDeque<Duration>>,
    fail_routes: AtomicBool,
    fail_vehicles: AtomicBool,
    route_calls: Mutex<Vec<FetchCursor>>,
    trip_calls: Mutex<Vec<(String, FetchCursor)>>,
    vehicle_calls: AtomicUsize,
}

impl FakeTransit {
    pub(crate) fn new() -> Self {
        Self {
            routes: Vec::new(),
            trips: Vec::new(),
            trip_delay: Duration::ZERO,
            vehicles: Mutex::new(json!({"data": [], "included": []})),
            vehicle_delays: Mutex::new(VecDeque::new()),
            fail_routes: AtomicBool::new(false),
            fail_vehicles: AtomicBool::new(false),
            route_calls: Mutex::new(Vec::new()),
            trip_calls: Mutex::new(Vec::new()),
            vehicle_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_routes(count: usize) -> Self {
        Self {
            routes: (0..count)
                .map(|i| route(&format!("route-{i}"), &format!("Route {i}")))
                .collect(),
            ..Self::new()
        }
    }

    pub(crate) fn with_trips(trips: Vec<TripRecord>) -> Self {
        Self {
            trips,
            ..Self::new()
        }
    }

    pub(crate) fn trip_delay(mut self, delay: Duration) -> Self {
        self.trip_delay = delay;
        self
    }

    pub(crate) fn set_vehicles(&self, document: Value) {
        *self.vehicles.lock().unwrap() = document;
    }

    /// Delays applied to successive vehicle requests, in order.
    pub(crate) fn queue_vehicle_delays(&self, delays: &[Duration]) {
        self.vehicle_delays.lock().unwrap().extend(delays);
    }

    pub(crate) fn fail_next_routes(&self) {
        self.fail_routes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_vehicles(&self) {
        self.fail_vehicles.store(true, Ordering::SeqCst);
    }

    pub(crate) fn route_calls(&self) -> Vec<FetchCursor> {
        self.route_calls.lock().unwrap().clone()
    }

    pub(crate) fn trip_calls(&self) -> Vec<(String, FetchCursor)> {
        self.trip_calls.lock().unwrap().clone()
    }

    pub(crate) fn vehicle_calls(&self) -> usize {
        self.vehicle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransitApi for FakeTransit {
    async fn vehicles(&self) -> Result<VehicleDocument, FetchError> {
        self.vehicle_calls.fetch_add(1, Ordering::SeqCst);
        // Snapshot the payload at request time, as a real server would.
        let document = self.vehicles.lock().unwrap().clone();
        let delay = self.vehicle_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_vehicles.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(serde_json::from_value(document)?)
    }

    async fn routes(
        &self,
        cursor: FetchCursor,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RouteRecord>, FetchError> {
        self.route_calls.lock().unwrap().push(cursor);
        if self.fail_routes.swap(false, Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self
            .routes
            .iter()
            .skip(cursor.offset)
            .take(cursor.limit)
            .cloned()
            .collect())
    }

    async fn trips(
        &self,
        cursor: FetchCursor,
        routes: &RouteKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<TripRecord>, FetchError> {
        if routes.is_empty() {
            return Err(FetchError::MissingRouteFilter);
        }
        self.trip_calls.lock().unwrap().push((routes.joined(), cursor));
        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(self.trip_delay) => {}
        }
        Ok(self
            .trips
            .iter()
            .filter(|t| {
                t.route_id
                    .as_ref()
                    .is_some_and(|r| routes.ids().contains(r))
            })
            .skip(cursor.offset)
            .take(cursor.limit)
            .cloned()
            .collect())
    }
}

pub(crate) struct FakeGeocoder {
    answer: Option<String>,
    delay: Duration,
    failures: AtomicUsize,
    calls: Mutex<Vec<(f64, f64)>>,
}

impl FakeGeocoder {
    pub(crate) fn answering(answer: Option<&str>) -> Self {
        Self {
            answer: answer.map(str::to_string),
            delay: Duration::from_millis(50),
            failures: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `count` lookups with a 503.
    pub(crate) fn failing_first(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(f64, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse(&self, lat: f64, lon: f64) -> Result<Option<String>, FetchError> {
        self.calls.lock().unwrap().push((lat, lon));
        tokio::time::sleep(self.delay).await;
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(unavailable());
        }
        Ok(self.answer.clone())
    }
}
