//! Trip loader, parameterized by the selected routes.
//!
//! The upstream API refuses unfiltered trip queries, so with no routes
//! selected the loader is disabled and never fetches. Route selections are
//! debounced; once a selection settles and differs from the loaded one, the
//! accumulated pages are discarded, any in-flight page is cancelled, and the
//! first page for the new routes is requested.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::filter::{FilterOption, destination_options};
use crate::models::TripRecord;
use crate::paging::{FetchCursor, LoadOutcome, PageSource, PagedLoader};
use crate::schedule::{Debouncer, ThrottlePolicy, lock};
use crate::services::{RouteKey, TransitApi};

pub const TRIP_PAGE_SIZE: usize = 50;
pub const TRIP_DEBOUNCE: Duration = Duration::from_millis(500);
pub const TRIP_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
pub const TRIP_LOAD_THROTTLE: ThrottlePolicy = ThrottlePolicy {
    base: Duration::from_millis(100),
    step: Duration::from_millis(50),
    cap: Duration::from_secs(2),
};

struct TripPages(Arc<dyn TransitApi>);

#[async_trait]
impl PageSource<RouteKey, TripRecord> for TripPages {
    async fn fetch_page(
        &self,
        key: &RouteKey,
        cursor: FetchCursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<TripRecord>, FetchError> {
        self.0.trips(cursor, key, cancel).await
    }

    fn is_enabled(&self, key: &RouteKey) -> bool {
        !key.is_empty()
    }
}

struct Inner {
    pages: PagedLoader<RouteKey, TripRecord>,
    debounce: Debouncer<()>,
    throttle: ThrottlePolicy,
    /// Latest selection, settled or not.
    requested: Mutex<RouteKey>,
}

impl Inner {
    /// Switches the accumulation to `key` and starts its first page.
    fn apply(self: &Arc<Self>, key: RouteKey) {
        if self.pages.key() == key {
            return;
        }
        info!(routes = %key, "Trip route filter settled");
        self.pages.reset(key);
        if !self.pages.is_enabled() {
            return;
        }

        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.pages.load_more().await {
                warn!(error = %e, "Initial trip page failed");
            }
        });
    }
}

#[derive(Clone)]
pub struct TripLoader {
    inner: Arc<Inner>,
}

impl TripLoader {
    pub fn new(api: Arc<dyn TransitApi>) -> Self {
        Self::with_timing(api, TRIP_DEBOUNCE, TRIP_LOAD_THROTTLE)
    }

    pub fn with_timing(
        api: Arc<dyn TransitApi>,
        debounce: Duration,
        throttle: ThrottlePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pages: PagedLoader::new(
                    Arc::new(TripPages(api)),
                    RouteKey::default(),
                    TRIP_PAGE_SIZE,
                    TRIP_STALE_AFTER,
                ),
                debounce: Debouncer::new(debounce),
                throttle,
                requested: Mutex::new(RouteKey::default()),
            }),
        }
    }

    /// Records a new route selection; it takes effect after the debounce
    /// window unless superseded by another call.
    pub fn set_routes<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = RouteKey::new(ids);
        *lock(&self.inner.requested) = key.clone();
        debug!(routes = %key, "Trip route filter requested");

        let inner = self.inner.clone();
        self.inner.debounce.schedule((), async move {
            inner.apply(key);
        });
    }

    /// Applies a selection immediately and waits for its first page.
    pub async fn select_now<I, S>(&self, ids: I) -> Result<LoadOutcome, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = RouteKey::new(ids);
        self.inner.debounce.cancel(&());
        *lock(&self.inner.requested) = key.clone();
        if self.inner.pages.key() != key {
            self.inner.pages.reset(key);
        }
        self.inner.pages.load_more().await
    }

    /// Loads the next page after a delay that grows with the pages already
    /// loaded. Skipped while the selection is empty or still settling; a
    /// route change during the delay turns this into a no-op.
    pub async fn load_more(&self) -> Result<LoadOutcome, FetchError> {
        let pages = &self.inner.pages;
        if !self.is_settled() || !pages.has_more() || pages.is_loading() {
            return Ok(LoadOutcome::Skipped);
        }
        let generation = pages.generation();
        let delay = self.inner.throttle.delay(pages.pages_loaded());
        debug!(delay_ms = delay.as_millis() as u64, "Throttling trip page load");
        tokio::time::sleep(delay).await;
        if !self.is_settled() {
            return Ok(LoadOutcome::Superseded);
        }
        pages.load_more_for(generation).await
    }

    /// True once the trips for the current selection are older than the
    /// staleness window.
    pub fn is_stale(&self) -> bool {
        self.is_settled() && self.inner.pages.is_stale()
    }

    /// Drops stale trips for the current selection and loads its first page
    /// again.
    pub async fn refresh_if_stale(&self) -> Result<LoadOutcome, FetchError> {
        if !self.is_stale() {
            return Ok(LoadOutcome::Skipped);
        }
        let key = self.inner.pages.key();
        info!(routes = %key, pages = self.inner.pages.pages_loaded(), "Trips stale, reloading");
        self.inner.pages.reset(key);
        self.inner.pages.load_more().await
    }

    /// The loaded pages belong to the latest selection, which is not empty.
    fn is_settled(&self) -> bool {
        let loaded = self.inner.pages.key();
        let requested = lock(&self.inner.requested);
        !requested.is_empty() && *requested == loaded
    }

    /// Loaded trips, deduplicated by id (first occurrence wins). Empty while
    /// no routes are selected.
    pub fn trips(&self) -> Vec<TripRecord> {
        if self.is_disabled() {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        self.inner
            .pages
            .items()
            .into_iter()
            .filter(|trip| seen.insert(trip.id.clone()))
            .collect()
    }

    pub fn destinations(&self) -> Vec<FilterOption> {
        destination_options(&self.trips())
    }

    pub fn is_disabled(&self) -> bool {
        lock(&self.inner.requested).is_empty()
    }

    /// Routes the loaded trips belong to (the settled selection).
    pub fn routes(&self) -> RouteKey {
        self.inner.pages.key()
    }

    pub fn has_more(&self) -> bool {
        !self.is_disabled() && self.inner.pages.has_more()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.pages.is_loading()
    }

    pub fn is_settling(&self) -> bool {
        self.inner.debounce.is_pending(&())
    }

    pub fn error(&self) -> Option<String> {
        self.inner.pages.last_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::test_support::{FakeTransit, trip};
    use tokio::time::{Instant, sleep};

    fn sample_trips() -> Vec<TripRecord> {
        vec![
            trip("1", "A", "Harvard", Direction::Outbound),
            trip("2", "A", "Harvard", Direction::Inbound),
            trip("3", "B", "Ashmont", Direction::Inbound),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_routes_means_no_requests() {
        let api = Arc::new(FakeTransit::with_trips(sample_trips()));
        let loader = TripLoader::new(api.clone());

        assert!(loader.is_disabled());
        assert!(!loader.has_more());
        assert_eq!(loader.load_more().await.unwrap(), LoadOutcome::Skipped);

        loader.set_routes(Vec::<String>::new());
        sleep(Duration::from_secs(1)).await;
        assert!(api.trip_calls().is_empty());
        assert!(loader.trips().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_route_changes_coalesce_into_one_request() {
        let api = Arc::new(FakeTransit::with_trips(sample_trips()));
        let loader = TripLoader::new(api.clone());

        loader.set_routes(["A"]);
        sleep(Duration::from_millis(200)).await;
        loader.set_routes(["A", "B"]);
        assert!(loader.is_settling());
        sleep(Duration::from_millis(600)).await;

        let calls = api.trip_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "A,B");
        assert_eq!(calls[0].1, FetchCursor::first(TRIP_PAGE_SIZE));
        assert_eq!(loader.trips().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_change_discards_in_flight_trips() {
        let api = Arc::new(
            FakeTransit::with_trips(sample_trips()).trip_delay(Duration::from_secs(1)),
        );
        let loader = TripLoader::new(api.clone());

        loader.set_routes(["A"]);
        sleep(Duration::from_millis(600)).await;
        assert!(loader.is_loading());

        loader.set_routes(["B"]);
        sleep(Duration::from_millis(600)).await;
        sleep(Duration::from_secs(2)).await;

        let requested: Vec<String> = api.trip_calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(requested, vec!["A".to_string(), "B".to_string()]);
        let ids: Vec<String> = loader.trips().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["3".to_string()]);
        assert!(loader.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_selection_does_not_refetch() {
        let api = Arc::new(FakeTransit::with_trips(sample_trips()));
        let loader = TripLoader::new(api.clone());

        loader.set_routes(["B", "A"]);
        sleep(Duration::from_millis(600)).await;
        loader.set_routes(["A", "B"]);
        sleep(Duration::from_millis(600)).await;

        assert_eq!(api.trip_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_are_deduplicated_by_id_across_pages() {
        let mut trips: Vec<TripRecord> = (0..TRIP_PAGE_SIZE)
            .map(|i| trip(&format!("t{i}"), "A", &format!("Stop {i}"), Direction::Outbound))
            .collect();
        trips.push(trip("t0", "A", "Stop 0", Direction::Outbound));
        let api = Arc::new(FakeTransit::with_trips(trips));
        let loader = TripLoader::new(api.clone());

        loader.select_now(["A"]).await.unwrap();
        assert!(loader.has_more());
        loader.load_more().await.unwrap();

        assert_eq!(api.trip_calls().len(), 2);
        assert_eq!(loader.trips().len(), TRIP_PAGE_SIZE);
        assert!(!loader.has_more());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_more_is_throttled_by_pages_loaded() {
        let trips: Vec<TripRecord> = (0..TRIP_PAGE_SIZE * 3)
            .map(|i| trip(&format!("t{i}"), "A", "Harvard", Direction::Outbound))
            .collect();
        let api = Arc::new(FakeTransit::with_trips(trips));
        let loader = TripLoader::new(api.clone());
        loader.select_now(["A"]).await.unwrap();

        let started = Instant::now();
        loader.load_more().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(150) && waited < Duration::from_millis(200));

        let started = Instant::now();
        loader.load_more().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(200) && waited < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_load_is_dropped_after_route_change() {
        let trips: Vec<TripRecord> = (0..TRIP_PAGE_SIZE * 2)
            .map(|i| trip(&format!("t{i}"), "A", "Harvard", Direction::Outbound))
            .collect();
        let api = Arc::new(FakeTransit::with_trips(trips));
        let loader = TripLoader::new(api.clone());
        loader.select_now(["A"]).await.unwrap();

        let pending = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_more().await }
        });
        sleep(Duration::from_millis(50)).await;
        loader.select_now(["B"]).await.unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Superseded);
        let offsets: Vec<usize> = api.trip_calls().iter().map(|(_, c)| c.offset).collect();
        assert_eq!(offsets, vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destinations_collapse_by_headsign() {
        let api = Arc::new(FakeTransit::with_trips(sample_trips()));
        let loader = TripLoader::new(api);
        loader.select_now(["A", "B"]).await.unwrap();

        let labels: Vec<(String, Option<String>)> = loader
            .destinations()
            .into_iter()
            .map(|o| (o.label, o.subtitle))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("Harvard".to_string(), Some("Outbound".to_string())),
                ("Ashmont".to_string(), Some("Inbound".to_string())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_selection_never_loads_more() {
        let trips: Vec<TripRecord> = (0..TRIP_PAGE_SIZE * 2)
            .map(|i| trip(&format!("t{i}"), "A", "Harvard", Direction::Outbound))
            .collect();
        let api = Arc::new(FakeTransit::with_trips(trips));
        let loader = TripLoader::new(api.clone());

        loader.set_routes(["A"]);
        sleep(Duration::from_millis(600)).await;
        assert!(loader.has_more());

        loader.set_routes(Vec::<String>::new());
        assert!(loader.is_disabled());
        assert_eq!(loader.load_more().await.unwrap(), LoadOutcome::Skipped);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(loader.load_more().await.unwrap(), LoadOutcome::Skipped);

        assert_eq!(api.trip_calls().len(), 1);
        assert!(loader.trips().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_more_waits_for_pending_selection() {
        let trips: Vec<TripRecord> = (0..TRIP_PAGE_SIZE * 2)
            .map(|i| trip(&format!("t{i}"), "A", "Harvard", Direction::Outbound))
            .collect();
        let api = Arc::new(FakeTransit::with_trips(trips));
        let loader = TripLoader::new(api.clone());
        loader.select_now(["A"]).await.unwrap();

        loader.set_routes(["A", "B"]);
        assert!(loader.is_settling());
        assert_eq!(loader.load_more().await.unwrap(), LoadOutcome::Skipped);

        let pending = tokio::spawn({
            let loader = loader.clone();
            async move {
                sleep(Duration::from_millis(600)).await;
                loader.load_more().await
            }
        });
        sleep(Duration::from_millis(650)).await;
        loader.set_routes(Vec::<String>::new());
        assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Superseded);

        let offsets: Vec<(String, usize)> = api
            .trip_calls()
            .into_iter()
            .map(|(k, c)| (k, c.offset))
            .collect();
        assert_eq!(offsets, vec![("A".to_string(), 0), ("A,B".to_string(), 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_trips_reload_from_first_page() {
        let trips: Vec<TripRecord> = (0..TRIP_PAGE_SIZE * 2)
            .map(|i| trip(&format!("t{i}"), "A", "Harvard", Direction::Outbound))
            .collect();
        let api = Arc::new(FakeTransit::with_trips(trips));
        let loader = TripLoader::new(api.clone());
        loader.select_now(["A"]).await.unwrap();
        loader.load_more().await.unwrap();
        assert_eq!(loader.trips().len(), TRIP_PAGE_SIZE * 2);

        assert!(!loader.is_stale());
        assert_eq!(loader.refresh_if_stale().await.unwrap(), LoadOutcome::Skipped);

        sleep(TRIP_STALE_AFTER).await;
        assert!(loader.is_stale());
        let outcome = loader.refresh_if_stale().await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                items: TRIP_PAGE_SIZE,
                has_more: true
            }
        );
        assert_eq!(loader.trips().len(), TRIP_PAGE_SIZE);
        assert!(!loader.is_stale());

        let offsets: Vec<usize> = api.trip_calls().iter().map(|(_, c)| c.offset).collect();
        assert_eq!(offsets, vec![0, TRIP_PAGE_SIZE, 0]);
    }
}
