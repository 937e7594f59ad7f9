//! Wires the poller, loaders, geocode cache and filter composer together.
//!
//! Every collaborator is injected; [`Dashboard::build`] assembles the HTTP
//! implementations from a [`Config`].

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::Config;
use crate::error::FetchError;
use crate::fetch::BasicClient;
use crate::fetch::auth::ApiKey;
use crate::filter::{FilterComposer, FilterOption};
use crate::geocode::GeocodeCache;
use crate::infra::mbta::MbtaClient;
use crate::infra::nominatim::NominatimClient;
use crate::models::VehicleRecord;
use crate::paginator::DEFAULT_ITEMS_PER_PAGE;
use crate::paging::LoadOutcome;
use crate::poller::VehiclePoller;
use crate::routes::RouteLoader;
use crate::schedule::lock;
use crate::services::{Geocoder, TransitApi};
use crate::trips::TripLoader;

/// One page of filtered vehicles plus the counts shown around it.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetView {
    pub vehicles: Vec<VehicleRecord>,
    pub matched: usize,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
    pub items_per_page: usize,
    pub has_next: bool,
    pub has_previous: bool,
    pub refreshing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// First snapshot still on its way.
    Loading,
    /// The latest vehicle fetch failed. A manual retry is offered when
    /// `retryable`; otherwise the request itself needs fixing.
    Error {
        message: String,
        detail: String,
        retryable: bool,
    },
    /// Nothing to show. `filtered` tells "no match for the active filters"
    /// apart from "the fleet is empty".
    Empty { filtered: bool, total: usize },
    Loaded(FleetView),
}

pub struct Dashboard {
    poller: VehiclePoller,
    routes: RouteLoader,
    trips: TripLoader,
    geocode: GeocodeCache,
    composer: Mutex<FilterComposer>,
}

impl Dashboard {
    pub fn new(
        api: Arc<dyn TransitApi>,
        geocoder: Arc<dyn Geocoder>,
        poller: VehiclePoller,
    ) -> Self {
        Self {
            poller,
            routes: RouteLoader::new(api.clone()),
            trips: TripLoader::new(api),
            geocode: GeocodeCache::new(geocoder),
            composer: Mutex::new(FilterComposer::new(DEFAULT_ITEMS_PER_PAGE)),
        }
    }

    /// Builds the HTTP clients described by `config`.
    pub fn build(config: &Config) -> Result<Self, FetchError> {
        let http = BasicClient::with_timeout(config.http_timeout)?;
        let api: Arc<dyn TransitApi> = match &config.api_key {
            Some(key) => Arc::new(MbtaClient::new(
                ApiKey::new(http, "x-api-key", key)?,
                &config.api_url,
                config.vehicle_limit,
            )),
            None => Arc::new(MbtaClient::new(http, &config.api_url, config.vehicle_limit)),
        };
        let geocoder: Arc<dyn Geocoder> = Arc::new(NominatimClient::new(
            BasicClient::with_timeout(config.http_timeout)?,
            &config.geocoder_url,
            &config.geocoder_user_agent,
            &config.geocoder_language,
        ));
        info!(
            api = %config.api_url,
            geocoder = %config.geocoder_url,
            authenticated = config.api_key.is_some(),
            "Dashboard clients ready"
        );

        let poller = VehiclePoller::new(api.clone(), config.freshness);
        Ok(Self::new(api, geocoder, poller))
    }

    pub fn poller(&self) -> &VehiclePoller {
        &self.poller
    }

    pub fn routes(&self) -> &RouteLoader {
        &self.routes
    }

    pub fn trips(&self) -> &TripLoader {
        &self.trips
    }

    pub fn geocode(&self) -> &GeocodeCache {
        &self.geocode
    }

    /// Manual retry after an error view.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        self.poller.refetch().await.map(|_| ())
    }

    /// Loads the first route page, or reloads a stale catalog.
    pub async fn ensure_routes(&self) -> Result<LoadOutcome, FetchError> {
        if self.routes.routes().is_empty() {
            self.routes.load_more().await
        } else {
            self.routes.refresh_if_stale().await
        }
    }

    pub fn route_options(&self) -> Vec<FilterOption> {
        self.routes.options()
    }

    pub fn destination_options(&self) -> Vec<FilterOption> {
        self.trips.destinations()
    }

    /// Replaces the route selection and retargets the trip loader.
    pub fn select_routes<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        lock(&self.composer).set_routes(ids.clone());
        self.trips.set_routes(ids);
    }

    pub fn toggle_route(&self, id: &str) {
        let selected: Vec<String> = {
            let mut composer = lock(&self.composer);
            composer.toggle_route(id);
            composer.filter().routes().map(str::to_string).collect()
        };
        self.trips.set_routes(selected);
    }

    pub fn select_destinations<I, S>(&self, headsigns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.composer).set_destinations(headsigns);
    }

    pub fn toggle_destination(&self, headsign: &str) {
        lock(&self.composer).toggle_destination(headsign);
    }

    pub fn clear_filters(&self) {
        lock(&self.composer).clear();
        self.trips.set_routes(Vec::<String>::new());
    }

    pub fn set_items_per_page(&self, items_per_page: usize) {
        lock(&self.composer).set_items_per_page(items_per_page);
    }

    pub fn go_to_page(&self, page: usize) {
        self.navigate(|composer| composer.go_to_page(page));
    }

    pub fn next_page(&self) {
        self.navigate(FilterComposer::next_page);
    }

    pub fn previous_page(&self) {
        self.navigate(FilterComposer::previous_page);
    }

    /// Sizes the page window to the current snapshot, then moves it.
    fn navigate(&self, step: impl FnOnce(&mut FilterComposer)) {
        let snapshot = self.poller.read();
        let mut composer = lock(&self.composer);
        composer.apply(&snapshot.vehicles);
        step(&mut composer);
    }

    /// Every vehicle in the last snapshot matching the active filters,
    /// ignoring the page window.
    pub fn filtered_vehicles(&self) -> Vec<VehicleRecord> {
        let snapshot = self.poller.read();
        let composer = lock(&self.composer);
        snapshot
            .vehicles
            .iter()
            .filter(|v| composer.filter().matches(v))
            .cloned()
            .collect()
    }

    /// Current view. Reading may start a background refresh of a stale
    /// snapshot; the last known vehicles are shown meanwhile.
    pub fn view(&self) -> ViewState {
        let snapshot = self.poller.read();
        if let Some(error) = &snapshot.error {
            return ViewState::Error {
                message: error.user_message.to_string(),
                detail: error.message.clone(),
                retryable: error.retryable,
            };
        }

        let mut composer = lock(&self.composer);
        let filtered = composer.filter().is_active();
        let page = composer.apply(&snapshot.vehicles);

        if page.matched == 0 {
            return if snapshot.is_loading() {
                ViewState::Loading
            } else {
                ViewState::Empty {
                    filtered,
                    total: page.total,
                }
            };
        }

        ViewState::Loaded(FleetView {
            vehicles: page.vehicles.into_iter().cloned().collect(),
            matched: page.matched,
            total: page.total,
            page: page.window.current_page(),
            total_pages: page.window.total_pages(),
            items_per_page: page.window.items_per_page(),
            has_next: page.window.has_next_page(),
            has_previous: page.window.has_previous_page(),
            refreshing: snapshot.is_refreshing,
        })
    }
}
