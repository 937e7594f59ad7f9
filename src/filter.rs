//! Route and destination filtering over the vehicle snapshot.
//!
//! The two dimensions are independent. An empty selection matches everything
//! for that dimension, and a vehicle must satisfy both. Destinations are
//! headsign strings rather than trip ids, so one selection covers every trip
//! heading to the same place, across routes.

use std::collections::{BTreeSet, HashSet};

use crate::format::direction_label;
use crate::models::{RouteRecord, TripRecord, VehicleRecord};
use crate::paginator::Paginator;

/// An entry in a filter selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    pub id: String,
    pub label: String,
    pub subtitle: Option<String>,
}

pub fn route_options(routes: &[RouteRecord]) -> Vec<FilterOption> {
    routes
        .iter()
        .map(|route| FilterOption {
            id: route.id.clone(),
            label: route.display_name().to_string(),
            subtitle: None,
        })
        .collect()
}

/// One option per distinct headsign; the first trip seen supplies the
/// direction subtitle. Trips without a headsign are skipped.
pub fn destination_options(trips: &[TripRecord]) -> Vec<FilterOption> {
    let mut seen = HashSet::new();
    trips
        .iter()
        .filter_map(|trip| {
            let headsign = trip.headsign.as_deref()?;
            if !seen.insert(headsign) {
                return None;
            }
            Some(FilterOption {
                id: headsign.to_string(),
                label: headsign.to_string(),
                subtitle: Some(direction_label(trip.direction).to_string()),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    routes: BTreeSet<String>,
    destinations: BTreeSet<String>,
}

impl FilterState {
    pub fn matches(&self, vehicle: &VehicleRecord) -> bool {
        self.matches_fields(vehicle.route_id.as_deref(), vehicle.trip_headsign.as_deref())
    }

    fn matches_fields(&self, route_id: Option<&str>, headsign: Option<&str>) -> bool {
        let route_ok =
            self.routes.is_empty() || route_id.is_some_and(|id| self.routes.contains(id));
        let destination_ok = self.destinations.is_empty()
            || headsign.is_some_and(|h| self.destinations.contains(h));
        route_ok && destination_ok
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(String::as_str)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.destinations.iter().map(String::as_str)
    }

    pub fn is_active(&self) -> bool {
        !self.routes.is_empty() || !self.destinations.is_empty()
    }
}

/// Vehicles on the current page plus the counts the view needs.
#[derive(Debug)]
pub struct FleetPage<'a> {
    pub vehicles: Vec<&'a VehicleRecord>,
    /// Vehicles matching the filter, across all pages.
    pub matched: usize,
    /// Vehicles in the snapshot before filtering.
    pub total: usize,
    pub window: Paginator,
}

/// Route id and headsign of a vehicle, kept so a filter change can recount
/// matches before the next snapshot is applied.
#[derive(Debug, Clone)]
struct MatchFields {
    route_id: Option<String>,
    headsign: Option<String>,
}

/// Owns the filter selection and the page window over its result.
///
/// The window always reflects the last applied snapshot under the current
/// filter, so navigating right after a filter change clamps against the new
/// result size.
#[derive(Debug, Clone)]
pub struct FilterComposer {
    filter: FilterState,
    paginator: Paginator,
    last_seen: Vec<MatchFields>,
}

impl FilterComposer {
    pub fn new(items_per_page: usize) -> Self {
        Self {
            filter: FilterState::default(),
            paginator: Paginator::new(0, items_per_page),
            last_seen: Vec::new(),
        }
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    /// Replaces the route selection. Destination selections are kept.
    pub fn set_routes<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.routes = ids.into_iter().map(Into::into).collect();
        self.refilter();
    }

    pub fn set_destinations<I, S>(&mut self, headsigns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter.destinations = headsigns.into_iter().map(Into::into).collect();
        self.refilter();
    }

    pub fn toggle_route(&mut self, id: &str) {
        toggle(&mut self.filter.routes, id);
        self.refilter();
    }

    pub fn toggle_destination(&mut self, headsign: &str) {
        toggle(&mut self.filter.destinations, headsign);
        self.refilter();
    }

    pub fn clear(&mut self) {
        self.filter = FilterState::default();
        self.refilter();
    }

    pub fn set_items_per_page(&mut self, items_per_page: usize) {
        self.paginator.set_items_per_page(items_per_page);
    }

    pub fn go_to_page(&mut self, page: usize) {
        self.paginator.go_to_page(page);
    }

    pub fn next_page(&mut self) {
        self.paginator.next_page();
    }

    pub fn previous_page(&mut self) {
        self.paginator.previous_page();
    }

    /// Filters `vehicles`, re-clamps the page window to the result, and
    /// returns the current page.
    pub fn apply<'a>(&mut self, vehicles: &'a [VehicleRecord]) -> FleetPage<'a> {
        self.last_seen = vehicles
            .iter()
            .map(|v| MatchFields {
                route_id: v.route_id.clone(),
                headsign: v.trip_headsign.clone(),
            })
            .collect();
        let matched: Vec<&VehicleRecord> =
            vehicles.iter().filter(|v| self.filter.matches(v)).collect();
        self.paginator.set_total_items(matched.len());
        let range = self.paginator.range();

        FleetPage {
            matched: matched.len(),
            total: vehicles.len(),
            vehicles: matched[range].to_vec(),
            window: self.paginator,
        }
    }

    /// Resizes the window to the last snapshot under the new filter and
    /// returns to the first page.
    fn refilter(&mut self) {
        let matched = self
            .last_seen
            .iter()
            .filter(|f| {
                self.filter
                    .matches_fields(f.route_id.as_deref(), f.headsign.as_deref())
            })
            .count();
        self.paginator.set_total_items(matched);
        self.paginator.go_to_page(1);
    }
}

fn toggle(set: &mut BTreeSet<String>, value: &str) {
    if !set.remove(value) {
        set.insert(value.to_string());
    }
}
