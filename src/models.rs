//! Transit API wire shapes (JSON:API documents) and the records built from them.
//!
//! Wire types mirror the upstream payload and are lenient: every optional
//! attribute defaults to `None`, and empty strings are folded into `None` when
//! a wire resource becomes a record.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Route color used when a vehicle's route is unknown or has no color.
pub const DEFAULT_ROUTE_COLOR: &str = "0066b2";
pub const DEFAULT_ROUTE_TEXT_COLOR: &str = "FFFFFF";

/// Placeholder label for a route with neither a long nor a short name.
pub const UNNAMED_ROUTE: &str = "Unnamed Route";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleStatus {
    StoppedAt,
    InTransitTo,
    IncomingAt,
    Other(String),
}

impl VehicleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            VehicleStatus::StoppedAt => "STOPPED_AT",
            VehicleStatus::InTransitTo => "IN_TRANSIT_TO",
            VehicleStatus::IncomingAt => "INCOMING_AT",
            VehicleStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for VehicleStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "STOPPED_AT" => VehicleStatus::StoppedAt,
            "IN_TRANSIT_TO" => VehicleStatus::InTransitTo,
            "INCOMING_AT" => VehicleStatus::IncomingAt,
            _ => VehicleStatus::Other(raw),
        }
    }
}

impl From<VehicleStatus> for String {
    fn from(status: VehicleStatus) -> Self {
        match status {
            VehicleStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Outbound,
    Inbound,
    Unknown,
}

impl Direction {
    pub fn from_id(direction_id: Option<i64>) -> Self {
        match direction_id {
            Some(0) => Direction::Outbound,
            Some(1) => Direction::Inbound,
            _ => Direction::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// A JSON:API document: primary `data` plus side-loaded `included` entities.
#[derive(Debug, Deserialize)]
pub struct Document<T> {
    pub data: T,
    #[serde(default)]
    pub included: Vec<Included>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    pub attributes: A,
    #[serde(default)]
    pub relationships: Relationships,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationships {
    #[serde(default)]
    pub route: Option<Relationship>,
    #[serde(default)]
    pub trip: Option<Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<ResourceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

impl Relationships {
    pub fn route_id(&self) -> Option<&str> {
        self.route.as_ref()?.data.as_ref().map(|r| r.id.as_str())
    }

    pub fn trip_id(&self) -> Option<&str> {
        self.trip.as_ref()?.data.as_ref().map(|r| r.id.as_str())
    }
}

/// Side-loaded entity, discriminated by its JSON:API `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Included {
    Route(Resource<RouteAttributes>),
    Trip(Resource<TripAttributes>),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleAttributes {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub current_status: Option<VehicleStatus>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub occupancy_status: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteAttributes {
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default, rename = "type")]
    pub route_type: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub text_color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripAttributes {
    #[serde(default)]
    pub headsign: Option<String>,
    #[serde(default)]
    pub direction_id: Option<i64>,
}

pub type VehicleDocument = Document<Vec<Resource<VehicleAttributes>>>;
pub type RouteDocument = Document<Vec<Resource<RouteAttributes>>>;
pub type TripDocument = Document<Vec<Resource<TripAttributes>>>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A vehicle with its route and trip metadata denormalized onto it.
///
/// `trip_headsign`, `route_name` and the colors are derived at fetch time and
/// are `None`/default when the related entity was not side-loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub id: String,
    pub label: Option<String>,
    pub status: VehicleStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bearing: Option<f64>,
    pub speed: Option<f64>,
    pub occupancy: Option<String>,
    pub updated_at: Option<DateTime<FixedOffset>>,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub trip_headsign: Option<String>,
    pub route_name: Option<String>,
    pub route_color: String,
    pub route_text_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRecord {
    pub id: String,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub route_type: Option<i64>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
}

impl RouteRecord {
    /// Long name, else short name.
    pub fn name(&self) -> Option<&str> {
        self.long_name.as_deref().or(self.short_name.as_deref())
    }

    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(UNNAMED_ROUTE)
    }
}

impl From<Resource<RouteAttributes>> for RouteRecord {
    fn from(resource: Resource<RouteAttributes>) -> Self {
        let attrs = resource.attributes;
        Self {
            id: resource.id,
            long_name: non_empty(attrs.long_name),
            short_name: non_empty(attrs.short_name),
            route_type: attrs.route_type,
            description: non_empty(attrs.description),
            color: non_empty(attrs.color),
            text_color: non_empty(attrs.text_color),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRecord {
    pub id: String,
    pub headsign: Option<String>,
    pub direction: Direction,
    pub route_id: Option<String>,
}

impl From<Resource<TripAttributes>> for TripRecord {
    fn from(resource: Resource<TripAttributes>) -> Self {
        let route_id = resource.relationships.route_id().map(str::to_string);
        Self {
            id: resource.id,
            headsign: non_empty(resource.attributes.headsign),
            direction: Direction::from_id(resource.attributes.direction_id),
            route_id,
        }
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
