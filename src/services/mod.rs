//! Upstream collaborators, expressed as traits so components take them by injection.

pub mod geocoder;
pub mod transit_api;

pub use geocoder::Geocoder;
pub use transit_api::{RouteKey, TransitApi};
