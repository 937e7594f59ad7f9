//! Concrete upstream clients behind the `services` traits.

pub mod mbta;
pub mod nominatim;
