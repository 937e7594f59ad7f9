//! Output formatting and persistence for vehicle snapshots.
//!
//! Supports a human-readable log listing, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use tracing::{debug, info};

use crate::format::{format_coordinate, occupancy_label, relative_time, status_label};
use crate::models::VehicleRecord;

/// Logs one line per vehicle with display labels.
pub fn print_pretty(vehicles: &[VehicleRecord], now: DateTime<Utc>) {
    for vehicle in vehicles {
        info!(
            id = %vehicle.id,
            label = vehicle.label.as_deref().unwrap_or("-"),
            route = vehicle.route_name.as_deref().unwrap_or("-"),
            headsign = vehicle.trip_headsign.as_deref().unwrap_or("-"),
            status = %status_label(vehicle.status.as_str()),
            position = %format!(
                "{}, {}",
                format_coordinate(vehicle.latitude),
                format_coordinate(vehicle.longitude)
            ),
            seats = %occupancy_label(vehicle.occupancy.as_deref()),
            updated = %vehicle
                .updated_at
                .map(|at| relative_time(&at, now))
                .unwrap_or_else(|| "-".to_string()),
            "Vehicle"
        );
    }
}

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Flat CSV row for one vehicle in one sample.
#[derive(Debug, Serialize)]
struct VehicleRow<'a> {
    sampled_at: &'a str,
    id: &'a str,
    label: Option<&'a str>,
    status: &'a str,
    route_id: Option<&'a str>,
    route_name: Option<&'a str>,
    trip_id: Option<&'a str>,
    headsign: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    bearing: Option<f64>,
    speed: Option<f64>,
    occupancy: Option<&'a str>,
    updated_at: Option<String>,
}

/// Appends one row per vehicle to a CSV file, all stamped with `sampled_at`.
///
/// Writes headers when the file is missing or still empty. Returns the
/// number of rows written.
pub fn append_records(
    path: &str,
    sampled_at: DateTime<Utc>,
    vehicles: &[VehicleRecord],
) -> Result<usize> {
    let has_rows = fs::metadata(path).is_ok_and(|m| m.len() > 0);
    debug!(path, has_rows, rows = vehicles.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!has_rows) // IMPORTANT when appending
        .from_writer(file);

    let sampled_at = sampled_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    for vehicle in vehicles {
        writer.serialize(VehicleRow {
            sampled_at: &sampled_at,
            id: &vehicle.id,
            label: vehicle.label.as_deref(),
            status: vehicle.status.as_str(),
            route_id: vehicle.route_id.as_deref(),
            route_name: vehicle.route_name.as_deref(),
            trip_id: vehicle.trip_id.as_deref(),
            headsign: vehicle.trip_headsign.as_deref(),
            latitude: vehicle.latitude,
            longitude: vehicle.longitude,
            bearing: vehicle.bearing,
            speed: vehicle.speed,
            occupancy: vehicle.occupancy.as_deref(),
            updated_at: vehicle.updated_at.map(|at| at.to_rfc3339()),
        })?;
    }
    writer.flush()?;

    Ok(vehicles.len())
}
