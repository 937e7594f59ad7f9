//! Display strings for vehicle fields.

use chrono::{DateTime, TimeZone, Utc};

use crate::models::{Direction, VehicleStatus};

/// Human label for a status code. Unknown codes are sentence-cased:
/// `"VERY_LONG_STATUS"` becomes `"Very long status"`.
pub fn status_label(raw: &str) -> String {
    match VehicleStatus::from(raw.to_string()) {
        VehicleStatus::StoppedAt => "Stopped at".to_string(),
        VehicleStatus::InTransitTo => "Moving toward".to_string(),
        VehicleStatus::IncomingAt => "Arriving at".to_string(),
        VehicleStatus::Other(raw) if raw.is_empty() => "Unknown".to_string(),
        VehicleStatus::Other(raw) => sentence_case(&raw.replace('_', " ")),
    }
}

fn sentence_case(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => "Outbound",
        Direction::Inbound => "Inbound",
        Direction::Unknown => "Unknown",
    }
}

pub fn format_coordinate(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.6}"),
        None => "-".to_string(),
    }
}

pub fn occupancy_label(occupancy: Option<&str>) -> String {
    let Some(status) = occupancy else {
        return "Seats: Unknown".to_string();
    };
    let upper = status.to_uppercase();
    if upper.contains("MANY") {
        "Seats: Available".to_string()
    } else if upper.contains("FEW") {
        "Seats: Limited".to_string()
    } else if upper.contains("FULL") {
        "Seats: Full".to_string()
    } else {
        format!("Seats: {}", status_label(status))
    }
}

/// "N seconds/minutes/hours/days ago", truncating to whole units.
pub fn relative_time<Tz: TimeZone>(then: &DateTime<Tz>, now: DateTime<Utc>) -> String {
    let seconds = (now - then.with_timezone(&Utc)).num_seconds().max(0);
    let (amount, unit) = match seconds {
        s if s < 60 => (s, "second"),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s => (s / 86_400, "day"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural} ago")
}
