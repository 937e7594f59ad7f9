//! Reverse-geocoding cache.
//!
//! Entries are keyed by the coordinate rounded to four decimals, so nearby
//! positions share one request and one result. Each entry owns a
//! [`watch`] channel; concurrent callers for the same key subscribe to the
//! request already in flight instead of issuing another one.
//!
//! Resolved entries live for [`GEOCODE_TTL`]. An entry whose retries ran out,
//! or whose answer carried no usable address, is remembered for
//! [`GEOCODE_FAILURE_TTL`] so repeated renders do not restart the lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::schedule::{Debouncer, RetryPolicy, lock};
use crate::services::Geocoder;

pub const GEOCODE_DEBOUNCE: Duration = Duration::from_millis(500);
pub const GEOCODE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const GEOCODE_FAILURE_TTL: Duration = Duration::from_secs(60);
pub const GEOCODE_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 7,
    base: Duration::from_secs(1),
    cap: Duration::from_secs(10),
};

/// Coordinate rounded to 1e-4 degrees (about 11 m).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey {
    lat_e4: i64,
    lon_e4: i64,
}

impl CoordKey {
    /// `None` for positions without a fix: a zero or non-finite component.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() || lat == 0.0 || lon == 0.0 {
            return None;
        }
        Some(Self {
            lat_e4: (lat * 1e4).round() as i64,
            lon_e4: (lon * 1e4).round() as i64,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.lat_e4 as f64 / 1e4
    }

    pub fn longitude(&self) -> f64 {
        self.lon_e4 as f64 / 1e4
    }
}

impl fmt::Display for CoordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude(), self.longitude())
    }
}

/// What a caller can show for a coordinate right now.
///
/// `loading` with a non-zero `failure_count` means the lookup is still being
/// retried. Settled with no `address` means the caller should fall back to
/// the raw coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeocodeStatus {
    pub address: Option<String>,
    pub loading: bool,
    pub failure_count: u32,
}

struct Entry {
    status: watch::Sender<GeocodeStatus>,
    /// Unset while the lookup is in flight.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

struct Inner {
    geocoder: Arc<dyn Geocoder>,
    retry: RetryPolicy,
    ttl: Duration,
    failure_ttl: Duration,
    entries: Mutex<HashMap<CoordKey, Entry>>,
    /// Settled coordinate per tracked subscriber.
    tracked: Mutex<HashMap<String, CoordKey>>,
    debounce: Debouncer<String>,
}

#[derive(Clone)]
pub struct GeocodeCache {
    inner: Arc<Inner>,
}

impl GeocodeCache {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self::with_policy(geocoder, GEOCODE_RETRY, GEOCODE_TTL, GEOCODE_DEBOUNCE)
    }

    pub fn with_policy(
        geocoder: Arc<dyn Geocoder>,
        retry: RetryPolicy,
        ttl: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                geocoder,
                retry,
                ttl,
                failure_ttl: GEOCODE_FAILURE_TTL,
                entries: Mutex::new(HashMap::new()),
                tracked: Mutex::new(HashMap::new()),
                debounce: Debouncer::new(debounce),
            }),
        }
    }

    /// Current status for a coordinate. Never waits, but spawns a background
    /// lookup when nothing live is cached for the coordinate.
    pub fn lookup(&self, lat: f64, lon: f64) -> GeocodeStatus {
        match CoordKey::new(lat, lon) {
            Some(key) => self.subscribe(key).borrow().clone(),
            None => GeocodeStatus::default(),
        }
    }

    /// Waits for the coordinate's lookup to settle.
    pub async fn resolve(&self, lat: f64, lon: f64) -> GeocodeStatus {
        let Some(key) = CoordKey::new(lat, lon) else {
            return GeocodeStatus::default();
        };
        let mut rx = self.subscribe(key);
        let settled = rx.wait_for(|s| !s.loading).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| rx.borrow().clone())
    }

    /// Reports a subscriber's latest position. The position is only used
    /// once it has held still for the debounce delay.
    pub fn track(&self, subscriber: &str, lat: f64, lon: f64) {
        let subscriber = subscriber.to_string();
        let Some(key) = CoordKey::new(lat, lon) else {
            self.forget(&subscriber);
            return;
        };

        if lock(&self.inner.tracked).get(&subscriber) == Some(&key) {
            self.inner.debounce.cancel(&subscriber);
            return;
        }

        let cache = self.clone();
        let name = subscriber.clone();
        self.inner.debounce.schedule(subscriber, async move {
            lock(&cache.inner.tracked).insert(name, key);
            cache.subscribe(key);
        });
    }

    /// Status for a tracked subscriber's settled position. Like
    /// [`lookup`](Self::lookup), this spawns a lookup for an expired entry.
    pub fn status(&self, subscriber: &str) -> GeocodeStatus {
        let key = lock(&self.inner.tracked).get(subscriber).copied();
        match key {
            Some(key) => self.subscribe(key).borrow().clone(),
            None => GeocodeStatus {
                loading: self.inner.debounce.is_pending(&subscriber.to_string()),
                ..GeocodeStatus::default()
            },
        }
    }

    pub fn forget(&self, subscriber: &str) {
        let subscriber = subscriber.to_string();
        self.inner.debounce.cancel(&subscriber);
        lock(&self.inner.tracked).remove(&subscriber);
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.inner.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Purged geocode entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subscribe(&self, key: CoordKey) -> watch::Receiver<GeocodeStatus> {
        let mut entries = lock(&self.inner.entries);
        if let Some(entry) = entries.get(&key) {
            if entry.is_live(Instant::now()) {
                return entry.status.subscribe();
            }
        }

        let (status, rx) = watch::channel(GeocodeStatus {
            address: None,
            loading: true,
            failure_count: 0,
        });
        entries.insert(
            key,
            Entry {
                status,
                expires_at: None,
            },
        );
        tokio::spawn(self.clone().run(key));
        rx
    }

    async fn run(self, key: CoordKey) {
        let retry = self.inner.retry;
        let mut failures = 0u32;
        loop {
            match self
                .inner
                .geocoder
                .reverse(key.latitude(), key.longitude())
                .await
            {
                Ok(address) => {
                    debug!(%key, found = address.is_some(), "Reverse geocoded");
                    let ttl = if address.is_some() {
                        self.inner.ttl
                    } else {
                        self.inner.failure_ttl
                    };
                    self.settle(key, address, failures, ttl);
                    return;
                }
                Err(e) => {
                    failures += 1;
                    if failures > retry.max_retries {
                        warn!(%key, failures, error = %e, "Reverse geocoding gave up");
                        self.settle(key, None, failures, self.inner.failure_ttl);
                        return;
                    }
                    let delay = retry.delay(failures - 1);
                    warn!(%key, failures, ?delay, error = %e, "Reverse geocoding failed, retrying");
                    self.update(key, |status| status.failure_count = failures);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn settle(&self, key: CoordKey, address: Option<String>, failures: u32, ttl: Duration) {
        let mut entries = lock(&self.inner.entries);
        if let Some(entry) = entries.get_mut(&key) {
            entry.expires_at = Some(Instant::now() + ttl);
            entry.status.send_modify(|status| {
                status.address = address;
                status.loading = false;
                status.failure_count = failures;
            });
        }
    }

    fn update(&self, key: CoordKey, modify: impl FnOnce(&mut GeocodeStatus)) {
        if let Some(entry) = lock(&self.inner.entries).get(&key) {
            entry.status.send_modify(modify);
        }
    }
}
