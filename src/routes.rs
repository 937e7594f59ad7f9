//! Route catalog loader.
//!
//! Unfiltered, sorted by display name, 20 routes per page. `load_more` is
//! driven by the selector (scroll proximity) and is not throttled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::FetchError;
use crate::filter::{FilterOption, route_options};
use crate::models::RouteRecord;
use crate::paging::{FetchCursor, LoadOutcome, PageSource, PagedLoader};
use crate::services::TransitApi;

pub const ROUTE_PAGE_SIZE: usize = 20;
pub const ROUTE_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

struct RoutePages(Arc<dyn TransitApi>);

#[async_trait]
impl PageSource<(), RouteRecord> for RoutePages {
    async fn fetch_page(
        &self,
        _key: &(),
        cursor: FetchCursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<RouteRecord>, FetchError> {
        self.0.routes(cursor, cancel).await
    }
}

pub struct RouteLoader {
    pages: PagedLoader<(), RouteRecord>,
}

impl RouteLoader {
    pub fn new(api: Arc<dyn TransitApi>) -> Self {
        Self {
            pages: PagedLoader::new(
                Arc::new(RoutePages(api)),
                (),
                ROUTE_PAGE_SIZE,
                ROUTE_STALE_AFTER,
            ),
        }
    }

    pub async fn load_more(&self) -> Result<LoadOutcome, FetchError> {
        self.pages.load_more().await
    }

    /// Drops a stale catalog and loads its first page again.
    pub async fn refresh_if_stale(&self) -> Result<LoadOutcome, FetchError> {
        if !self.pages.is_stale() {
            return Ok(LoadOutcome::Skipped);
        }
        info!(pages = self.pages.pages_loaded(), "Route catalog stale, reloading");
        self.pages.reset(());
        self.pages.load_more().await
    }

    pub fn routes(&self) -> Vec<RouteRecord> {
        self.pages.items()
    }

    pub fn options(&self) -> Vec<FilterOption> {
        route_options(&self.pages.items())
    }

    pub fn has_more(&self) -> bool {
        self.pages.has_more()
    }

    pub fn is_loading(&self) -> bool {
        self.pages.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.pages.last_error()
    }
}
