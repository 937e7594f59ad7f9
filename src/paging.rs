//! Offset-based "fetch more" accumulation.
//!
//! A [`PagedLoader`] grows an in-memory list one page at a time for a single
//! query key. Changing the key through [`PagedLoader::reset`] discards the
//! accumulation, cancels any in-flight page and bumps the generation, so a
//! late response for the old key is dropped instead of appended.
//!
//! There is no total-count field upstream: a page as long as the requested
//! limit means "more may exist". A final page that happens to be exactly full
//! is therefore followed by one more (empty) request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::schedule::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    pub offset: usize,
    pub limit: usize,
}

impl FetchCursor {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// Cursor for the page following `pages_loaded` full pages.
    pub fn after(pages_loaded: usize, limit: usize) -> Self {
        Self {
            offset: pages_loaded * limit,
            limit,
        }
    }

    /// Whether a page of `len` records fetched at this cursor may have a successor.
    pub fn has_more_after(&self, len: usize) -> bool {
        len >= self.limit
    }
}

/// Fetches single pages for a query key.
#[async_trait]
pub trait PageSource<K, T>: Send + Sync {
    async fn fetch_page(
        &self,
        key: &K,
        cursor: FetchCursor,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, FetchError>;

    /// A disabled key is never fetched and reports no further pages.
    fn is_enabled(&self, _key: &K) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { items: usize, has_more: bool },
    /// Nothing to do: disabled key, exhausted, or a page already in flight.
    Skipped,
    /// The key changed while the page was in flight; the result was dropped.
    Superseded,
}

struct PageState<K, T> {
    key: K,
    generation: u64,
    pages: Vec<Vec<T>>,
    exhausted: bool,
    in_flight: Option<CancellationToken>,
    last_error: Option<String>,
    loaded_at: Option<Instant>,
}

pub struct PagedLoader<K, T> {
    source: Arc<dyn PageSource<K, T>>,
    page_size: usize,
    stale_after: Duration,
    state: Mutex<PageState<K, T>>,
}

impl<K, T> PagedLoader<K, T>
where
    K: Clone + PartialEq + Send + Sync,
    T: Clone + Send,
{
    pub fn new(
        source: Arc<dyn PageSource<K, T>>,
        key: K,
        page_size: usize,
        stale_after: Duration,
    ) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            stale_after,
            state: Mutex::new(PageState {
                key,
                generation: 0,
                pages: Vec::new(),
                exhausted: false,
                in_flight: None,
                last_error: None,
                loaded_at: None,
            }),
        }
    }

    /// Fetches the next page for the current key and appends it.
    pub async fn load_more(&self) -> Result<LoadOutcome, FetchError> {
        let generation = self.generation();
        self.load_more_for(generation).await
    }

    /// Like [`load_more`](Self::load_more), but only if the loader is still
    /// on `generation`. Used by delayed loads that must not cross a reset.
    pub async fn load_more_for(&self, generation: u64) -> Result<LoadOutcome, FetchError> {
        let (key, cursor, cancel) = {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return Ok(LoadOutcome::Superseded);
            }
            if !self.source.is_enabled(&state.key) || state.exhausted || state.in_flight.is_some()
            {
                return Ok(LoadOutcome::Skipped);
            }
            let cancel = CancellationToken::new();
            state.in_flight = Some(cancel.clone());
            let cursor = FetchCursor::after(state.pages.len(), self.page_size);
            (state.key.clone(), cursor, cancel)
        };

        let _in_flight = InFlight {
            state: &self.state,
            generation,
        };
        let result = self.source.fetch_page(&key, cursor, &cancel).await;

        let mut state = lock(&self.state);
        if state.generation != generation {
            debug!(offset = cursor.offset, "Dropping page for superseded query");
            return Ok(LoadOutcome::Superseded);
        }
        state.in_flight = None;

        match result {
            Ok(items) => {
                let count = items.len();
                let has_more = cursor.has_more_after(count);
                state.exhausted = !has_more;
                state.pages.push(items);
                state.loaded_at = Some(Instant::now());
                state.last_error = None;
                debug!(offset = cursor.offset, count, has_more, "Page loaded");
                Ok(LoadOutcome::Loaded {
                    items: count,
                    has_more,
                })
            }
            Err(e) if e.is_cancelled() => Ok(LoadOutcome::Superseded),
            Err(e) => {
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Switches to `key`, discarding accumulated pages and cancelling any page
    /// in flight. Returns the new generation.
    pub fn reset(&self, key: K) -> u64 {
        let mut state = lock(&self.state);
        state.generation += 1;
        if let Some(cancel) = state.in_flight.take() {
            cancel.cancel();
        }
        state.key = key;
        state.pages.clear();
        state.exhausted = false;
        state.last_error = None;
        state.loaded_at = None;
        state.generation
    }

    /// All accumulated records, in page order.
    pub fn items(&self) -> Vec<T> {
        lock(&self.state).pages.iter().flatten().cloned().collect()
    }

    pub fn key(&self) -> K {
        lock(&self.state).key.clone()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    pub fn pages_loaded(&self) -> usize {
        lock(&self.state).pages.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_enabled(&lock(&self.state).key)
    }

    pub fn has_more(&self) -> bool {
        let state = lock(&self.state);
        self.source.is_enabled(&state.key) && !state.exhausted
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    /// True once the first page is older than the staleness window.
    pub fn is_stale(&self) -> bool {
        lock(&self.state)
            .loaded_at
            .is_some_and(|at| at.elapsed() >= self.stale_after)
    }
}

/// Clears the in-flight marker if the load future is dropped before it settles.
struct InFlight<'a, K, T> {
    state: &'a Mutex<PageState<K, T>>,
    generation: u64,
}

impl<K, T> Drop for InFlight<'_, K, T> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        if state.generation == self.generation {
            state.in_flight = None;
        }
    }
}
