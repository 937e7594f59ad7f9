//! Client-side page window over an in-memory list.
//!
//! `current_page` is 1-based and always within `1..=total_pages`; every
//! mutation re-clamps it, including a shrinking item count.

use std::ops::Range;

pub const DEFAULT_ITEMS_PER_PAGE: usize = 10;
pub const PAGE_SIZE_CHOICES: [usize; 4] = [10, 20, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    current_page: usize,
    items_per_page: usize,
    total_items: usize,
}

impl Paginator {
    pub fn new(total_items: usize, items_per_page: usize) -> Self {
        Self {
            current_page: 1,
            items_per_page: items_per_page.max(1),
            total_items,
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.go_to_page(page);
        self
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn items_per_page(&self) -> usize {
        self.items_per_page
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn total_pages(&self) -> usize {
        self.total_items.div_ceil(self.items_per_page).max(1)
    }

    pub fn start_index(&self) -> usize {
        (self.current_page - 1) * self.items_per_page
    }

    pub fn end_index(&self) -> usize {
        (self.start_index() + self.items_per_page).min(self.total_items)
    }

    pub fn range(&self) -> Range<usize> {
        self.start_index()..self.end_index()
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.current_page > 1
    }

    pub fn go_to_page(&mut self, page: usize) {
        self.current_page = page.clamp(1, self.total_pages());
    }

    pub fn next_page(&mut self) {
        self.go_to_page(self.current_page + 1);
    }

    pub fn previous_page(&mut self) {
        self.go_to_page(self.current_page.saturating_sub(1));
    }

    /// Changing the page size always returns to the first page.
    pub fn set_items_per_page(&mut self, items_per_page: usize) {
        self.items_per_page = items_per_page.max(1);
        self.current_page = 1;
    }

    pub fn set_total_items(&mut self, total_items: usize) {
        self.total_items = total_items;
        self.go_to_page(self.current_page);
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let end = self.end_index().min(items.len());
        &items[self.start_index().min(end)..end]
    }
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(0, DEFAULT_ITEMS_PER_PAGE)
    }
}
