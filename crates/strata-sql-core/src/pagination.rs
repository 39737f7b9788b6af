//! Paginated result sets.

use serde::Serialize;

/// One page of results plus the numbers needed to render pagination.
///
/// `total` comes from a separate COUNT query issued concurrently with the
/// data query; the two do not share a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginated<T> {
    /// Rows on this page.
    pub data: Vec<T>,
    /// Total number of matching rows.
    pub total: u64,
    /// Current page (1-based).
    pub page: u64,
    /// Page size.
    pub per_page: u64,
    /// Number of the last page (at least 1).
    pub last_page: u64,
}

impl<T> Paginated<T> {
    /// Creates a page and computes the page count.
    pub fn new(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let last_page = if per_page == 0 {
            1
        } else {
            total.div_ceil(per_page).max(1)
        };
        Self {
            data,
            total,
            page,
            per_page,
            last_page,
        }
    }

    /// Returns whether pages follow this one.
    #[must_use]
    pub fn has_more_pages(&self) -> bool {
        self.page < self.last_page
    }

    /// Transforms the rows while keeping the page numbers.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            last_page: self.last_page,
        }
    }
}
