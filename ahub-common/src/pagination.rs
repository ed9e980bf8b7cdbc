//! Pagination utilities shared by all listing endpoints

use serde::{Deserialize, Serialize};

/// Page size used when the client does not ask for one
pub const DEFAULT_PER_PAGE: i64 = 25;

/// Largest page size a client may request
pub const MAX_PER_PAGE: i64 = 100;

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    /// Rows per page after clamping
    pub per_page: i64,
    /// Total number of pages
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

/// Calculate pagination metadata from total results and requested page
///
/// `per_page` is clamped to `[1, MAX_PER_PAGE]` and the page to `[1, total_pages]`.
///
/// # Examples
/// ```
/// use ahub_common::pagination::calculate_pagination;
///
/// // 60 results at 25 per page = 3 pages (25 + 25 + 10)
/// let p = calculate_pagination(60, 2, Some(25));
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 25);
///
/// // Requesting out-of-bounds page gets clamped
/// let p = calculate_pagination(60, 99, Some(25));
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 50);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: i64, per_page: Option<i64>) -> Pagination {
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let total_pages = (total_results + per_page - 1) / per_page;
    let page = requested_page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * per_page;

    Pagination {
        page,
        per_page,
        total_pages,
        offset,
    }
}

/// One page of results with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, p: Pagination) -> Self {
        Self {
            items,
            page: p.page,
            per_page: p.per_page,
            total,
            total_pages: p.total_pages,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

/// Soft-delete visibility for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletedFilter {
    /// Live rows only
    #[default]
    Exclude,
    /// Live and soft-deleted rows
    Include,
    /// Soft-deleted rows only (trash view)
    Only,
}

impl DeletedFilter {
    /// SQL predicate over a `deleted_at` column, or `None` for no restriction
    pub fn predicate(&self, column: &str) -> Option<String> {
        match self {
            DeletedFilter::Exclude => Some(format!("{} IS NULL", column)),
            DeletedFilter::Include => None,
            DeletedFilter::Only => Some(format!("{} IS NOT NULL", column)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normal() {
        let p = calculate_pagination(250, 2, Some(100));
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_default_page_size() {
        let p = calculate_pagination(30, 1, None);
        assert_eq!(p.per_page, DEFAULT_PER_PAGE);
        assert_eq!(p.total_pages, 2);
    }

    #[test]
    fn test_pagination_per_page_clamped() {
        assert_eq!(calculate_pagination(10, 1, Some(0)).per_page, 1);
        assert_eq!(calculate_pagination(10, 1, Some(5000)).per_page, MAX_PER_PAGE);
    }

    #[test]
    fn test_pagination_out_of_bounds_high() {
        let p = calculate_pagination(150, 99, Some(100));
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 2);
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_out_of_bounds_low() {
        let p = calculate_pagination(150, -3, Some(100));
        assert_eq!(p.page, 1);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_empty() {
        let p = calculate_pagination(0, 1, None);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_exact_page_boundary() {
        let p = calculate_pagination(50, 2, Some(25));
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 2);
        assert_eq!(p.offset, 25);
    }

    #[test]
    fn test_deleted_predicate() {
        assert_eq!(
            DeletedFilter::Exclude.predicate("c.deleted_at").as_deref(),
            Some("c.deleted_at IS NULL")
        );
        assert_eq!(DeletedFilter::Include.predicate("deleted_at"), None);
        assert_eq!(
            DeletedFilter::Only.predicate("deleted_at").as_deref(),
            Some("deleted_at IS NOT NULL")
        );
    }
}
