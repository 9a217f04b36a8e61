//! Pagination metadata for list responses

use serde::{Deserialize, Serialize};

/// Pagination metadata for response
///
/// Contains information about the current page and total results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    /// Current page number (1-indexed)
    pub page: i64,

    /// Items per page
    pub limit: i64,

    /// Total number of matching items
    pub total: i64,

    /// Total number of pages
    pub total_pages: i64,

    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMetadata {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total <= 0 || limit <= 0 {
            0
        } else {
            (total + limit - 1) / limit
        };

        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_round_up() {
        let meta = PaginationMetadata::new(1, 20, 41);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next);
        assert!(!meta.has_prev);
    }

    #[test]
    fn test_last_page() {
        let meta = PaginationMetadata::new(3, 20, 41);
        assert!(!meta.has_next);
        assert!(meta.has_prev);
    }

    #[test]
    fn test_empty_result() {
        let meta = PaginationMetadata::new(1, 20, 0);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next);
        assert!(!meta.has_prev);
    }
}
