//! Page/page_size handling for list endpoints

use crate::error::QueryError;
use crate::storage::PageWindow;
use serde::{Deserialize, Serialize};

/// Page size used when the request does not specify one
pub const DEFAULT_PAGE_SIZE: i64 = 25;

/// Larger page sizes are silently clamped to this value
pub const MAX_PAGE_SIZE: i64 = 200;

/// Validated pagination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Build from already-parsed numbers
    pub fn new(page: i64, page_size: i64) -> Result<Self, QueryError> {
        if page < 1 || page_size < 1 {
            return Err(QueryError::InvalidPagination);
        }
        let page_size = page_size.min(MAX_PAGE_SIZE);
        // offset must stay representable
        (page - 1)
            .checked_mul(page_size)
            .ok_or(QueryError::InvalidPagination)?;
        Ok(Self { page, page_size })
    }

    /// Parse raw query-string values; empty or absent values use defaults
    pub fn parse(page: Option<&str>, page_size: Option<&str>) -> Result<Self, QueryError> {
        fn number(raw: Option<&str>, default: i64) -> Result<i64, QueryError> {
            match raw.map(str::trim).filter(|v| !v.is_empty()) {
                None => Ok(default),
                Some(v) => v.parse::<i64>().map_err(|_| QueryError::InvalidPagination),
            }
        }

        Self::new(number(page, 1)?, number(page_size, DEFAULT_PAGE_SIZE)?)
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// Storage window that over-fetches by one row
    pub fn window(&self) -> PageWindow {
        PageWindow {
            limit: self.page_size + 1,
            offset: (self.page - 1) * self.page_size,
        }
    }

    /// Trim an over-fetched result into a page
    pub fn finish<T>(&self, mut rows: Vec<T>) -> Page<T> {
        let limit = self.page_size as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        Page {
            data: rows,
            pagination: PageInfo {
                page: self.page,
                page_size: self.page_size,
                has_more,
            },
        }
    }
}

/// Pagination metadata returned with every list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let req = PageRequest::parse(None, Some("")).unwrap();
        assert_eq!(req, PageRequest::default());
        assert_eq!(req.window(), PageWindow { limit: 26, offset: 0 });
    }

    #[test]
    fn test_page_size_capped() {
        let req = PageRequest::parse(Some("3"), Some("1000")).unwrap();
        assert_eq!(req.page_size(), MAX_PAGE_SIZE);
        assert_eq!(req.window(), PageWindow { limit: 201, offset: 400 });
    }

    #[test]
    fn test_rejects_bad_values() {
        for (page, size) in [
            (Some("0"), None),
            (Some("-1"), None),
            (Some("abc"), None),
            (None, Some("0")),
            (None, Some("2.5")),
            (Some("9223372036854775807"), Some("200")),
        ] {
            assert!(
                matches!(PageRequest::parse(page, size), Err(QueryError::InvalidPagination)),
                "accepted {:?}/{:?}",
                page,
                size
            );
        }
    }

    #[test]
    fn test_finish_has_more() {
        let req = PageRequest::new(1, 2).unwrap();
        let page = req.finish(vec![1, 2, 3]);
        assert_eq!(page.data, vec![1, 2]);
        assert!(page.pagination.has_more);

        let page = req.finish(vec![1, 2]);
        assert_eq!(page.data, vec![1, 2]);
        assert!(!page.pagination.has_more);
    }

    #[test]
    fn test_serialized_shape() {
        let page = PageRequest::default().finish(vec!["a"]);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "data": ["a"],
                "pagination": {"page": 1, "page_size": 25, "has_more": false}
            })
        );
    }
}
