//! Pagination
//!
//! Uniform filter/page contract shared by every list operation.

use serde::{Deserialize, Serialize};

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not specify one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Paging, sorting and search parameters for a list request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Sort key, `-` prefix for descending
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
            sort: None,
            search: None,
        }
    }
}

/// Rejected pagination input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("Page must be at least 1 (got {0})")]
    InvalidPage(u32),

    #[error("Page size must be between 1 and 100 (got {0})")]
    InvalidPageSize(u32),

    #[error("Unknown sort key: {0}")]
    UnknownSortKey(String),
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn validate(&self) -> Result<(), PageError> {
        if self.page < 1 {
            return Err(PageError::InvalidPage(self.page));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(PageError::InvalidPageSize(self.page_size));
        }
        Ok(())
    }

    /// Rows to skip
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    /// Trimmed search term, `None` when blank
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: i64, request: &PageRequest) -> Self {
        Self {
            items,
            total_count,
            page: request.page,
            page_size: request.page_size,
        }
    }

    /// Slice an already filtered and ordered collection
    pub fn from_sorted(all: Vec<T>, request: &PageRequest) -> Self {
        let total_count = all.len() as i64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.page_size as usize)
            .collect();
        Self::new(items, total_count, request)
    }

    pub fn total_pages(&self) -> i64 {
        if self.page_size == 0 {
            return 0;
        }
        let size = i64::from(self.page_size);
        (self.total_count + size - 1) / size
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bounds() {
        assert!(PageRequest::new(1, 1).validate().is_ok());
        assert!(PageRequest::new(3, MAX_PAGE_SIZE).validate().is_ok());
        assert_eq!(
            PageRequest::new(0, 10).validate(),
            Err(PageError::InvalidPage(0))
        );
        assert_eq!(
            PageRequest::new(1, 0).validate(),
            Err(PageError::InvalidPageSize(0))
        );
        assert_eq!(
            PageRequest::new(1, MAX_PAGE_SIZE + 1).validate(),
            Err(PageError::InvalidPageSize(MAX_PAGE_SIZE + 1))
        );
    }

    #[test]
    fn test_from_sorted_slices_and_counts() {
        let page = Page::from_sorted((1..=25).collect::<Vec<_>>(), &PageRequest::new(3, 10));
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total_count, 25);
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let page = Page::from_sorted(vec![1, 2], &PageRequest::new(2, 10));
        assert!(page.is_empty());
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn test_search_term_blank_is_none() {
        assert_eq!(PageRequest::default().with_search("   ").search_term(), None);
        assert_eq!(
            PageRequest::default().with_search(" solar ").search_term(),
            Some("solar")
        );
    }
}
