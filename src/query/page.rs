use crate::error::AppError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: u64 = 10;
pub const MAX_PER_PAGE: u64 = 100;

/// 1-based page number and page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "first_page")]
    pub page: u64,
    #[serde(default = "default_per")]
    pub per: u64,
}

fn first_page() -> u64 {
    1
}

fn default_per() -> u64 {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 1,
            per: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u64, per: u64) -> Self {
        PageRequest { page, per }
    }

    pub(crate) fn check(&self) -> Result<(), AppError> {
        if self.page == 0 {
            return Err(AppError::BadRequest("page numbers start at 1".into()));
        }
        if self.per == 0 || self.per > MAX_PER_PAGE {
            return Err(AppError::BadRequest(format!("per must be between 1 and {}", MAX_PER_PAGE)));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub metadata: PageMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub page: u64,
    pub per: u64,
    /// Matches across all pages.
    pub total: u64,
}

impl PageMetadata {
    pub fn page_count(&self) -> u64 {
        self.total.div_ceil(self.per.max(1))
    }
}

/// Totals for a chunked scan; the batches themselves only reach the callback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub batches: u64,
    pub records: u64,
    pub failures: u64,
}
