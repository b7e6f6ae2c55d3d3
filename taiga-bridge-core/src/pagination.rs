//! Page request normalization.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::model::PageRequest;

/// Server-side paging limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPolicy {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PagingPolicy {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl PagingPolicy {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        }
    }

    /// Turn caller-supplied paging into a page request.
    ///
    /// Returns `None` when neither value was given, which means the whole
    /// collection is fetched. Pages are 1-based; the size is clamped to
    /// `max_page_size`.
    pub fn resolve(
        &self,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> BridgeResult<Option<PageRequest>> {
        if page.is_none() && page_size.is_none() {
            return Ok(None);
        }

        let page = match page {
            None => 1,
            Some(0) => return Err(BridgeError::validation("page must be at least 1")),
            Some(p) => u32::try_from(p)
                .map_err(|_| BridgeError::validation("page is out of range"))?,
        };

        let page_size = match page_size {
            None => self.default_page_size,
            Some(0) => return Err(BridgeError::validation("page_size must be at least 1")),
            Some(size) => u32::try_from(size)
                .unwrap_or(u32::MAX)
                .min(self.max_page_size),
        };

        Ok(Some(PageRequest { page, page_size }))
    }
}
