//! The resource servicing engine: due computation on the read path, the
//! service lifecycle and its journal on the write path.

pub mod actor;
pub mod audit;
pub mod catalog;
pub mod lifecycle;
pub mod priority;
pub mod threshold;
pub mod usage;

use serde::{Deserialize, Serialize};

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Self {
        Page {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.page_size)
    }

    /// Cut this page out of an already ordered list.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.page_size as usize)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total_count: i64, page: Page) -> Self {
        Paged {
            items,
            total_count,
            page: page.page,
            page_size: page.page_size,
        }
    }
}
