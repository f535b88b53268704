use serde::{Deserialize, Serialize};

/// One page of a filtered listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn empty(page: u32, limit: u32) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page,
            limit,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit)) as u32
    }
}
