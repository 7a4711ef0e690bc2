use rocket::FromForm;
use serde::Serialize;

/// `limit`/`offset` pagination parameters, taken from the query string.
#[derive(Debug, Copy, Clone, FromForm)]
pub struct PaginationRequest {
    #[field(default = 50)]
    pub limit: u32,
    #[field(default = 0)]
    pub offset: u32,
}

impl PaginationRequest {
    /// Number of documents to skip.
    pub fn skip(&self) -> u64 {
        u64::from(self.offset)
    }

    /// Page size as the driver wants it.
    pub fn page_size(&self) -> i64 {
        i64::from(self.limit)
    }

    /// Wrap one page of results together with the total count.
    pub fn to_paginated<T>(self, total: u64, items: Vec<T>) -> Paginated<T> {
        Paginated {
            limit: self.limit,
            offset: self.offset,
            total,
            items,
        }
    }
}

/// One page of results.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
    pub items: Vec<T>,
}
