//! Page/limit handling for the paginated regional endpoint.

use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
};
use serde::{Deserialize, Serialize};

/// Raw `page` / `limit` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    /// Resolves the request against configured defaults: `page` below 1 is
    /// raised to 1 and `limit` is clamped to `[1, max_page_size]`.
    pub fn resolve(query: &PageQuery, config: &AppConfig) -> Result<Self> {
        let page = parse_param("page", query.page.as_deref())?.unwrap_or(1);
        let limit = parse_param("limit", query.limit.as_deref())?
            .unwrap_or(config.default_page_size);

        Ok(Self {
            page: page.max(1),
            limit: limit.clamp(1, config.max_page_size.max(1)),
        })
    }

    pub fn first(limit: i64) -> Self {
        Self {
            page: 1,
            limit: limit.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn meta(&self, total: i64) -> PaginationMeta {
        PaginationMeta {
            page: self.page,
            limit: self.limit,
            total,
            total_pages: total_pages(total, self.limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

pub fn total_pages(total: i64, limit: i64) -> i64 {
    if total <= 0 || limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}

fn parse_param(name: &str, raw: Option<&str>) -> Result<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
            ServiceError::InvalidRequest(format!("{name} must be a positive integer"))
        }),
    }
}
