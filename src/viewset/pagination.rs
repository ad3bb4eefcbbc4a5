//! Page-number pagination.
//!
//! A request is paged when it names a page size or the settings define a
//! default one. The total count costs one extra round trip; with
//! `exclude_count` it is skipped and one extra row is fetched instead to
//! report `more_pages`.

use serde::Serialize;
use serde_json::Value;

use crate::config::Settings;
use crate::db::{DatabaseBackend, Query};
use crate::error::ApiError;
use crate::request::RequestFeatures;

const LAST_PAGE: &str = "last";

fn invalid_page() -> ApiError {
    ApiError::NotFound("Invalid page.".to_string())
}

/// The page a request asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// `None` means the last page
    pub number: Option<usize>,
    pub per_page: usize,
    pub exclude_count: bool,
}

impl PageRequest {
    /// Read paging parameters. Returns `None` when the request is not paged.
    ///
    /// A `per_page` that is not a positive number falls back to the default
    /// size; sizes above `max_page_size` are capped.
    ///
    /// # Errors
    /// `ApiError::NotFound` for a page number that is not a positive integer.
    pub fn from_features(features: &RequestFeatures, settings: &Settings) -> Result<Option<Self>, ApiError> {
        let requested = features
            .per_page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);
        let Some(mut per_page) = requested.or(settings.page_size) else {
            return Ok(None);
        };
        if let Some(max) = settings.max_page_size {
            per_page = per_page.min(max);
        }

        let number = match features.page.as_deref().map(str::trim) {
            None | Some("") => Some(1),
            Some(LAST_PAGE) => None,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 => Some(n),
                _ => return Err(invalid_page()),
            },
        };
        Ok(Some(Self {
            number,
            per_page,
            exclude_count: features.exclude_count,
        }))
    }

    /// Count (unless excluded), validate the page number and slice the query.
    ///
    /// # Errors
    /// `ApiError::NotFound` for pages past the end.
    pub fn apply(&self, backend: &dyn DatabaseBackend, query: Query) -> Result<(Query, Page), ApiError> {
        if self.exclude_count {
            let number = self.number.ok_or_else(invalid_page)?;
            let offset = self.offset(number)?;
            let limit = self.per_page.checked_add(1).ok_or_else(invalid_page)?;
            let page = Page {
                page: number,
                per_page: self.per_page,
                total_results: None,
                total_pages: None,
                more_pages: None,
            };
            return Ok((query.slice(offset, Some(limit)), page));
        }

        let total = backend.count(&query).map_err(ApiError::from_filter_error)?;
        let total_pages = total.div_ceil(self.per_page).max(1);
        let number = self.number.unwrap_or(total_pages);
        if number > total_pages {
            return Err(invalid_page());
        }
        let offset = self.offset(number)?;
        let page = Page {
            page: number,
            per_page: self.per_page,
            total_results: Some(total),
            total_pages: Some(total_pages),
            more_pages: None,
        };
        Ok((query.slice(offset, Some(self.per_page)), page))
    }

    /// Rows before page `number`; pages too far out to address are invalid.
    fn offset(&self, number: usize) -> Result<usize, ApiError> {
        number
            .checked_sub(1)
            .and_then(|skipped| skipped.checked_mul(self.per_page))
            .ok_or_else(invalid_page)
    }
}

/// Page metadata reported under `meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub page: usize,
    pub per_page: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_results: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub more_pages: Option<bool>,
}

impl Page {
    /// Trim the extra row fetched for `exclude_count` and record whether it
    /// was there.
    pub fn settle(&mut self, fetched: usize) -> usize {
        if self.total_results.is_some() {
            return fetched;
        }
        self.more_pages = Some(fetched > self.per_page);
        fetched.min(self.per_page)
    }

    pub fn meta(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
