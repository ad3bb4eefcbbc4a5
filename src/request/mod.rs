//! Request feature parsing.
//!
//! Turns a raw query string into [`RequestFeatures`]: which fields to render
//! (`include[]`, `exclude[]`), how to filter (`filter{...}`, `filter`), how to
//! sort (`sort[]`), which page to return and the per-request toggles
//! (`sideloading`, `debug`).

mod fields;
mod filters;
mod params;

pub use fields::{FieldRequest, RequestFields};
pub use filters::{Clause, FilterNode, FilterTree};
pub use params::QueryParams;

use crate::config::Settings;
use crate::error::ApiError;
use crate::utils::is_truthy;

pub const INCLUDE: &str = "include[]";
pub const EXCLUDE: &str = "exclude[]";
pub const SORT: &str = "sort[]";
pub const DEBUG: &str = "debug";
pub const SIDELOADING: &str = "sideloading";

/// Everything the pipeline reads from one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFeatures {
    pub fields: RequestFields,
    pub filters: FilterTree,
    pub sort: Vec<String>,
    /// Raw `page` value (name configurable).
    pub page: Option<String>,
    /// Raw `per_page` value (name configurable).
    pub per_page: Option<String>,
    /// Skip the total count and report `more_pages` instead.
    pub exclude_count: bool,
    /// `Some(false)` disables sideloading for this request.
    pub sideloading: Option<bool>,
    pub debug: Option<bool>,
}

impl RequestFeatures {
    /// Parse a raw query string.
    pub fn parse(query: &str, settings: &Settings) -> Result<Self, ApiError> {
        Self::from_params(&QueryParams::parse(query), settings)
    }

    /// Extract every supported feature from parsed parameters.
    ///
    /// # Errors
    /// `ApiError::Parse` for malformed field paths and filter keys,
    /// `ApiError::Validation` for malformed complex filters.
    pub fn from_params(params: &QueryParams, settings: &Settings) -> Result<Self, ApiError> {
        let fields = RequestFields::from_features(&params.get_list(INCLUDE), &params.get_list(EXCLUDE))?;
        let filters = FilterTree::from_params(params)?;
        let sort = params
            .get_list(SORT)
            .iter()
            .flat_map(|term| term.split(','))
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        let flag = |name: &str| params.get(name).map(is_truthy);

        Ok(Self {
            fields,
            filters,
            sort,
            page: params.get(&settings.page_query_param).map(str::to_string),
            per_page: params.get(&settings.page_size_query_param).map(str::to_string),
            exclude_count: flag(&settings.exclude_count_query_param).unwrap_or(false),
            sideloading: flag(SIDELOADING),
            debug: flag(DEBUG),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_features() {
        let settings = Settings::default();
        let features = RequestFeatures::parse(
            "include[]=groups.&exclude[]=name&filter{id.gt}=1&sort[]=-name&page=2&per_page=10&sideloading=false&debug=1",
            &settings,
        )
        .unwrap();
        assert_eq!(features.fields.get("name"), Some(&FieldRequest::Exclude));
        assert!(matches!(features.fields.get("groups"), Some(FieldRequest::Nested(_))));
        assert!(features.filters.include.contains_key("id__gt"));
        assert_eq!(features.sort, vec!["-name"]);
        assert_eq!(features.page.as_deref(), Some("2"));
        assert_eq!(features.per_page.as_deref(), Some("10"));
        assert_eq!(features.sideloading, Some(false));
        assert_eq!(features.debug, Some(true));
        assert!(!features.exclude_count);
    }

    #[test]
    fn test_configured_page_params() {
        let settings = Settings {
            page_query_param: "p".into(),
            page_size_query_param: "size".into(),
            ..Settings::default()
        };
        let features = RequestFeatures::parse("p=3&size=5&page=9", &settings).unwrap();
        assert_eq!(features.page.as_deref(), Some("3"));
        assert_eq!(features.per_page.as_deref(), Some("5"));
    }

    #[test]
    fn test_toggles_default_to_none() {
        let features = RequestFeatures::parse("", &Settings::default()).unwrap();
        assert_eq!(features.sideloading, None);
        assert_eq!(features.debug, None);
        assert!(features.fields.is_empty());
    }

    #[test]
    fn test_invalid_field_path() {
        let err = RequestFeatures::parse("include[]=groups..name", &Settings::default()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
