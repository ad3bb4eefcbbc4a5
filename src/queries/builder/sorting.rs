//! `sort[]` terms to storage ordering.

use crate::db::OrderTerm;
use crate::error::ApiError;
use crate::schema::{Catalog, SchemaDef};
use crate::utils::split_path;

use super::predicates::resolve_path;

/// Resolve sort terms (`name`, `-location.name`) against a schema.
///
/// # Arguments
/// * `terms` - Client sort terms; `-` prefix sorts descending
/// * `allowed` - Field paths a client may sort by; `None` allows any path
///   that resolves
///
/// # Errors
/// `ApiError::Validation` listing every term that is not allowed or does not
/// resolve.
pub fn ordering(
    catalog: &Catalog,
    schema: &SchemaDef,
    terms: &[String],
    allowed: Option<&[String]>,
) -> Result<Vec<OrderTerm>, ApiError> {
    let mut ordering = Vec::with_capacity(terms.len());
    let mut invalid = Vec::new();
    for term in terms {
        let (descending, name) = match term.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, term.as_str()),
        };
        if allowed.is_some_and(|allowed| !allowed.iter().any(|a| a == name)) {
            invalid.push(term.clone());
            continue;
        }
        match resolve_path(catalog, schema, &split_path(name)) {
            Ok((path, _)) => ordering.push(OrderTerm { path, descending }),
            Err(_) => invalid.push(term.clone()),
        }
    }
    if !invalid.is_empty() {
        return Err(ApiError::Validation(format!(
            "Invalid ordering: {}",
            invalid.join(", ")
        )));
    }
    Ok(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn terms(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolves_through_relations() {
        let (catalog, _) = test_utils::catalog();
        let schema = catalog.schema("user").unwrap();
        let ordering = ordering(&catalog, schema, &terms(&["-location.name", "id"]), None).unwrap();
        assert_eq!(
            ordering,
            vec![OrderTerm::desc(&["location", "name"]), OrderTerm::asc(&["id"])]
        );
    }

    #[test]
    fn test_rejects_terms_outside_allowed_fields() {
        let (catalog, _) = test_utils::catalog();
        let schema = catalog.schema("user").unwrap();
        let allowed = terms(&["name"]);
        let err = ordering(&catalog, schema, &terms(&["-id", "name", "nope"]), Some(&allowed)).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "Invalid ordering: -id, nope");
    }

    #[test]
    fn test_unresolvable_term() {
        let (catalog, _) = test_utils::catalog();
        let schema = catalog.schema("user").unwrap();
        let err = ordering(&catalog, schema, &terms(&["favorite_pet"]), None).unwrap_err();
        assert_eq!(err.to_string(), "Invalid ordering: favorite_pet");
    }
}
