//! Requirement trees and column projection.

use crate::db::schema::ModelDef;
use crate::serializer::DynamicSerializer;
use crate::tree::TreeMap;
use crate::utils::split_path;

/// Insert the storage paths every visible field needs into `tree`.
///
/// A trailing `.` (`location.`) asks for every column of the last hop and is
/// stored as `*`.
pub fn collect(serializer: &DynamicSerializer, tree: &mut TreeMap) {
    for field in serializer.visible_fields() {
        for requirement in field.requirements() {
            if requirement.is_empty() {
                continue;
            }
            let mut parts = split_path(&requirement);
            if let Some(last) = parts.last_mut().filter(|last| last.is_empty()) {
                *last = "*".to_string();
            }
            tree.insert(&parts);
        }
    }
}

/// Columns to load for one level: the pk, every fk column, and the local
/// column of each remaining first-level requirement.
pub fn projection(model: &ModelDef, tree: &TreeMap) -> Vec<String> {
    let mut columns = model.id_columns();
    for key in tree.keys() {
        if model.is_field_remote(key) {
            continue;
        }
        if let Some(column) = model.local_column(key) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::request::RequestFields;
    use crate::serializer::RequestContext;
    use crate::test_utils;

    #[test]
    fn test_collect_visible_requirements() {
        let (catalog, _) = test_utils::catalog();
        let settings = Settings::default();
        let ctx = RequestContext::new(&catalog, &settings);
        let schema = catalog.schema("user").unwrap().clone();
        let include = vec!["number_of_cats".to_string(), "display_name".to_string()];
        let fields = RequestFields::from_features(&include, &[]).unwrap();
        let serializer = DynamicSerializer::root(&ctx, schema, fields).unwrap();

        let mut tree = TreeMap::new();
        collect(&serializer, &mut tree);
        let mut paths = tree.get_paths();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                vec!["id".to_string()],
                vec!["location".to_string(), "cats".to_string(), "*".to_string()],
                vec!["name".to_string()],
                vec!["profile".to_string(), "display_name".to_string()],
            ]
        );
    }

    #[test]
    fn test_projection_skips_remote_relations() {
        let (catalog, _) = test_utils::catalog();
        let model = catalog.model("User").unwrap();
        let mut tree = TreeMap::new();
        tree.insert(&["name"]);
        tree.insert(&["groups"]);
        tree.insert(&["profile", "display_name"]);
        assert_eq!(
            projection(model, &tree),
            vec!["id", "location_id", "favorite_pet_type", "favorite_pet_id", "name"]
        );
    }
}
