//! Requirement trees.
//!
//! A [`TreeMap`] records which storage paths a level of the pipeline needs.
//! An empty subtree is a leaf; `*` means "every column of this level".

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TreeMap(BTreeMap<String, TreeMap>);

impl TreeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chain of keys, merging into existing subtrees.
    ///
    /// Inserting `["a", "b"]` into `{"a": {"c": {}}}` yields
    /// `{"a": {"b": {}, "c": {}}}`; an existing subtree is never replaced by a
    /// leaf.
    pub fn insert<S: AsRef<str>>(&mut self, parts: &[S]) -> &mut Self {
        let mut current = self;
        for part in parts {
            current = current.0.entry(part.as_ref().to_string()).or_default();
        }
        current
    }

    /// Merge another tree into this one.
    pub fn merge(&mut self, other: TreeMap) {
        for (key, child) in other.0 {
            self.0.entry(key).or_default().merge(child);
        }
    }

    /// Every root-to-leaf path.
    pub fn get_paths(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        for (key, child) in &self.0 {
            if child.is_empty() {
                paths.push(vec![key.clone()]);
            } else {
                for mut path in child.get_paths() {
                    path.insert(0, key.clone());
                    paths.push(path);
                }
            }
        }
        paths
    }

    pub fn get(&self, key: &str) -> Option<&TreeMap> {
        self.0.get(key)
    }

    pub fn pop(&mut self, key: &str) -> Option<TreeMap> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TreeMap)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: AsRef<str>> FromIterator<Vec<S>> for TreeMap {
    fn from_iter<I: IntoIterator<Item = Vec<S>>>(iter: I) -> Self {
        let mut tree = TreeMap::new();
        for path in iter {
            tree.insert(&path);
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_merges() {
        let mut tree = TreeMap::new();
        tree.insert(&["a", "c"]);
        tree.insert(&["a", "b"]);
        tree.insert(&["a"]);
        assert_eq!(
            tree.get_paths(),
            vec![vec!["a".to_string(), "b".to_string()], vec!["a".to_string(), "c".to_string()]]
        );
    }

    #[test]
    fn test_pop_removes_subtree() {
        let mut tree: TreeMap = vec![vec!["groups", "name"], vec!["name"]].into_iter().collect();
        let groups = tree.pop("groups").unwrap();
        assert!(groups.contains_key("name"));
        assert!(!tree.contains_key("groups"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_merge() {
        let mut left: TreeMap = vec![vec!["a", "b"]].into_iter().collect();
        let right: TreeMap = vec![vec!["a", "c"], vec!["d"]].into_iter().collect();
        left.merge(right);
        assert_eq!(left.get_paths().len(), 3);
    }

    #[test]
    fn test_serializes_as_nested_object() {
        let tree: TreeMap = vec![vec!["location", "*"]].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            serde_json::json!({"location": {"*": {}}})
        );
    }
}
