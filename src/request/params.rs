//! Multi-valued query-string parameters.

use percent_encoding::percent_decode_str;

/// Ordered, multi-valued query parameters.
///
/// Keys may repeat (`include[]=a&include[]=b`); insertion order is kept so
/// that later filters replace earlier ones the way clients expect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

fn decode(text: &str) -> String {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (with or without a leading `?`).
    ///
    /// Pieces without `=` are kept with an empty value.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let pairs = query
            .split('&')
            .filter(|piece| !piece.is_empty())
            .map(|piece| match piece.split_once('=') {
                Some((key, value)) => (decode(key), decode(value)),
                None => (decode(piece), String::new()),
            })
            .collect();
        Self { pairs }
    }

    /// Append a value under a key.
    pub fn add(&mut self, key: &str, value: &str) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    /// Remove every value of a key, returning them.
    pub fn remove(&mut self, key: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.pairs.retain(|(k, v)| {
            if k == key {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Last value of a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values of a key, in order.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Distinct keys with all of their values, in first-appearance order.
    pub fn lists(&self) -> Vec<(String, Vec<String>)> {
        let mut lists: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in &self.pairs {
            match lists.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => values.push(value.clone()),
                None => lists.push((key.clone(), vec![value.clone()])),
            }
        }
        lists
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decodes_and_keeps_order() {
        let params = QueryParams::parse("?include[]=groups.&filter%7Bname%7D=a+b&include[]=location.");
        assert_eq!(params.get_list("include[]"), vec!["groups.", "location."]);
        assert_eq!(params.get("filter{name}"), Some("a b"));
    }

    #[test]
    fn test_get_returns_last_value() {
        let params = QueryParams::parse("page=1&page=3");
        assert_eq!(params.get("page"), Some("3"));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_bare_key_has_empty_value() {
        let params = QueryParams::parse("debug&&sideloading=false");
        assert_eq!(params.get("debug"), Some(""));
        assert!(params.contains_key("sideloading"));
    }

    #[test]
    fn test_lists_groups_values() {
        let params = QueryParams::parse("filter{id.in}=1&filter{id.in}=2&sort[]=name");
        assert_eq!(
            params.lists(),
            vec![
                ("filter{id.in}".to_string(), vec!["1".to_string(), "2".to_string()]),
                ("sort[]".to_string(), vec!["name".to_string()]),
            ]
        );
    }

    #[test]
    fn test_add_and_remove() {
        let mut params = QueryParams::parse("include[]=name");
        params.add("include[]", "groups.");
        assert_eq!(params.remove("include[]"), vec!["name", "groups."]);
        assert!(params.is_empty());
    }
}
