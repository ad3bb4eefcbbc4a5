//! Sideloading: flattening a rendered tree into a response envelope.
//!
//! Every tagged record below the primary level is moved into a top-level
//! bucket named after its resource's plural name and replaced in place by
//! its primary key (`{type, id}` for generic relations). Buckets hold each
//! record once; a record seen again only merges its fields into the stored
//! copy. Embedded records stay where they are.
//!
//! The transform is pure: the input tree is consumed and a new tree is
//! produced, so a record rendered under several parents never aliases.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::dedup::DeduplicationFilter;
use crate::serializer::{DynamicSerializer, Tagged, TaggedDict};

/// A flattened response body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Key of the primary data: the plural name for lists, the singular name
    /// for a single record
    pub primary: String,
    pub data: Value,
    /// Sideloaded records per resource, in discovery order
    pub buckets: Vec<(String, Vec<Value>)>,
    pub meta: Option<Value>,
}

impl Envelope {
    pub fn bucket(&self, name: &str) -> Option<&[Value]> {
        self.buckets
            .iter()
            .find(|(bucket, _)| bucket == name)
            .map(|(_, records)| records.as_slice())
    }

    /// The envelope as one JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.primary.clone(), self.data.clone());
        for (name, records) in &self.buckets {
            map.insert(name.clone(), Value::Array(records.clone()));
        }
        if let Some(meta) = &self.meta {
            map.insert("meta".to_string(), meta.clone());
        }
        Value::Object(map)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 1 + self.buckets.len() + usize::from(self.meta.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(&self.primary, &self.data)?;
        for (name, records) in &self.buckets {
            map.serialize_entry(name, records)?;
        }
        if let Some(meta) = &self.meta {
            map.serialize_entry("meta", meta)?;
        }
        map.end()
    }
}

pub struct SideloadingProcessor {
    name: String,
    plural_name: String,
    prefix: String,
    /// (bucket, pk) pairs already rendered
    seen: DeduplicationFilter<(String, String)>,
    buckets: Vec<(String, Vec<TaggedDict>)>,
}

impl SideloadingProcessor {
    /// # Arguments
    /// * `name` / `plural_name` - Names of the primary resource
    /// * `prefix` - Bucket prefix for secondary records of the primary resource
    pub fn new(name: &str, plural_name: &str, prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            plural_name: plural_name.to_string(),
            prefix: prefix.to_string(),
            seen: DeduplicationFilter::new(),
            buckets: Vec::new(),
        }
    }

    pub fn for_serializer(serializer: &DynamicSerializer, prefix: &str) -> Self {
        let schema = serializer.schema();
        Self::new(&schema.name, &schema.plural_name(), prefix)
    }

    /// Flatten rendered data into an envelope.
    pub fn process(mut self, data: Tagged) -> Envelope {
        let primary = match data {
            Tagged::Dict(_) => self.name.clone(),
            _ => self.plural_name.clone(),
        };
        let data = self.visit(data, 0).to_value();
        let buckets = self
            .buckets
            .into_iter()
            .map(|(name, records)| {
                let records = records.into_iter().map(|r| Tagged::Dict(r).to_value()).collect();
                (name, records)
            })
            .collect();
        Envelope {
            primary,
            data,
            buckets,
            meta: None,
        }
    }

    fn visit(&mut self, node: Tagged, depth: usize) -> Tagged {
        match node {
            Tagged::Value(value) => Tagged::Value(value),
            Tagged::List(items) => Tagged::List(items.into_iter().map(|item| self.visit(item, depth)).collect()),
            Tagged::Dict(dict) => self.visit_dict(dict, depth),
        }
    }

    fn visit_dict(&mut self, mut dict: TaggedDict, depth: usize) -> Tagged {
        // Children first, so nested repeats are hoisted before this record.
        dict.fields = std::mem::take(&mut dict.fields)
            .into_iter()
            .map(|(name, value)| match value {
                Tagged::Value(value) => (name, Tagged::Value(value)),
                nested => (name, self.visit(nested, depth + 1)),
            })
            .collect();

        if dict.tag.embed {
            return Tagged::Dict(dict);
        }

        let mut name = dict.tag.plural_name.clone();
        let pk = dict.tag.pk.clone();
        let first = self.seen.should_process((name.clone(), pk.to_string()));

        if depth == 0 {
            return Tagged::Dict(dict);
        }
        if name == self.plural_name {
            name = format!("{}{}", self.prefix, name);
        }

        let position = self.buckets.iter().position(|(bucket, _)| *bucket == name);
        if first {
            match position {
                Some(i) => self.buckets[i].1.push(dict),
                None => self.buckets.push((name, vec![dict])),
            }
        } else if let Some(stored) =
            position.and_then(|i| self.buckets[i].1.iter_mut().find(|stored| stored.tag.pk == pk))
        {
            for (field, value) in dict.fields {
                stored.insert(&field, value);
            }
        }
        Tagged::Value(pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Tag;
    use serde_json::json;

    fn record(name: &str, pk: Value, fields: Vec<(&str, Tagged)>) -> TaggedDict {
        let mut dict = TaggedDict::new(Tag {
            name: name.to_string(),
            plural_name: format!("{}s", name),
            pk,
            embed: false,
        });
        for (field, value) in fields {
            dict.insert(field, value);
        }
        dict
    }

    fn location(id: i64) -> Tagged {
        Tagged::Dict(record("location", json!(id), vec![("id", json!(id).into())]))
    }

    fn user(id: i64, location: Tagged) -> Tagged {
        Tagged::Dict(record("user", json!(id), vec![("id", json!(id).into()), ("location", location)]))
    }

    fn processor() -> SideloadingProcessor {
        SideloadingProcessor::new("user", "users", "+")
    }

    #[test]
    fn test_hoists_and_deduplicates() {
        let data = Tagged::List(vec![user(1, location(1)), user(2, location(1)), user(3, location(2))]);
        let envelope = processor().process(data);
        assert_eq!(
            envelope.to_value(),
            json!({
                "users": [
                    {"id": 1, "location": 1},
                    {"id": 2, "location": 1},
                    {"id": 3, "location": 2}
                ],
                "locations": [{"id": 1}, {"id": 2}]
            })
        );
    }

    #[test]
    fn test_single_record_uses_singular_key() {
        let envelope = processor().process(user(1, location(1)));
        assert_eq!(envelope.primary, "user");
        assert_eq!(envelope.data, json!({"id": 1, "location": 1}));
    }

    #[test]
    fn test_repeat_merges_fields() {
        let named = Tagged::Dict(record(
            "location",
            json!(1),
            vec![("id", json!(1).into()), ("name", json!("0").into())],
        ));
        let data = Tagged::List(vec![user(1, location(1)), user(2, named)]);
        let envelope = processor().process(data);
        assert_eq!(envelope.bucket("locations").unwrap(), &[json!({"id": 1, "name": "0"})]);
    }

    #[test]
    fn test_secondary_primary_records_are_prefixed() {
        let friend = user(3, location(2));
        let mut primary = record("user", json!(1), vec![("id", json!(1).into())]);
        primary.insert("friends", Tagged::List(vec![friend]));
        let envelope = processor().process(Tagged::List(vec![Tagged::Dict(primary)]));
        assert_eq!(envelope.data, json!([{"id": 1, "friends": [3]}]));
        assert_eq!(envelope.bucket("+users").unwrap(), &[json!({"id": 3, "location": 2})]);
        assert!(envelope.bucket("locations").is_some());
    }

    #[test]
    fn test_nested_copy_of_primary_becomes_reference() {
        let mut first = record("user", json!(1), vec![("id", json!(1).into())]);
        first.insert("friends", Tagged::List(vec![]));
        let mut second = record("user", json!(2), vec![("id", json!(2).into())]);
        second.insert(
            "friends",
            Tagged::List(vec![Tagged::Dict(record("user", json!(1), vec![("id", json!(1).into())]))]),
        );
        let envelope = processor().process(Tagged::List(vec![Tagged::Dict(first), Tagged::Dict(second)]));
        assert_eq!(envelope.data[1]["friends"], json!([1]));
        assert!(envelope.bucket("+users").is_none());
    }

    #[test]
    fn test_embedded_records_stay_in_place() {
        let mut embedded = record("location", json!(1), vec![("id", json!(1).into())]);
        embedded.tag.embed = true;
        let envelope = processor().process(Tagged::List(vec![user(1, Tagged::Dict(embedded))]));
        assert_eq!(envelope.data, json!([{"id": 1, "location": {"id": 1}}]));
        assert!(envelope.buckets.is_empty());
    }

    #[test]
    fn test_generic_references_keep_type() {
        let pk = json!({"type": "cat", "id": 1});
        let cat = Tagged::Dict(record("cat", pk.clone(), vec![("id", json!(1).into())]));
        let mut owner = record("user", json!(1), vec![("id", json!(1).into())]);
        owner.insert("favorite_pet", cat);
        let envelope = processor().process(Tagged::List(vec![Tagged::Dict(owner)]));
        assert_eq!(envelope.data[0]["favorite_pet"], pk);
        assert_eq!(envelope.bucket("cats").unwrap().len(), 1);
    }

    #[test]
    fn test_serialization_keeps_primary_first() {
        let mut envelope = processor().process(Tagged::List(vec![user(1, location(1))]));
        envelope.meta = Some(json!({"page": 1}));
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(text.starts_with("{\"users\":"));
        assert!(text.ends_with("\"meta\":{\"page\":1}}"));
    }
}
