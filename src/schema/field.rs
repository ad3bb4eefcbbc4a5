//! Field graph nodes.
//!
//! A [`FieldDef`] is one exposed attribute or relation of a schema. Fields are
//! plain data: they can be built in code with the helper constructors or read
//! from a catalog fixture, where the `kind` key selects the variant.

use serde::{Deserialize, Serialize};

use crate::db::Predicate;

fn default_true() -> bool {
    true
}

/// What a field renders and how it gets its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// A column, possibly reached through to-one relations (`profile.display_name`).
    Attribute,

    /// A relation rendered by another schema.
    Relation {
        /// Target schema; the canonical schema of the related model when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,

        /// Filled in from the model relation when the catalog is built.
        #[serde(default)]
        many: bool,

        #[serde(default)]
        embed: bool,

        /// `Some(true)` forces sideloading below this field, `Some(false)`
        /// forces embedding. Overrides `embed`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sideloading: Option<bool>,

        /// Whether the field gets an entry in the `links` object.
        #[serde(default = "default_true")]
        link: bool,

        /// Default predicate applied to the related query.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Predicate>,
    },

    /// Number of elements in another field's rendered value.
    Count {
        serializer_source: String,
        #[serde(default = "default_true")]
        unique: bool,
    },

    /// Value computed by a method registered on the catalog.
    Method { method: String },

    /// Polymorphic relation rendered as `{type, id}`.
    GenericRelation {
        #[serde(default)]
        embed: bool,
    },
}

/// One exposed attribute or relation of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,

    /// Dotted storage path; defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(flatten)]
    pub kind: FieldKind,

    /// `None` leaves the decision to the schema and the settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred: Option<bool>,

    /// Storage paths this field needs loaded; defaults to its source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<String>>,
}

impl FieldDef {
    fn with_kind(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            kind,
            deferred: None,
            requires: None,
        }
    }

    pub fn attribute(name: &str) -> Self {
        Self::with_kind(name, FieldKind::Attribute)
    }

    /// Relation field rendered by `schema`.
    pub fn relation(name: &str, schema: &str) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relation {
                schema: Some(schema.to_string()),
                many: false,
                embed: false,
                sideloading: None,
                link: true,
                filter: None,
            },
        )
    }

    pub fn count(name: &str, serializer_source: &str) -> Self {
        Self::with_kind(
            name,
            FieldKind::Count {
                serializer_source: serializer_source.to_string(),
                unique: true,
            },
        )
    }

    pub fn method(name: &str, method: &str) -> Self {
        Self::with_kind(
            name,
            FieldKind::Method {
                method: method.to_string(),
            },
        )
    }

    pub fn generic(name: &str) -> Self {
        Self::with_kind(name, FieldKind::GenericRelation { embed: false })
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = Some(deferred);
        self
    }

    pub fn requires(mut self, paths: &[&str]) -> Self {
        self.requires = Some(paths.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn embed(mut self) -> Self {
        match &mut self.kind {
            FieldKind::Relation { embed, .. } | FieldKind::GenericRelation { embed } => *embed = true,
            _ => {}
        }
        self
    }

    pub fn sideloading(mut self, value: bool) -> Self {
        if let FieldKind::Relation { sideloading, .. } = &mut self.kind {
            *sideloading = Some(value);
        }
        self
    }

    pub fn no_link(mut self) -> Self {
        if let FieldKind::Relation { link, .. } = &mut self.kind {
            *link = false;
        }
        self
    }

    /// Default predicate for the related query of a relation field.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        if let FieldKind::Relation { filter, .. } = &mut self.kind {
            *filter = Some(predicate);
        }
        self
    }

    pub fn non_unique(mut self) -> Self {
        if let FieldKind::Count { unique, .. } = &mut self.kind {
            *unique = false;
        }
        self
    }

    /// Storage path read by this field.
    ///
    /// Method fields read the whole record (`*`); count fields read nothing
    /// themselves (empty path).
    pub fn source_path(&self) -> &str {
        match (&self.source, &self.kind) {
            (Some(source), _) => source,
            (None, FieldKind::Method { .. }) => "*",
            (None, FieldKind::Count { .. }) => "",
            (None, _) => &self.name,
        }
    }

    /// Storage paths that must be loaded to render this field.
    pub fn requirements(&self) -> Vec<String> {
        if let FieldKind::GenericRelation { .. } = self.kind {
            return vec![format!("{}.*", self.source_path()), "*".to_string()];
        }
        match &self.requires {
            Some(paths) => paths.clone(),
            None if self.source_path().is_empty() => Vec::new(),
            None => vec![self.source_path().to_string()],
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { .. })
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.kind, FieldKind::GenericRelation { .. })
    }

    /// True for to-many relation fields.
    pub fn is_many(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { many: true, .. })
    }

    /// Whether the related records render in place instead of being sideloaded.
    pub fn embeds(&self) -> bool {
        match &self.kind {
            FieldKind::Relation {
                embed, sideloading, ..
            } => sideloading.map(|s| !s).unwrap_or(*embed),
            FieldKind::GenericRelation { embed } => *embed,
            _ => false,
        }
    }

    /// Target schema name of a relation field, once resolved.
    pub fn target_schema(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { schema, .. } => schema.as_deref(),
            _ => None,
        }
    }

    pub fn relation_filter(&self) -> Option<&Predicate> {
        match &self.kind {
            FieldKind::Relation { filter, .. } => filter.as_ref(),
            _ => None,
        }
    }

    pub fn links(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { link: true, .. })
    }
}
