//! Core storage model types.
//!
//! Describes what the storage layer holds: models with typed columns, a primary
//! key, and the relations between models. The query builder and both executors
//! only ever learn about storage through these types.

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

/// Represents a column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// String/text data
    #[default]
    String,
    /// Integer data
    Int,
    /// Floating point data
    Float,
    /// Boolean data
    Bool,
    /// ISO-8601 date or datetime stored as text
    Date,
    /// Arbitrary JSON (lists, objects)
    Json,
}

impl DataType {
    /// Returns the lowercase type name used in fixtures and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Date => "date",
            DataType::Json => "json",
        }
    }
}

/// Represents a column of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name (e.g., "name", "location_id")
    pub name: String,

    /// Column data type
    #[serde(rename = "type", default)]
    pub data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

/// Relation cardinality between two models, seen from the owning side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Foreign key stored on this model
    Fk,
    /// One-to-one stored on this model
    O2o,
    /// Reverse side of a one-to-one
    O2or,
    /// Many-to-many through a link table
    M2m,
    /// Reverse side of a foreign key
    M2o,
}

impl RelationKind {
    /// True when the relation's data does not live in a column of this model.
    pub fn is_remote(&self) -> bool {
        matches!(self, RelationKind::O2or | RelationKind::M2m | RelationKind::M2o)
    }

    /// True when the relation yields a list of records.
    pub fn is_many(&self) -> bool {
        matches!(self, RelationKind::M2m | RelationKind::M2o)
    }

    pub fn code(&self) -> &'static str {
        match self {
            RelationKind::Fk => "fk",
            RelationKind::O2o => "o2o",
            RelationKind::O2or => "o2or",
            RelationKind::M2m => "m2m",
            RelationKind::M2o => "m2o",
        }
    }
}

/// Link table backing a many-to-many relation.
///
/// `source_column` points at the model declaring the relation and
/// `target_column` at the related model. The reverse accessor of the same
/// link table simply swaps the two columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughDef {
    pub table: String,
    pub source_column: String,
    pub target_column: String,
}

/// Represents a relation from one model to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Accessor name on the owning model (e.g., "location", "groups")
    pub name: String,

    pub kind: RelationKind,

    /// Target model name
    pub target: String,

    /// Local column holding the target pk (fk / o2o only)
    #[serde(default)]
    pub column: Option<String>,

    /// Column on the target model pointing back at this model (o2or / m2o only)
    #[serde(default)]
    pub remote_column: Option<String>,

    /// Link table (m2m only)
    #[serde(default)]
    pub through: Option<ThroughDef>,

    /// Name used for this relation in predicate paths, when it differs from
    /// the accessor name (reverse relations without a related name).
    #[serde(default)]
    pub query_name: Option<String>,

    /// Accessor on the target model that walks back to this model, if declared
    #[serde(default)]
    pub reverse: Option<String>,
}

impl RelationDef {
    pub fn query_name(&self) -> &str {
        self.query_name.as_deref().unwrap_or(&self.name)
    }
}

/// Polymorphic relation stored as a (model name, pk) pair of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericRelationDef {
    pub name: String,
    pub type_column: String,
    pub id_column: String,
}

fn default_pk() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

/// Represents a complete storage model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Model name (e.g., "User")
    pub name: String,

    /// Table name; defaults to the snake-cased model name
    #[serde(default)]
    pub table: Option<String>,

    /// Primary key column
    #[serde(default = "default_pk")]
    pub pk: String,

    pub columns: Vec<ColumnDef>,

    #[serde(default)]
    pub relations: Vec<RelationDef>,

    #[serde(default)]
    pub generic_relations: Vec<GenericRelationDef>,

    /// Whether the fast executor may serve this model from plain rows
    #[serde(default = "default_true")]
    pub use_fastquery: bool,
}

impl ModelDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            pk: default_pk(),
            columns: vec![ColumnDef::new("id", DataType::Int)],
            relations: Vec::new(),
            generic_relations: Vec::new(),
            use_fastquery: true,
        }
    }

    pub fn column(mut self, name: &str, data_type: DataType) -> Self {
        self.columns.push(ColumnDef::new(name, data_type));
        self
    }

    /// Add a foreign key relation together with its `<name>_id` column.
    pub fn fk(mut self, name: &str, target: &str) -> Self {
        let column = format!("{}_id", name);
        self.columns.push(ColumnDef::new(&column, DataType::Int));
        self.relations.push(RelationDef {
            name: name.to_string(),
            kind: RelationKind::Fk,
            target: target.to_string(),
            column: Some(column),
            remote_column: None,
            through: None,
            query_name: None,
            reverse: None,
        });
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn generic(mut self, name: &str, type_column: &str, id_column: &str) -> Self {
        self.columns.push(ColumnDef::new(type_column, DataType::String));
        self.columns.push(ColumnDef::new(id_column, DataType::Int));
        self.generic_relations.push(GenericRelationDef {
            name: name.to_string(),
            type_column: type_column.to_string(),
            id_column: id_column.to_string(),
        });
        self
    }

    pub fn slow(mut self) -> Self {
        self.use_fastquery = false;
        self
    }

    /// Table name, used as the resource key of model-backed schemas.
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| self.name.to_snake_case())
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        let name = if name == "pk" { self.pk.as_str() } else { name };
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn pk_column(&self) -> Option<&ColumnDef> {
        self.get_column(&self.pk)
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Find a relation by the name predicates use for it.
    pub fn relation_by_query_name(&self, name: &str) -> Option<&RelationDef> {
        self.relations
            .iter()
            .find(|r| r.query_name() == name)
            .or_else(|| self.get_relation(name))
    }

    pub fn get_generic(&self, name: &str) -> Option<&GenericRelationDef> {
        self.generic_relations.iter().find(|g| g.name == name)
    }

    /// True when `name` is a column, relation or generic relation.
    pub fn has_field(&self, name: &str) -> bool {
        self.get_column(name).is_some()
            || self.get_relation(name).is_some()
            || self.get_generic(name).is_some()
    }

    /// True when `name` is a relation whose data lives outside this model.
    pub fn is_field_remote(&self, name: &str) -> bool {
        self.get_relation(name)
            .map(|r| r.kind.is_remote())
            .unwrap_or(false)
    }

    /// Local column that stores `name`: the column itself, or the fk column
    /// of a to-one relation.
    pub fn local_column(&self, name: &str) -> Option<String> {
        if let Some(column) = self.get_column(name) {
            return Some(column.name.clone());
        }
        self.get_relation(name).and_then(|r| r.column.clone())
    }

    /// Primary key plus every column that stores a foreign key.
    pub fn id_columns(&self) -> Vec<String> {
        let mut columns = vec![self.pk.clone()];
        for relation in &self.relations {
            if let Some(column) = &relation.column {
                columns.push(column.clone());
            }
        }
        for generic in &self.generic_relations {
            columns.push(generic.type_column.clone());
            columns.push(generic.id_column.clone());
        }
        columns
    }
}
