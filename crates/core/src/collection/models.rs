//! The plain data types that make up a random-table document

use crate::collection::cereal;
use derive_more::{Deref, Display, From, Into};
use grimoire_util::ResultTraced;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{borrow::Borrow, fs, io, path::Path};
use thiserror::Error;
use tracing::info;

/// The document schema revision this engine understands
pub const SPEC_VERSION: &str = "1.0";

/// A loaded random-table document: a metadata header plus tables and
/// templates keyed by id, and an optional document-level variable map that
/// seeds every roll's frame as read-only defaults.
#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
pub struct Document {
    pub metadata: Metadata,
    #[serde(deserialize_with = "cereal::keyed_by_id")]
    pub tables: IndexMap<TableId, Table>,
    #[serde(default, deserialize_with = "cereal::keyed_by_id")]
    pub templates: IndexMap<TemplateId, TemplateDef>,
    #[serde(default)]
    pub variables: IndexMap<String, String>,
}

impl Document {
    /// Load a document from a JSON file
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        info!(?path, "Loading document file");
        let load = || -> Result<Self, DocumentError> {
            let file = fs::File::open(path)?;
            let document: Self = serde_json::from_reader(file)?;
            document.validate()
        };
        load().traced()
    }

    /// Load a document from a JSON string
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let document: Self = serde_json::from_str(input)?;
        document.validate().traced()
    }

    fn validate(self) -> Result<Self, DocumentError> {
        if self.metadata.spec_version != SPEC_VERSION {
            return Err(DocumentError::SpecVersion(
                self.metadata.spec_version,
            ));
        }
        Ok(self)
    }

    /// The id this document is registered under: its namespace, falling back
    /// to its name
    pub fn collection_id(&self) -> &str {
        if self.metadata.namespace.is_empty() {
            &self.metadata.name
        } else {
            &self.metadata.namespace
        }
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.get(id)
    }

    pub fn template(&self, id: &str) -> Option<&TemplateDef> {
        self.templates.get(id)
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &TableId> {
        self.tables.keys()
    }

    pub fn template_ids(&self) -> impl Iterator<Item = &TemplateId> {
        self.templates.keys()
    }
}

/// Document header
#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub version: String,
    pub spec_version: String,
}

/// One random table. The payload depends on the table type: simple tables
/// own their entries, collections flatten other tables, composites pick a
/// source table by weight before rolling.
#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: TableId,
    #[serde(default)]
    pub name: String,
    /// Sets applied to every entry of this table unless the entry overrides
    /// the key
    #[serde(default)]
    pub default_sets: IndexMap<String, String>,
    #[serde(flatten)]
    pub kind: TableKind,
}

#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TableKind {
    Simple { entries: Vec<Entry> },
    Collection { tables: Vec<TableId> },
    Composite { sources: Vec<CompositeSource> },
}

/// One row of a simple table: the atomic unit of random selection. In JSON
/// an entry is either a bare string (shorthand for a record with only
/// `value`) or a full record.
#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
#[serde(from = "cereal::EntryRepr")]
pub struct Entry {
    pub id: Option<String>,
    /// Template string, possibly empty
    pub value: String,
    /// Strictly positive weights are selectable; an entry with weight <= 0
    /// is legal but unreachable
    pub weight: f64,
    /// Template string, evaluated when the entry is rolled
    pub description: String,
    /// Template strings keyed by set name, materialized when the entry is
    /// rolled; keys here shadow the table's `defaultSets`
    pub sets: IndexMap<String, String>,
}

/// A weighted pointer from a composite table to another table
#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
#[serde(rename_all = "camelCase")]
pub struct CompositeSource {
    pub table_id: TableId,
    #[serde(default = "cereal::default_weight")]
    pub weight: f64,
}

/// A rollable template: a pattern evaluated within a fresh frame, after the
/// `shared` bindings have been evaluated in declaration order
#[derive(Clone, Debug, Deserialize)]
#[cfg_attr(any(test, feature = "test"), derive(PartialEq))]
pub struct TemplateDef {
    pub id: TemplateId,
    #[serde(default)]
    pub name: String,
    pub pattern: String,
    /// Iteration order is declaration order, and is observable: later
    /// bindings may read earlier ones
    #[serde(default)]
    pub shared: IndexMap<String, String>,
}

#[derive(
    Clone,
    Debug,
    Deref,
    Default,
    Display,
    Eq,
    From,
    Hash,
    Into,
    PartialEq,
    Deserialize,
)]
#[deref(forward)]
#[serde(transparent)]
pub struct TableId(String);

impl Borrow<str> for TableId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(any(test, feature = "test"))]
impl From<&str> for TableId {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

#[derive(
    Clone,
    Debug,
    Deref,
    Default,
    Display,
    Eq,
    From,
    Hash,
    Into,
    PartialEq,
    Deserialize,
)]
#[deref(forward)]
#[serde(transparent)]
pub struct TemplateId(String);

impl Borrow<str> for TemplateId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(any(test, feature = "test"))]
impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    /// Error reading the document file
    #[error("error reading document")]
    Io(#[from] io::Error),

    /// Error deserializing document JSON
    #[error("error deserializing document")]
    Json(#[from] serde_json::Error),

    /// The document declares a schema revision we don't understand
    #[error("unsupported spec version `{0}`; expected `{SPEC_VERSION}`")]
    SpecVersion(String),
}
