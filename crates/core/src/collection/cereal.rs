//! Serde helpers for document deserialization

use crate::collection::models::{Entry, Table, TableId, TemplateDef, TemplateId};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, de::Error as _};
use std::{fmt::Display, hash::Hash};

pub(crate) fn default_weight() -> f64 {
    1.0
}

/// A type that carries its own map key
pub(crate) trait Keyed {
    type Key;

    fn key(&self) -> &Self::Key;
}

impl Keyed for Table {
    type Key = TableId;

    fn key(&self) -> &TableId {
        &self.id
    }
}

impl Keyed for TemplateDef {
    type Key = TemplateId;

    fn key(&self) -> &TemplateId {
        &self.id
    }
}

/// Tables and templates arrive as JSON arrays; index them by id so lookups
/// during evaluation are cheap. Duplicate ids are a document error.
pub(crate) fn keyed_by_id<'de, D, V>(
    deserializer: D,
) -> Result<IndexMap<V::Key, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de> + Keyed,
    V::Key: Clone + Display + Eq + Hash,
{
    let items: Vec<V> = Vec::deserialize(deserializer)?;
    let mut map = IndexMap::with_capacity(items.len());
    for item in items {
        let key = item.key().clone();
        if map.insert(key.clone(), item).is_some() {
            return Err(D::Error::custom(format!("duplicate id `{key}`")));
        }
    }
    Ok(map)
}

/// Entries can be written as a bare string (shorthand for a record with only
/// `value`) or a full record
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum EntryRepr {
    Value(String),
    Record {
        #[serde(default)]
        id: Option<String>,
        value: String,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        description: String,
        #[serde(default)]
        sets: IndexMap<String, String>,
    },
}

impl From<EntryRepr> for Entry {
    fn from(repr: EntryRepr) -> Self {
        match repr {
            EntryRepr::Value(value) => Self {
                id: None,
                value,
                weight: default_weight(),
                description: String::new(),
                sets: IndexMap::new(),
            },
            EntryRepr::Record {
                id,
                value,
                weight,
                description,
                sets,
            } => Self {
                id,
                value,
                weight,
                description,
                sets,
            },
        }
    }
}
