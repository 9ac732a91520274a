//! Builders for documents used across the test suites

use crate::collection::{
    CompositeSource, Document, Entry, Metadata, Table, TableId, TableKind,
    TemplateDef,
};
use grimoire_util::Factory;
use indexmap::IndexMap;

impl Factory for Metadata {
    fn factory((): ()) -> Self {
        Self {
            name: "Test".into(),
            namespace: "test".into(),
            version: "1.0.0".into(),
            spec_version: "1.0".into(),
        }
    }
}

/// Assemble a document from tables and templates
pub fn document(
    tables: impl IntoIterator<Item = Table>,
    templates: impl IntoIterator<Item = TemplateDef>,
) -> Document {
    Document {
        metadata: Metadata::factory(()),
        tables: tables
            .into_iter()
            .map(|table| (table.id.clone(), table))
            .collect(),
        templates: templates
            .into_iter()
            .map(|template| (template.id.clone(), template))
            .collect(),
        variables: IndexMap::new(),
    }
}

pub fn simple(
    id: &str,
    entries: impl IntoIterator<Item = Entry>,
) -> Table {
    Table {
        id: TableId::from(id),
        name: id.to_owned(),
        default_sets: IndexMap::new(),
        kind: TableKind::Simple {
            entries: entries.into_iter().collect(),
        },
    }
}

pub fn collection(
    id: &str,
    tables: impl IntoIterator<Item = &'static str>,
) -> Table {
    Table {
        id: TableId::from(id),
        name: id.to_owned(),
        default_sets: IndexMap::new(),
        kind: TableKind::Collection {
            tables: tables.into_iter().map(TableId::from).collect(),
        },
    }
}

pub fn composite(
    id: &str,
    sources: impl IntoIterator<Item = (&'static str, f64)>,
) -> Table {
    Table {
        id: TableId::from(id),
        name: id.to_owned(),
        default_sets: IndexMap::new(),
        kind: TableKind::Composite {
            sources: sources
                .into_iter()
                .map(|(table_id, weight)| CompositeSource {
                    table_id: TableId::from(table_id),
                    weight,
                })
                .collect(),
        },
    }
}

pub fn entry(value: &str) -> Entry {
    Entry {
        id: None,
        value: value.to_owned(),
        weight: 1.0,
        description: String::new(),
        sets: IndexMap::new(),
    }
}

pub fn weighted(value: &str, weight: f64) -> Entry {
    Entry {
        weight,
        ..entry(value)
    }
}

pub fn entry_with_sets(
    value: &str,
    sets: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> Entry {
    Entry {
        sets: string_map(sets),
        ..entry(value)
    }
}

pub fn template(
    id: &str,
    pattern: &str,
    shared: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> TemplateDef {
    TemplateDef {
        id: id.into(),
        name: id.to_owned(),
        pattern: pattern.to_owned(),
        shared: string_map(shared),
    }
}

pub fn string_map(
    pairs: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> IndexMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
