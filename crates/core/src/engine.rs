//! Engine façade: load documents, list their contents, and roll tables and
//! templates into result envelopes

use crate::{
    collection::{Document, TableId, TemplateId},
    random::{RngSampler, Sampler},
    render::{CaptureItem, CapturedField, Evaluator, RollError},
};
use chrono::{DateTime, Utc};
use grimoire_template::{Template, TemplateParseError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::{debug, info};

/// Engine tuning knobs
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Hard ceiling on nested template evaluation within one roll
    pub max_recursion_depth: usize,
    /// Join separator for multi-rolls and list bindings when the expression
    /// doesn't carry one
    pub default_separator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 50,
            default_separator: ", ".into(),
        }
    }
}

/// The engine: loaded collections plus the shared parse cache. Documents
/// are immutable once loaded, so an engine can serve concurrent rolls as
/// long as each call brings its own sampler.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    collections: IndexMap<String, Document>,
    cache: TemplateCache,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            collections: IndexMap::new(),
            cache: TemplateCache::default(),
        }
    }

    /// Register a loaded document, returning the collection id it's
    /// reachable under. Loading the same id again replaces the collection.
    pub fn load(&mut self, document: Document) -> String {
        let id = document.collection_id().to_owned();
        info!(collection = %id, name = %document.metadata.name, "Loaded collection");
        self.collections.insert(id.clone(), document);
        id
    }

    pub fn collection(&self, id: &str) -> Option<&Document> {
        self.collections.get(id)
    }

    pub fn collection_ids(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn list_tables(
        &self,
        collection: &str,
    ) -> Result<Vec<&TableId>, RollError> {
        Ok(self.document(collection)?.table_ids().collect())
    }

    pub fn list_templates(
        &self,
        collection: &str,
    ) -> Result<Vec<&TemplateId>, RollError> {
        Ok(self.document(collection)?.template_ids().collect())
    }

    /// Roll a table or template with the thread-local RNG
    pub fn roll(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<RollOutcome, RollError> {
        self.roll_with(collection, id, &mut RngSampler::thread())
    }

    /// Roll a table or template with a caller-supplied sampler. Template
    /// ids dispatch to the template runner.
    pub fn roll_with(
        &self,
        collection: &str,
        id: &str,
        sampler: &mut dyn Sampler,
    ) -> Result<RollOutcome, RollError> {
        let document = self.document(collection)?;
        debug!(collection, id, "Rolling");
        let mut evaluator =
            Evaluator::new(document, &self.config, &self.cache, sampler);
        let item = if let Some(template) = document.template(id) {
            evaluator.run_template(template)?
        } else if let Some(table) = document.table(id) {
            evaluator.roll_table(table)?
        } else {
            return Err(RollError::UnknownTable(TableId::from(
                id.to_owned(),
            )));
        };
        Ok(Self::outcome(collection, id, item))
    }

    /// Roll a template by id; a table id is not accepted here
    pub fn roll_template(
        &self,
        collection: &str,
        id: &str,
        sampler: &mut dyn Sampler,
    ) -> Result<RollOutcome, RollError> {
        let document = self.document(collection)?;
        let template = document.template(id).ok_or_else(|| {
            RollError::UnknownTemplate(TemplateId::from(id.to_owned()))
        })?;
        debug!(collection, id, "Rolling template");
        let mut evaluator =
            Evaluator::new(document, &self.config, &self.cache, sampler);
        let item = evaluator.run_template(template)?;
        Ok(Self::outcome(collection, id, item))
    }

    fn outcome(collection: &str, id: &str, item: CaptureItem) -> RollOutcome {
        RollOutcome {
            placeholders: flatten_sets(&item.sets),
            text: item.value,
            metadata: RollMetadata {
                source_id: id.to_owned(),
                collection_id: collection.to_owned(),
                timestamp: Utc::now(),
            },
        }
    }

    fn document(&self, collection: &str) -> Result<&Document, RollError> {
        self.collections.get(collection).ok_or_else(|| {
            RollError::UnknownCollection(collection.to_owned())
        })
    }
}

/// The result envelope handed back to callers
#[derive(Clone, Debug)]
pub struct RollOutcome {
    pub text: String,
    pub metadata: RollMetadata,
    /// Flat copy of the top-level roll's materialized sets (for templates,
    /// the shared bindings)
    pub placeholders: IndexMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct RollMetadata {
    pub source_id: String,
    pub collection_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only parse cache keyed by source string. Parsing is a pure
/// function of the source, so racing inserts of the same key are benign;
/// the first insert wins and later parses are dropped.
#[derive(Debug, Default)]
pub struct TemplateCache(RwLock<HashMap<String, Arc<Template>>>);

impl TemplateCache {
    pub(crate) fn get(
        &self,
        source: &str,
    ) -> Result<Arc<Template>, TemplateParseError> {
        if let Some(template) = self
            .0
            .read()
            .expect("template cache poisoned")
            .get(source)
        {
            return Ok(Arc::clone(template));
        }
        let template = Arc::new(source.parse::<Template>()?);
        let mut cache = self.0.write().expect("template cache poisoned");
        Ok(Arc::clone(
            cache.entry(source.to_owned()).or_insert(template),
        ))
    }
}

fn flatten_sets(
    sets: &IndexMap<String, CapturedField>,
) -> IndexMap<String, String> {
    sets.iter()
        .map(|(key, field)| (key.clone(), field.as_text().to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{document, entry, simple};
    use grimoire_util::assert_err;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_recursion_depth, 50);
        assert_eq!(config.default_separator, ", ");

        // An empty config document deserializes to the defaults
        let parsed: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.max_recursion_depth, 50);
        let parsed: EngineConfig =
            serde_json::from_str(r#"{"maxRecursionDepth": 3}"#).unwrap();
        assert_eq!(parsed.max_recursion_depth, 3);
        assert_eq!(parsed.default_separator, ", ");
    }

    #[test]
    fn test_listings() {
        let mut engine = Engine::new(EngineConfig::default());
        let collection = engine.load(document(
            [simple("goblin", [entry("Sniv")])],
            [crate::test_util::template("npc", "{{goblin}}", [])],
        ));
        assert_eq!(
            engine.list_tables(&collection).unwrap(),
            vec![&TableId::from("goblin")]
        );
        assert_eq!(
            engine.list_templates(&collection).unwrap(),
            vec![&TemplateId::from("npc")]
        );
        assert_err!(
            engine.list_tables("nope"),
            "unknown collection `nope`"
        );
    }

    /// The cache hands back the same parse for the same source
    #[test]
    fn test_template_cache() {
        let cache = TemplateCache::default();
        let first = cache.get("{{goblin}}").unwrap();
        let second = cache.get("{{goblin}}").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_err!(cache.get("{{"), "expression");
    }
}
