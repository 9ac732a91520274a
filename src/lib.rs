//! Grimoire is an engine for **random-table documents**: declarative
//! collections of tables, entries, and templates that describe
//! procedural-generation grammars (names, encounters, NPCs, loot). Given a
//! loaded document and the id of a table or template, the engine produces a
//! text string by recursively evaluating the embedded expression language.
//!
//! This crate is the public façade; the actual machinery lives in
//! [`grimoire_core`] (document model, selection, evaluation) and
//! [`grimoire_template`] (the expression language itself).
//!
//! ```
//! use grimoire::{Document, Engine, EngineConfig, RngSampler};
//!
//! let document = Document::parse(
//!     r#"{
//!         "metadata": {
//!             "name": "Example",
//!             "namespace": "example",
//!             "version": "1.0.0",
//!             "specVersion": "1.0"
//!         },
//!         "tables": [{
//!             "id": "color",
//!             "name": "Color",
//!             "type": "simple",
//!             "entries": ["crimson", "viridian", "ochre"]
//!         }]
//!     }"#,
//! )
//! .unwrap();
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let collection = engine.load(document);
//! let mut sampler = RngSampler::seeded(42);
//! let outcome = engine.roll_with(&collection, "color", &mut sampler).unwrap();
//! assert!(!outcome.text.is_empty());
//! ```

pub use grimoire_core::{
    CaptureItem, CaptureList, CapturedField, Document, DocumentError, Engine,
    EngineConfig, RngSampler, RollError, RollMetadata, RollOutcome, Sampler,
    collection,
};
pub use grimoire_template::{Expression, Template, TemplateParseError};
