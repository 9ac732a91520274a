//! The document data model: tables, entries, and templates, plus JSON
//! loading. Documents are immutable once loaded; everything mutable during a
//! roll lives in the render layer.

mod cereal;
mod models;

pub use models::*;
