//! Core engine for Grimoire random-table documents: the document model and
//! loader, weighted entry selection, sets materialization, the expression
//! evaluator, and the rolling façade.
//!
//! **This crate is not semver compliant**. The version is locked to the root
//! `grimoire` crate version. If you choose to depend directly on this crate,
//! you do so at your own risk of breakage.

pub mod collection;
mod engine;
mod random;
pub mod render;
#[cfg(any(test, feature = "test"))]
pub mod test_util;

pub use collection::{Document, DocumentError};
pub use engine::{Engine, EngineConfig, RollMetadata, RollOutcome};
#[cfg(any(test, feature = "test"))]
pub use random::SequenceSampler;
pub use random::{RngSampler, Sampler};
pub use render::{
    Binding, CaptureItem, CaptureList, CapturedField, Frame, RollError,
};
