//! The expression language embedded in random-table documents. This crate
//! owns the lexical structure and the abstract syntax: scanning `{{ … }}`
//! fragments out of a template string and parsing each fragment into a typed
//! [Expression]. It is pure syntax — selection, capture frames, and
//! evaluation live in `grimoire_core`, which walks the parsed chunks.

mod display;
mod error;
mod expression;
mod parse;

pub use error::TemplateParseError;
pub use expression::{
    Again, CaptureAccess, Collect, Comparand, CompareOp, Condition,
    Expression, Identifier, Instance, MultiRoll, Placeholder, Prop, RollCount,
    SwitchArm, SwitchChain, SwitchResult, Switched, TableRef, Variable,
};

use std::sync::Arc;

/// A parsed template, which can contain raw and/or templated content. The
/// string is parsed during creation to identify expressions, hence the
/// immutability.
///
/// The original string is *not* stored. To recover the source string, use
/// [Self::display].
///
/// Invariants:
/// - Two templates with the same source string will have the same set of
///   chunks, and vice versa
/// - No two raw chunks will ever be consecutive
/// - Raw chunks cannot be empty
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Template {
    /// Pre-parsed chunks of the template. For raw chunks we store the
    /// presentation text (which is not necessarily the source text, as escape
    /// sequences will be eliminated). For expressions, just the parsed node.
    chunks: Vec<Chunk>,
}

impl Template {
    /// The parsed chunks, in source order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// If the template is exactly one expression with no surrounding raw
    /// text, return it. Callers use this to decide whether an evaluation
    /// result can carry structure (a capture) instead of flat text.
    pub fn as_single_expression(&self) -> Option<&Expression> {
        match self.chunks.as_slice() {
            [Chunk::Expression(expression)] => Some(expression),
            _ => None,
        }
    }
}

#[cfg(any(test, feature = "test"))]
impl From<&str> for Template {
    fn from(value: &str) -> Self {
        value.parse().unwrap()
    }
}

#[cfg(any(test, feature = "test"))]
impl<const N: usize> From<[Chunk; N]> for Template {
    fn from(chunks: [Chunk; N]) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

/// A parsed piece of a template. After parsing, each chunk is either raw text
/// or an expression, ready to be evaluated.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Raw unprocessed text, i.e. something **outside** the `{{ }}`. This is
    /// stored in an `Arc` so evaluation can share it cheaply without cloning
    /// the text. This works because templates are immutable. The text
    /// represents what the author wants to see, i.e. it does *not* include
    /// any escape chars.
    Raw(Arc<str>),
    /// Dynamic expression to be computed at evaluation time
    Expression(Expression),
}

impl From<Expression> for Chunk {
    fn from(expression: Expression) -> Self {
        Self::Expression(expression)
    }
}
