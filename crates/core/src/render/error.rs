use crate::collection::{TableId, TemplateId};
use grimoire_template::TemplateParseError;
use thiserror::Error;

/// Fatal errors during a roll. These abort the whole top-level roll and are
/// reported to the caller. Recoverable conditions — missing variables,
/// properties, keys, out-of-range indices — never surface here; they resolve
/// to empty strings, because random-table authors compose documents
/// incrementally.
#[derive(Debug, Error)]
pub enum RollError {
    /// No collection loaded under this id
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),

    /// A referenced table doesn't exist in the document
    #[error("unknown table `{0}`")]
    UnknownTable(TableId),

    /// A referenced template doesn't exist in the document
    #[error("unknown template `{0}`")]
    UnknownTemplate(TemplateId),

    /// A simple table with no selectable entries (empty, or all weights
    /// non-positive) was rolled without exclusions
    #[error("table `{0}` has no selectable entries")]
    EmptyTable(TableId),

    /// Nested evaluation exceeded the configured ceiling
    #[error(
        "recursion limit {limit} exceeded at depth {depth} \
        while evaluating `{token}`"
    )]
    RecursionLimit {
        limit: usize,
        depth: usize,
        token: String,
    },

    /// A template string failed to parse
    #[error(transparent)]
    Parse(#[from] TemplateParseError),

    /// `again` used outside a table entry evaluation
    #[error("`again` is only valid inside a table entry")]
    InvalidAgainContext,
}
