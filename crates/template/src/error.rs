use thiserror::Error;
use winnow::error::{ContextError, ParseError};

/// An error while parsing a template. The message is provided by winnow and
/// includes the offending fragment and position.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TemplateParseError(String);

/// Convert winnow's error type into ours. This stringifies the error so we
/// can dump the reference to the input
impl From<ParseError<&str, ContextError>> for TemplateParseError {
    fn from(error: ParseError<&str, ContextError>) -> Self {
        Self(error.to_string())
    }
}
