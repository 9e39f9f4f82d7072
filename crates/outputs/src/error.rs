//! Error types for output resolution

use miette::Diagnostic;
use thiserror::Error;

/// Error type for output declaration handling
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A declared filter pattern failed to compile
    #[error("Invalid output pattern '{pattern}': {message}")]
    #[diagnostic(
        code(bake::outputs::pattern),
        help("Filter patterns use glob syntax, e.g. `**/*.o` or `reports/{{html,xml}}/**`")
    )]
    Pattern {
        /// The offending pattern as declared
        pattern: String,
        /// Description of what the glob engine rejected
        message: String,
    },
}

impl Error {
    /// Create a pattern error
    #[must_use]
    pub fn pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

/// Result type for output declaration handling
pub type Result<T> = std::result::Result<T, Error>;
