//! Statement parsing errors.

use thiserror::Error;

/// Result type for statement parsing.
pub type StatementResult<T> = Result<T, StatementError>;

/// Statement parsing errors.
#[derive(Debug, Clone, Error)]
pub enum StatementError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("wrong arguments to {procedure}: {reason}")]
    WrongArguments { procedure: String, reason: String },

    #[error("empty query")]
    EmptyQuery,

    #[error("multiple statements not supported")]
    MultipleStatements,
}

impl From<sqlparser::tokenizer::TokenizerError> for StatementError {
    fn from(e: sqlparser::tokenizer::TokenizerError) -> Self {
        StatementError::Syntax(e.to_string())
    }
}
