//! Error types for parsing operations

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AstError {
    #[error("Syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Parser error: {0}")]
    ParserError(String),

    #[error("Failed to initialise parser: {0}")]
    ParserInit(String),

    #[error("Not a single expression: {0}")]
    NotAnExpression(String),
}

pub type AstResult<T> = Result<T, AstError>;
