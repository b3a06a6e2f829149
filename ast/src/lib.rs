//! Typescope AST - Python syntax trees with source positions
//!
//! This crate wraps tree-sitter's Python grammar and flattens its output into
//! a [`SyntaxTree`]: a pre-order table of named nodes, each carrying its kind,
//! its `(line, column)` range, its parent and its children.

pub mod error;
pub mod kind;
pub mod parser;
pub mod position;
pub mod syntax;

pub use error::AstError;
pub use error::AstResult;
pub use kind::NodeKind;
pub use parser::PythonParser;
pub use position::CodePosition;
pub use position::CodeRange;
pub use syntax::SyntaxId;
pub use syntax::SyntaxNode;
pub use syntax::SyntaxTree;
