//! Pooled tree-sitter parser for Python sources
//!
//! `tree_sitter::Parser` is expensive to set up and cannot be shared between
//! threads, so parsers are kept in a small pool and lent out for the duration
//! of one parse.

use crate::error::AstError;
use crate::error::AstResult;
use crate::kind::NodeKind;
use crate::position::CodePosition;
use crate::syntax::SyntaxId;
use crate::syntax::SyntaxTree;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tracing::debug;
use tree_sitter::Node;
use tree_sitter::Parser;
use tree_sitter::Tree;

const DEFAULT_MAX_POOLED: usize = 8;

/// Thread-safe pool of Python parsers.
pub struct PythonParser {
    pool: Mutex<Vec<Parser>>,
    max_pooled: usize,
}

impl PythonParser {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_POOLED)
    }

    /// Create a pool retaining at most `max_pooled` idle parsers.
    pub fn with_capacity(max_pooled: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Parse a whole module.
    ///
    /// A tree containing error or missing nodes is rejected: the position of
    /// the first offending node is reported.
    pub fn parse_module(&self, source: &str) -> AstResult<SyntaxTree> {
        let tree = self.checkout()?.parse(source)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(first_error(root));
        }
        Ok(SyntaxTree::from_tree(&tree, Arc::from(source)))
    }

    /// Parse text that must consist of exactly one expression.
    ///
    /// Returns the tree together with the id of the expression node.
    pub fn parse_expression(&self, source: &str) -> AstResult<(SyntaxTree, SyntaxId)> {
        let tree = self
            .parse_module(source)
            .map_err(|e| AstError::NotAnExpression(e.to_string()))?;
        let not_expression = || AstError::NotAnExpression(source.to_string());

        let root = tree.root().ok_or_else(not_expression)?;
        let statements: Vec<SyntaxId> = tree
            .children(root)
            .iter()
            .copied()
            .filter(|child| tree.node(*child).kind != NodeKind::Comment)
            .collect();
        let [statement] = statements.as_slice() else {
            return Err(not_expression());
        };
        if tree.node(*statement).kind != NodeKind::ExpressionStatement {
            return Err(not_expression());
        }
        let [expression] = tree.children(*statement) else {
            return Err(not_expression());
        };
        let expression = *expression;
        if matches!(
            tree.node(expression).kind,
            NodeKind::Assignment | NodeKind::AugmentedAssignment
        ) {
            return Err(not_expression());
        }
        Ok((tree, expression))
    }

    fn checkout(&self) -> AstResult<PooledParser<'_>> {
        let pooled = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let parser = match pooled {
            Some(parser) => parser,
            None => {
                debug!("creating python parser");
                create_parser()?
            }
        };
        Ok(PooledParser {
            parser: Some(parser),
            pool: self,
        })
    }

    fn return_parser(&self, parser: Parser) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.max_pooled {
            pool.push(parser);
        }
    }

    /// Number of idle parsers currently held by the pool
    pub fn pooled(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PythonParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonParser")
            .field("pooled", &self.pooled())
            .field("max_pooled", &self.max_pooled)
            .finish()
    }
}

fn create_parser() -> AstResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| AstError::ParserInit(e.to_string()))?;
    Ok(parser)
}

/// RAII wrapper returning the parser to its pool on drop
struct PooledParser<'a> {
    parser: Option<Parser>,
    pool: &'a PythonParser,
}

impl PooledParser<'_> {
    fn parse(&mut self, source: &str) -> AstResult<Tree> {
        self.parser
            .as_mut()
            .ok_or_else(|| AstError::ParserError("parser already returned".to_string()))?
            .parse(source, None)
            .ok_or_else(|| AstError::ParserError("tree-sitter returned no tree".to_string()))
    }
}

impl Drop for PooledParser<'_> {
    fn drop(&mut self) {
        if let Some(parser) = self.parser.take() {
            self.pool.return_parser(parser);
        }
    }
}

/// Locate the first error or missing node below `root`.
fn first_error(root: Node<'_>) -> AstError {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            let position = CodePosition::from_point(node.start_position());
            let message = if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "unexpected input".to_string()
            };
            return AstError::Syntax {
                line: position.line,
                column: position.column,
                message,
            };
        }
        // Only descend into subtrees that contain the error.
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                let position = CodePosition::from_point(root.start_position());
                return AstError::Syntax {
                    line: position.line,
                    column: position.column,
                    message: "unexpected input".to_string(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_module() {
        let parser = PythonParser::new();
        let tree = parser.parse_module("def foo(x): return x + 1").unwrap();
        assert!(tree.len() > 5);
        assert_eq!(parser.pooled(), 1);
    }

    #[test]
    fn test_syntax_error_is_reported_with_position() {
        let parser = PythonParser::new();
        let err = parser.parse_module("def broken(:\n    pass\n").unwrap_err();
        match err {
            AstError::Syntax { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_source_has_only_a_degenerate_module() {
        let parser = PythonParser::new();
        let tree = parser.parse_module("").unwrap();
        assert_eq!(tree.len(), 1);
        let root = tree.root().unwrap();
        assert!(tree.node(root).range.is_degenerate());
    }

    #[test]
    fn test_parse_expression() {
        let parser = PythonParser::new();
        let (tree, expr) = parser.parse_expression("typing.List[int]").unwrap();
        assert_eq!(tree.node(expr).kind, NodeKind::Subscript);
        assert_eq!(tree.text(expr), "typing.List[int]");

        assert!(matches!(
            parser.parse_expression("x = 1"),
            Err(AstError::NotAnExpression(_))
        ));
        assert!(matches!(
            parser.parse_expression("a\nb"),
            Err(AstError::NotAnExpression(_))
        ));
        assert!(parser.parse_expression("List[").is_err());
    }

    #[test]
    fn test_pool_is_bounded() {
        let parser = PythonParser::with_capacity(1);
        {
            let _a = parser.checkout().unwrap();
            let _b = parser.checkout().unwrap();
        }
        assert_eq!(parser.pooled(), 1);
    }
}
