//! Inferred type expressions
//!
//! Type checkers report types as strings such as `typing.List[int]` or
//! `Variable[T (bound to int)]`. After a few textual fixes those strings are
//! valid Python expressions, so they are parsed with the Python grammar and
//! turned into a small [`TypeExpr`] tree. Strings that still fail to parse
//! become [`TypeExpr::Unparsable`] instead of an error.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use typescope_ast::NodeKind;
use typescope_ast::PythonParser;
use typescope_ast::SyntaxId;
use typescope_ast::SyntaxTree;

/// Textual fixes applied before parsing, in order.
const SANITIZERS: &[(&str, &str)] = &[
    ("[]", "[NoContent]"),
    (" (bound to ", "(bound="),
    ("$", "__dollar_sign__"),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExpr {
    /// Possibly dotted name, e.g. `typing.List`.
    Name(String),
    Subscript {
        base: Box<TypeExpr>,
        args: Vec<TypeExpr>,
    },
    Call {
        callee: Box<TypeExpr>,
        args: Vec<TypeExpr>,
    },
    List(Vec<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    /// `a | b | c`
    Union(Vec<TypeExpr>),
    Keyword {
        name: String,
        value: Box<TypeExpr>,
    },
    /// Literal source text: numbers, strings, `None`, `...`.
    Literal(String),
    /// Sentinel for type strings that are not valid expressions.
    Unparsable { raw: String },
}

impl TypeExpr {
    /// Parse a type string reported by a type checker.
    pub fn parse(parser: &PythonParser, raw: &str) -> Self {
        let sanitized = sanitize(raw);
        let converted = parser
            .parse_expression(&sanitized)
            .ok()
            .and_then(|(tree, root)| convert(&tree, root));
        converted.unwrap_or_else(|| {
            debug!(raw, "unparsable type expression");
            Self::Unparsable {
                raw: raw.to_string(),
            }
        })
    }

    pub const fn is_unparsable(&self) -> bool {
        matches!(self, Self::Unparsable { .. })
    }
}

fn sanitize(raw: &str) -> String {
    SANITIZERS
        .iter()
        .fold(raw.trim().to_string(), |text, (from, to)| text.replace(from, to))
}

fn convert(tree: &SyntaxTree, id: SyntaxId) -> Option<TypeExpr> {
    let node = tree.node(id);
    let expr = match node.kind {
        NodeKind::Identifier => TypeExpr::Name(tree.text(id).to_string()),
        NodeKind::Attribute => {
            let object = convert(tree, tree.child_by_field(id, "object")?)?;
            let attribute = tree.text(tree.child_by_field(id, "attribute")?);
            match object {
                TypeExpr::Name(base) => TypeExpr::Name(format!("{base}.{attribute}")),
                _ => return None,
            }
        }
        NodeKind::Subscript => TypeExpr::Subscript {
            base: Box::new(convert(tree, tree.child_by_field(id, "value")?)?),
            args: tree
                .children_by_field(id, "subscript")
                .map(|arg| convert(tree, arg))
                .collect::<Option<_>>()?,
        },
        NodeKind::Call => {
            let arguments = tree.child_by_field(id, "arguments")?;
            TypeExpr::Call {
                callee: Box::new(convert(tree, tree.child_by_field(id, "function")?)?),
                args: convert_all(tree, tree.children(arguments))?,
            }
        }
        NodeKind::KeywordArgument => TypeExpr::Keyword {
            name: tree.text(tree.child_by_field(id, "name")?).to_string(),
            value: Box::new(convert(tree, tree.child_by_field(id, "value")?)?),
        },
        NodeKind::List => TypeExpr::List(convert_all(tree, tree.children(id))?),
        NodeKind::Tuple => TypeExpr::Tuple(convert_all(tree, tree.children(id))?),
        NodeKind::ParenthesizedExpression => match tree.children(id) {
            [inner] => convert(tree, *inner)?,
            _ => return None,
        },
        NodeKind::BinaryOperator => {
            let left = tree.child_by_field(id, "left")?;
            let right = tree.child_by_field(id, "right")?;
            let operator = tree
                .source()
                .get(tree.node(left).bytes.end..tree.node(right).bytes.start)?;
            if operator.trim() != "|" {
                return None;
            }
            let mut members = Vec::new();
            for side in [left, right] {
                match convert(tree, side)? {
                    TypeExpr::Union(nested) => members.extend(nested),
                    other => members.push(other),
                }
            }
            TypeExpr::Union(members)
        }
        NodeKind::String
        | NodeKind::ConcatenatedString
        | NodeKind::Integer
        | NodeKind::Float
        | NodeKind::True
        | NodeKind::False
        | NodeKind::None
        | NodeKind::Ellipsis => TypeExpr::Literal(tree.text(id).to_string()),
        _ => return None,
    };
    Some(expr)
}

fn convert_all(tree: &SyntaxTree, ids: &[SyntaxId]) -> Option<Vec<TypeExpr>> {
    ids.iter()
        .filter(|id| tree.node(**id).kind != NodeKind::Comment)
        .map(|id| convert(tree, *id))
        .collect()
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[TypeExpr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) | Self::Literal(name) => f.write_str(name),
            Self::Subscript { base, args } => {
                write!(f, "{base}[")?;
                write_list(f, args)?;
                f.write_str("]")
            }
            Self::Call { callee, args } => {
                write!(f, "{callee}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Self::List(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Self::Tuple(items) => {
                f.write_str("(")?;
                write_list(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{member}")?;
                }
                Ok(())
            }
            Self::Keyword { name, value } => write!(f, "{name}={value}"),
            Self::Unparsable { raw } => f.write_str(raw),
        }
    }
}

/// Type reported for one node: the provider's string and its parsed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InferredType {
    pub raw: String,
    pub expr: TypeExpr,
}

impl InferredType {
    pub fn parse(parser: &PythonParser, raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            expr: TypeExpr::parse(parser, raw),
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.expr, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(raw: &str) -> TypeExpr {
        TypeExpr::parse(&PythonParser::new(), raw)
    }

    fn name(text: &str) -> TypeExpr {
        TypeExpr::Name(text.to_string())
    }

    #[test]
    fn test_parses_generic_types() {
        assert_eq!(
            parse("typing.Dict[str, typing.List[int]]"),
            TypeExpr::Subscript {
                base: Box::new(name("typing.Dict")),
                args: vec![
                    name("str"),
                    TypeExpr::Subscript {
                        base: Box::new(name("typing.List")),
                        args: vec![name("int")],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_callable_with_list_argument() {
        let expr = parse("typing.Callable[[int, str], None]");
        assert_eq!(expr.to_string(), "typing.Callable[[int, str], None]");
        let TypeExpr::Subscript { args, .. } = &expr else {
            panic!("expected subscript, got {expr:?}");
        };
        assert_eq!(args[0], TypeExpr::List(vec![name("int"), name("str")]));
    }

    #[test]
    fn test_sanitizes_checker_specific_syntax() {
        assert_eq!(
            parse("typing.Callable[[], int]").to_string(),
            "typing.Callable[[NoContent], int]"
        );
        assert_eq!(
            parse("Variable[T (bound to int)]"),
            TypeExpr::Subscript {
                base: Box::new(name("Variable")),
                args: vec![TypeExpr::Call {
                    callee: Box::new(name("T")),
                    args: vec![TypeExpr::Keyword {
                        name: "bound".to_string(),
                        value: Box::new(name("int")),
                    }],
                }],
            }
        );
        assert_eq!(parse("$parameter$x"), name("__dollar_sign__parameter__dollar_sign__x"));
    }

    #[test]
    fn test_unions_are_flattened() {
        assert_eq!(
            parse("int | str | None"),
            TypeExpr::Union(vec![
                name("int"),
                name("str"),
                TypeExpr::Literal("None".to_string())
            ])
        );
    }

    #[test]
    fn test_invalid_strings_become_sentinel() {
        for raw in ["typing.List[", "x = 1", "a + b", "<lambda>"] {
            let expr = parse(raw);
            assert!(expr.is_unparsable(), "{raw} parsed as {expr:?}");
            assert_eq!(expr.to_string(), raw);
        }
    }
}
