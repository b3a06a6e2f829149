use super::FactKind;
use super::FactValue;
use super::MetadataProvider;
use super::NodeAnnotation;
use super::ProviderOutput;
use super::ProviderScope;
use super::read_source;
use crate::error::ProviderError;
use std::path::Path;
use tracing::warn;
use typescope_ast::NodeKind;
use typescope_ast::PythonParser;
use typescope_ast::SyntaxId;
use typescope_ast::SyntaxTree;

const PROVIDER_ID: &str = "literal-types";

/// Types of literal and display expressions, read straight off the syntax.
///
/// Needs no external tooling, so it gives every node a type a checker would
/// agree with even when no checker is configured.
#[derive(Debug, Default)]
pub struct LiteralTypeProvider {
    parser: PythonParser,
}

impl LiteralTypeProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn literal_type(tree: &SyntaxTree, id: SyntaxId) -> Option<&'static str> {
    let ty = match tree.node(id).kind {
        NodeKind::Integer | NodeKind::Float if tree.text(id).ends_with(['j', 'J']) => "complex",
        NodeKind::Integer => "int",
        NodeKind::Float => "float",
        NodeKind::String => {
            let prefix = tree.text(id).split(['\'', '"']).next().unwrap_or_default();
            if prefix.contains(['b', 'B']) { "bytes" } else { "str" }
        }
        NodeKind::ConcatenatedString => "str",
        NodeKind::True | NodeKind::False => "bool",
        NodeKind::None => "None",
        NodeKind::List | NodeKind::ListComprehension => "list",
        NodeKind::Dictionary | NodeKind::DictionaryComprehension => "dict",
        NodeKind::Set | NodeKind::SetComprehension => "set",
        NodeKind::Tuple => "tuple",
        NodeKind::GeneratorExpression => "typing.Generator",
        NodeKind::Lambda => "typing.Callable",
        _ => return None,
    };
    Some(ty)
}

impl MetadataProvider for LiteralTypeProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn fact(&self) -> FactKind {
        FactKind::InferredType
    }

    fn scope(&self) -> ProviderScope {
        ProviderScope::File
    }

    fn compute(&self, root: &Path, paths: &[String]) -> Result<ProviderOutput, ProviderError> {
        let mut output = ProviderOutput::default();
        for path in paths {
            let Some(source) = read_source(PROVIDER_ID, root, path) else {
                continue;
            };
            let tree = match self.parser.parse_module(&source) {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping unparsable module");
                    continue;
                }
            };
            let annotations = tree
                .iter()
                .filter(|(_, node)| !node.range.is_degenerate())
                .filter_map(|(id, node)| {
                    literal_type(&tree, id).map(|ty| NodeAnnotation {
                        range: node.range,
                        kind: Some(node.kind.as_str().to_string()),
                        value: FactValue::Type(ty.to_string()),
                    })
                })
                .collect();
            output.files.insert(path.clone(), annotations);
        }
        Ok(output)
    }
}
