//! Metadata providers
//!
//! A provider is a batch computation that produces facts for syntax nodes:
//! inferred types or qualified names. Providers address nodes by source range
//! (and optionally by kind), which keeps their output independent of any one
//! parse and lets it be cached on disk.

mod literals;
mod names;
mod pyre;

pub use literals::LiteralTypeProvider;
pub use names::QualifiedNameProvider;
pub use names::module_name;
pub use pyre::PyreTypeProvider;
pub use pyre::parse_types_response;

use crate::error::ProviderError;
use crate::facts::NodeMetadata;
use crate::facts::QualifiedName;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use typescope_ast::CodeRange;
use typescope_ast::SyntaxId;
use tracing::warn;
use typescope_ast::SyntaxTree;

/// Which [`NodeFact`](crate::NodeFact) field a provider fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactKind {
    InferredType,
    QualifiedName,
}

/// What a provider's output depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderScope {
    /// Output for one file may change when any tracked file changes.
    Repository,
    /// Output for one file depends on that file only.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactValue {
    Type(String),
    QualifiedNames(Vec<QualifiedName>),
}

/// One fact for the syntax node spanning `range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    pub range: CodeRange,
    /// Grammar kind of the target node; `None` matches any node.
    pub kind: Option<String>,
    pub value: FactValue,
}

/// Annotations per tracked file, keyed by `/`-separated path relative to the
/// repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub files: BTreeMap<String, Vec<NodeAnnotation>>,
}

impl ProviderOutput {
    pub fn annotations(&self, path: &str) -> &[NodeAnnotation] {
        self.files.get(path).map_or(&[], Vec::as_slice)
    }
}

/// An external computation of per-node metadata.
///
/// `compute` is blocking and may be slow; callers run it off the async
/// executor. File-scoped providers are called with one path at a time.
pub trait MetadataProvider: Send + Sync {
    /// Stable identifier, used in cache keys.
    fn id(&self) -> &str;

    fn fact(&self) -> FactKind;

    fn scope(&self) -> ProviderScope;

    fn compute(&self, root: &Path, paths: &[String]) -> Result<ProviderOutput, ProviderError>;
}

/// Attach annotations to the nodes of `tree`.
///
/// An annotation lands on a node whose range equals the annotation's range and
/// whose kind matches when one is given. Among several such nodes the
/// innermost one (last in pre-order) wins. Annotations matching no node are
/// dropped.
pub fn attach_annotations(tree: &SyntaxTree, annotations: &[NodeAnnotation], metadata: &mut NodeMetadata) {
    if annotations.is_empty() {
        return;
    }
    let mut by_range: HashMap<CodeRange, Vec<SyntaxId>> = HashMap::new();
    for (id, node) in tree.iter() {
        by_range.entry(node.range).or_default().push(id);
    }

    for annotation in annotations {
        let Some(candidates) = by_range.get(&annotation.range) else {
            continue;
        };
        let target = candidates.iter().rev().copied().find(|id| {
            annotation
                .kind
                .as_deref()
                .is_none_or(|kind| tree.node(*id).kind.as_str() == kind)
        });
        let Some(target) = target else {
            continue;
        };
        match &annotation.value {
            FactValue::Type(raw) => {
                metadata.types.insert(target, raw.clone());
            }
            FactValue::QualifiedNames(names) => {
                let entry = metadata.names.entry(target).or_default();
                for name in names {
                    if !entry.contains(name) {
                        entry.push(name.clone());
                    }
                }
            }
        }
    }
}

/// Text of a tracked module, or `None` when it is missing or not UTF-8.
///
/// One unreadable module never fails a whole computation; it simply gets no
/// annotations.
pub(crate) fn read_source(provider: &str, root: &Path, path: &str) -> Option<String> {
    let full = root.join(path);
    match fs::read_to_string(&full) {
        Ok(source) => Some(source),
        Err(e) => {
            warn!(provider, path, error = %e, "skipping unreadable module");
            None
        }
    }
}
