//! Per-node facts linked into a forest
//!
//! A [`FactGraph`] holds one [`NodeFact`] per non-empty syntax node of a file.
//! Facts live in a flat arena; `parent` and `children` are arena indices, so
//! the graph has no reference cycles and facts compare structurally.

use crate::error::Result;
use crate::interval::IntervalIndex;
use crate::type_expr::InferredType;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use typescope_ast::CodePosition;
use typescope_ast::CodeRange;
use typescope_ast::NodeKind;
use typescope_ast::PythonParser;
use typescope_ast::SyntaxId;
use typescope_ast::SyntaxTree;

/// Index of a fact inside its [`FactGraph`].
///
/// Ids follow the pre-order of the syntax tree, so a node nested inside
/// another node with the same range gets the larger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a qualified name comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NameOrigin {
    Import,
    Builtin,
    Local,
}

impl NameOrigin {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Builtin => "builtin",
            Self::Local => "local",
        }
    }
}

/// Fully resolved identity of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub name: String,
    pub origin: NameOrigin,
}

impl QualifiedName {
    pub fn new(name: impl Into<String>, origin: NameOrigin) -> Self {
        Self {
            name: name.into(),
            origin,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, NameOrigin::Local)
    }

    pub fn import(name: impl Into<String>) -> Self {
        Self::new(name, NameOrigin::Import)
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        Self::new(name, NameOrigin::Builtin)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.origin.as_str())
    }
}

/// Resolved facts of one syntax node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFact {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Grammar field linking the node to its syntax parent, e.g. `name`.
    pub field: Option<&'static str>,
    pub range: CodeRange,
    pub inferred_type: Option<InferredType>,
    pub qualified_name: Option<QualifiedName>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Raw provider output attached to syntax nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    pub types: HashMap<SyntaxId, String>,
    pub names: HashMap<SyntaxId, Vec<QualifiedName>>,
}

impl NodeMetadata {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.names.is_empty()
    }
}

/// Arena of facts for one file plus its position and name indices.
#[derive(Debug, Clone)]
pub struct FactGraph {
    facts: Vec<NodeFact>,
    intervals: IntervalIndex<CodePosition, Vec<NodeId>>,
    names: HashMap<QualifiedName, Vec<NodeId>>,
}

impl FactGraph {
    /// Build the facts of `tree` annotated with `metadata`.
    ///
    /// Nodes with an empty range get no fact. The parent of a fact is the
    /// closest retained syntax ancestor whose range strictly encloses it; nodes
    /// that share their range with a wrapper node (an expression statement
    /// around a call, say) therefore become siblings of that wrapper.
    ///
    /// When a node has several candidate qualified names the smallest one by
    /// `(name, origin)` is kept.
    pub fn build(tree: &SyntaxTree, metadata: &NodeMetadata, parser: &PythonParser) -> Result<Self> {
        let mut facts: Vec<NodeFact> = Vec::new();
        let mut fact_of: Vec<Option<NodeId>> = vec![None; tree.len()];

        for (sid, node) in tree.iter() {
            if node.range.is_degenerate() {
                continue;
            }
            let id = NodeId(facts.len() as u32);
            fact_of[sid.index()] = Some(id);
            facts.push(NodeFact {
                id,
                kind: node.kind,
                field: node.field,
                range: node.range,
                inferred_type: metadata
                    .types
                    .get(&sid)
                    .map(|raw| InferredType::parse(parser, raw)),
                qualified_name: metadata
                    .names
                    .get(&sid)
                    .and_then(|candidates| candidates.iter().min().cloned()),
                parent: None,
                children: Vec::new(),
            });
        }

        // Facts exist for every retained node now, so parents can be linked.
        for (sid, _) in tree.iter() {
            let Some(id) = fact_of[sid.index()] else {
                continue;
            };
            let range = facts[id.index()].range;
            let parent = tree.ancestors(sid).find_map(|ancestor| {
                fact_of[ancestor.index()].filter(|candidate| {
                    let outer = facts[candidate.index()].range;
                    outer != range && outer.encloses(&range)
                })
            });
            if let Some(parent) = parent {
                facts[id.index()].parent = Some(parent);
                facts[parent.index()].children.push(id);
            }
        }

        let mut groups: BTreeMap<CodeRange, Vec<NodeId>> = BTreeMap::new();
        let mut names: HashMap<QualifiedName, Vec<NodeId>> = HashMap::new();
        for fact in &facts {
            groups.entry(fact.range).or_default().push(fact.id);
            if let Some(name) = &fact.qualified_name {
                names.entry(name.clone()).or_default().push(fact.id);
            }
        }
        let intervals = IntervalIndex::from_intervals(
            groups
                .into_iter()
                .map(|(range, ids)| (range.start, range.end, ids)),
        )?;

        debug!(
            facts = facts.len(),
            ranges = intervals.len(),
            names = names.len(),
            "built fact graph"
        );
        Ok(Self {
            facts,
            intervals,
            names,
        })
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn facts(&self) -> &[NodeFact] {
        &self.facts
    }

    pub fn fact(&self, id: NodeId) -> &NodeFact {
        &self.facts[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeFact> {
        self.facts.get(id.index())
    }

    /// Facts grouped by their shared range.
    pub fn intervals(&self) -> &IntervalIndex<CodePosition, Vec<NodeId>> {
        &self.intervals
    }

    /// Facts carrying exactly `name`, in id order.
    pub fn occurrences(&self, name: &QualifiedName) -> &[NodeId] {
        self.names.get(name).map_or(&[], Vec::as_slice)
    }

    /// Distinct qualified names present in the file
    pub fn qualified_names(&self) -> impl Iterator<Item = &QualifiedName> + '_ {
        self.names.keys()
    }

    /// Parent chain of `id`, outward to its root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            graph: self,
            next: self.get(id).and_then(|fact| fact.parent),
        }
    }
}

/// Iterator over the enclosing facts of a node; see [`FactGraph::ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    graph: &'a FactGraph,
    next: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a NodeFact;

    fn next(&mut self) -> Option<Self::Item> {
        let fact = self.graph.get(self.next?)?;
        self.next = fact.parent;
        Some(fact)
    }
}
