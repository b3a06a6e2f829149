//! Flattened syntax trees
//!
//! A [`SyntaxTree`] copies the named nodes of a tree-sitter tree into a flat
//! table so the rest of the system can address nodes by a plain integer id
//! instead of borrowing the tree-sitter tree.

use crate::kind::NodeKind;
use crate::position::CodePosition;
use crate::position::CodeRange;
use std::ops::Range;
use std::sync::Arc;
use tree_sitter::Tree;

/// Index of a node inside its [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyntaxId(u32);

impl SyntaxId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One named node of the parse tree.
#[derive(Debug, Clone)]
pub struct SyntaxNode {
    pub kind: NodeKind,
    pub range: CodeRange,
    pub bytes: Range<usize>,
    pub parent: Option<SyntaxId>,
    pub children: Vec<SyntaxId>,
    /// Grammar field under which this node hangs off its parent, e.g. `name`.
    pub field: Option<&'static str>,
}

/// Named nodes of one parsed source text, in pre-order.
///
/// Pre-order guarantees that every parent precedes its children, so a single
/// forward pass can resolve parent links.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    source: Arc<str>,
    nodes: Vec<SyntaxNode>,
}

impl SyntaxTree {
    pub(crate) fn from_tree(tree: &Tree, source: Arc<str>) -> Self {
        let mut nodes: Vec<SyntaxNode> = Vec::new();
        let mut cursor = tree.walk();
        // Nearest named ancestor for each depth the cursor has descended into.
        let mut parents: Vec<Option<SyntaxId>> = Vec::new();

        'walk: loop {
            let node = cursor.node();
            let inherited = parents.last().copied().flatten();
            let current = if node.is_named() {
                let id = SyntaxId(nodes.len() as u32);
                nodes.push(SyntaxNode {
                    kind: NodeKind::from_node_type(node.kind()),
                    range: CodeRange::new(
                        CodePosition::from_point(node.start_position()),
                        CodePosition::from_point(node.end_position()),
                    ),
                    bytes: node.byte_range(),
                    parent: inherited,
                    children: Vec::new(),
                    field: cursor.field_name(),
                });
                if let Some(parent) = inherited {
                    nodes[parent.index()].children.push(id);
                }
                Some(id)
            } else {
                inherited
            };

            if cursor.goto_first_child() {
                parents.push(current);
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    break 'walk;
                }
                parents.pop();
            }
        }

        Self { source, nodes }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn shared_source(&self) -> Arc<str> {
        Arc::clone(&self.source)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The module node, when the tree has one.
    pub fn root(&self) -> Option<SyntaxId> {
        (!self.nodes.is_empty()).then_some(SyntaxId(0))
    }

    pub fn node(&self, id: SyntaxId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: SyntaxId) -> Option<&SyntaxNode> {
        self.nodes.get(id.index())
    }

    /// All nodes with their ids, in pre-order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (SyntaxId, &SyntaxNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (SyntaxId(index as u32), node))
    }

    /// Source text covered by a node.
    pub fn text(&self, id: SyntaxId) -> &str {
        self.source
            .get(self.node(id).bytes.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: SyntaxId) -> Option<SyntaxId> {
        self.node(id).parent
    }

    /// Enclosing nodes from the direct parent outward.
    pub fn ancestors(&self, id: SyntaxId) -> impl Iterator<Item = SyntaxId> + '_ {
        std::iter::successors(self.parent(id), |current| self.parent(*current))
    }

    pub fn children(&self, id: SyntaxId) -> &[SyntaxId] {
        &self.node(id).children
    }

    /// Children hanging off `id` under the given grammar field.
    pub fn children_by_field<'a>(
        &'a self,
        id: SyntaxId,
        field: &'a str,
    ) -> impl Iterator<Item = SyntaxId> + 'a {
        self.children(id)
            .iter()
            .copied()
            .filter(move |child| self.node(*child).field == Some(field))
    }

    pub fn child_by_field(&self, id: SyntaxId, field: &str) -> Option<SyntaxId> {
        self.children_by_field(id, field).next()
    }
}
