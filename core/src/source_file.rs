//! Query surface over one indexed file

use crate::error::IndexError;
use crate::error::Result;
use crate::facts::Ancestors;
use crate::facts::FactGraph;
use crate::facts::NodeFact;
use crate::facts::NodeId;
use crate::facts::NodeMetadata;
use crate::facts::QualifiedName;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use typescope_ast::CodePosition;
use typescope_ast::CodeRange;
use typescope_ast::PythonParser;
use typescope_ast::SyntaxTree;

/// How [`SourceFileIndex::nodes_in_range`] matches nodes against a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// Nodes sharing at least one position with the range.
    Overlap,
    /// Nodes lying entirely inside the range.
    Envelop,
}

/// One file's text together with its node facts and their indices.
#[derive(Debug, Clone)]
pub struct SourceFileIndex {
    path: String,
    content_hash: String,
    source: Arc<str>,
    line_starts: Vec<usize>,
    graph: FactGraph,
}

impl SourceFileIndex {
    pub fn build(
        path: impl Into<String>,
        content_hash: impl Into<String>,
        tree: &SyntaxTree,
        metadata: &NodeMetadata,
        parser: &PythonParser,
    ) -> Result<Self> {
        let source = tree.shared_source();
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(at, _)| at + 1))
            .collect();
        Ok(Self {
            path: path.into(),
            content_hash: content_hash.into(),
            source,
            line_starts,
            graph: FactGraph::build(tree, metadata, parser)?,
        })
    }

    /// Index `source` without any provider metadata.
    pub fn from_source(path: &str, source: &str, parser: &PythonParser) -> Result<Self> {
        let tree = parser
            .parse_module(source)
            .map_err(|e| IndexError::parse(path, e))?;
        Self::build(
            path,
            crate::cache::content_hash(source.as_bytes()),
            &tree,
            &NodeMetadata::default(),
            parser,
        )
    }

    /// Path relative to the repository root, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn facts(&self) -> &[NodeFact] {
        self.graph.facts()
    }

    pub fn fact(&self, id: NodeId) -> Option<&NodeFact> {
        self.graph.get(id)
    }

    pub fn graph(&self) -> &FactGraph {
        &self.graph
    }

    /// Nodes whose range contains `point`, innermost first.
    ///
    /// Nodes sharing one range are ordered deepest first.
    pub fn nodes_at(&self, point: CodePosition) -> Vec<&NodeFact> {
        let mut nodes: Vec<&NodeFact> = self
            .graph
            .intervals()
            .at(point)
            .into_iter()
            .flat_map(|interval| interval.value.iter())
            .map(|id| self.graph.fact(*id))
            .collect();
        nodes.sort_by_key(|fact| innermost_first(fact));
        nodes
    }

    /// Nodes matching `[start, end)` under `mode`, in source order.
    pub fn nodes_in_range(&self, start: CodePosition, end: CodePosition, mode: RangeMode) -> Vec<&NodeFact> {
        let intervals = self.graph.intervals();
        let found = match mode {
            RangeMode::Overlap => intervals.overlap(start, end),
            RangeMode::Envelop => intervals.envelop(start, end),
        };
        found
            .into_iter()
            .flat_map(|interval| interval.value.iter())
            .map(|id| self.graph.fact(*id))
            .collect()
    }

    /// The most deeply nested of `candidates`.
    ///
    /// Candidates that are an ancestor of another candidate are discarded.
    /// When several remain (nodes sharing a range, or subtrees that only touch)
    /// the one with the latest start, then the earliest end, then the deepest
    /// position in the tree wins.
    pub fn minimal_node<'a>(&'a self, candidates: &[&'a NodeFact]) -> Option<&'a NodeFact> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        for candidate in candidates {
            for ancestor in self.ancestors_of(candidate) {
                if !seen.insert(ancestor.id) {
                    break;
                }
            }
        }
        candidates
            .iter()
            .copied()
            .filter(|candidate| !seen.contains(&candidate.id))
            .min_by_key(|candidate| innermost_first(candidate))
    }

    pub fn minimal_node_at(&self, point: CodePosition) -> Option<&NodeFact> {
        self.minimal_node(&self.nodes_at(point))
    }

    /// Every node carrying exactly `name`.
    pub fn occurrences_of(&self, name: &QualifiedName) -> Vec<&NodeFact> {
        self.graph
            .occurrences(name)
            .iter()
            .map(|id| self.graph.fact(*id))
            .collect()
    }

    /// Every node sharing `node`'s qualified name; empty when it has none.
    pub fn occurrences_of_node(&self, node: &NodeFact) -> Vec<&NodeFact> {
        node.qualified_name
            .as_ref()
            .map(|name| self.occurrences_of(name))
            .unwrap_or_default()
    }

    /// Enclosing nodes of `node`, from its parent out to its root.
    pub fn ancestors_of(&self, node: &NodeFact) -> Ancestors<'_> {
        self.graph.ancestors(node.id)
    }

    /// `node` itself or its closest ancestor with an inferred type.
    pub fn nearest_typed<'a>(&'a self, node: &'a NodeFact) -> Option<&'a NodeFact> {
        std::iter::once(node)
            .chain(self.ancestors_of(node))
            .find(|fact| fact.inferred_type.is_some())
    }

    /// Source text between two positions.
    ///
    /// Positions past the end of a line or of the file are clamped, so any
    /// range can be quoted whether or not nodes exist there. Multi-line
    /// ranges stop at the end column of their last line.
    pub fn text_at(&self, start: CodePosition, end: CodePosition) -> &str {
        let from = self.offset(start);
        let to = self.offset(end);
        if from >= to {
            return "";
        }
        self.source.get(from..to).unwrap_or_default()
    }

    pub fn text_of(&self, node: &NodeFact) -> &str {
        self.text_at(node.range.start, node.range.end)
    }

    pub fn text_of_range(&self, range: CodeRange) -> &str {
        self.text_at(range.start, range.end)
    }

    /// Byte offset of `position`, clamped to the source and to a character
    /// boundary.
    fn offset(&self, position: CodePosition) -> usize {
        let Some(line_start) = position
            .line
            .checked_sub(1)
            .and_then(|line| self.line_starts.get(line))
            .copied()
        else {
            return if position.line == 0 { 0 } else { self.source.len() };
        };
        let line_end = self
            .line_starts
            .get(position.line)
            .copied()
            .unwrap_or(self.source.len());
        let mut offset = line_start.saturating_add(position.column).min(line_end);
        while !self.source.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}

fn innermost_first(fact: &NodeFact) -> (Reverse<CodePosition>, CodePosition, Reverse<NodeId>) {
    (Reverse(fact.range.start), fact.range.end, Reverse(fact.id))
}
