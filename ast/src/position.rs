//! Source positions and ranges
//!
//! Lines are 1-based, columns are 0-based byte offsets within the line. Ranges
//! are half-open: a range covers `start <= p < end`.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// A `(line, column)` location in a source file.
///
/// The derived ordering compares the line first and then the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodePosition {
    pub line: usize,
    pub column: usize,
}

impl CodePosition {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Convert a tree-sitter point (0-based row) into a position.
    pub const fn from_point(point: tree_sitter::Point) -> Self {
        Self {
            line: point.row + 1,
            column: point.column,
        }
    }

    pub const fn as_tuple(&self) -> (usize, usize) {
        (self.line, self.column)
    }
}

impl fmt::Display for CodePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

impl From<(usize, usize)> for CodePosition {
    fn from((line, column): (usize, usize)) -> Self {
        Self { line, column }
    }
}

/// A half-open `[start, end)` span of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: CodePosition,
    pub end: CodePosition,
}

impl CodeRange {
    pub const fn new(start: CodePosition, end: CodePosition) -> Self {
        Self { start, end }
    }

    /// A range whose endpoints coincide covers no source.
    pub fn is_degenerate(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, point: CodePosition) -> bool {
        self.start <= point && point < self.end
    }

    /// True when `other` lies within `self` (non-strict on both ends).
    pub fn encloses(&self, other: &CodeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &CodeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(f, "{}-{}", self.start, self.end.column)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
