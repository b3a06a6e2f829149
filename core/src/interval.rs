//! Interval index over half-open ranges
//!
//! An AVL tree keyed by `(start, end)` where every node also records the
//! largest `end` found in its subtree, so point and range queries can prune
//! whole subtrees. Nodes live in a flat arena and refer to each other by
//! index.

use crate::error::IndexError;
use crate::error::Result;
use std::cmp::Ordering;
use std::fmt;

/// One stored interval as returned by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval<'a, K, V> {
    pub start: K,
    pub end: K,
    pub value: &'a V,
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    start: K,
    end: K,
    value: V,
    max_end: K,
    height: u32,
    left: Option<usize>,
    right: Option<usize>,
}

/// Index of `[start, end)` intervals carrying a payload each.
#[derive(Debug, Clone)]
pub struct IntervalIndex<K, V> {
    nodes: Vec<Node<K, V>>,
    root: Option<usize>,
}

impl<K: Ord + Copy, V> Default for IntervalIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy, V> IntervalIndex<K, V> {
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Build a balanced index from a batch of intervals in O(n log n).
    pub fn from_intervals<I>(intervals: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, K, V)>,
        K: fmt::Debug,
    {
        let mut intervals: Vec<(K, K, V)> = intervals.into_iter().collect();
        for (start, end, _) in &intervals {
            check_interval(*start, *end)?;
        }
        intervals.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut index = Self {
            nodes: intervals
                .into_iter()
                .map(|(start, end, value)| Node {
                    start,
                    end,
                    value,
                    max_end: end,
                    height: 1,
                    left: None,
                    right: None,
                })
                .collect(),
            root: None,
        };
        index.root = index.link_balanced(0, index.nodes.len());
        Ok(index)
    }

    /// Turn the sorted arena slice `lo..hi` into a balanced subtree.
    fn link_balanced(&mut self, lo: usize, hi: usize) -> Option<usize> {
        if lo >= hi {
            return None;
        }
        let mid = lo + (hi - lo) / 2;
        let left = self.link_balanced(lo, mid);
        let right = self.link_balanced(mid + 1, hi);
        self.nodes[mid].left = left;
        self.nodes[mid].right = right;
        self.update(mid);
        Some(mid)
    }

    /// Insert one interval. Empty intervals (`start >= end`) are rejected.
    pub fn insert(&mut self, start: K, end: K, value: V) -> Result<()>
    where
        K: fmt::Debug,
    {
        check_interval(start, end)?;
        let new = self.nodes.len();
        self.nodes.push(Node {
            start,
            end,
            value,
            max_end: end,
            height: 1,
            left: None,
            right: None,
        });
        self.root = Some(self.insert_at(self.root, new));
        Ok(())
    }

    fn insert_at(&mut self, subtree: Option<usize>, new: usize) -> usize {
        let Some(current) = subtree else {
            return new;
        };
        let new_key = (self.nodes[new].start, self.nodes[new].end);
        let current_key = (self.nodes[current].start, self.nodes[current].end);
        // Equal keys go right so insertion order is kept among duplicates.
        if new_key < current_key {
            let left = self.insert_at(self.nodes[current].left, new);
            self.nodes[current].left = Some(left);
        } else {
            let right = self.insert_at(self.nodes[current].right, new);
            self.nodes[current].right = Some(right);
        }
        self.update(current);
        self.rebalance(current)
    }

    fn height(&self, node: Option<usize>) -> u32 {
        node.map_or(0, |idx| self.nodes[idx].height)
    }

    fn update(&mut self, idx: usize) {
        let (left, right) = (self.nodes[idx].left, self.nodes[idx].right);
        let mut max_end = self.nodes[idx].end;
        for child in [left, right].into_iter().flatten() {
            max_end = max_end.max(self.nodes[child].max_end);
        }
        self.nodes[idx].max_end = max_end;
        self.nodes[idx].height = 1 + self.height(left).max(self.height(right));
    }

    fn balance_factor(&self, idx: usize) -> i64 {
        i64::from(self.height(self.nodes[idx].left)) - i64::from(self.height(self.nodes[idx].right))
    }

    fn rebalance(&mut self, idx: usize) -> usize {
        let balance = self.balance_factor(idx);
        if balance > 1 {
            if let Some(left) = self.nodes[idx].left
                && self.balance_factor(left) < 0
            {
                self.nodes[idx].left = Some(self.rotate_left(left));
            }
            return self.rotate_right(idx);
        }
        if balance < -1 {
            if let Some(right) = self.nodes[idx].right
                && self.balance_factor(right) > 0
            {
                self.nodes[idx].right = Some(self.rotate_right(right));
            }
            return self.rotate_left(idx);
        }
        idx
    }

    fn rotate_right(&mut self, y: usize) -> usize {
        let Some(x) = self.nodes[y].left else {
            return y;
        };
        self.nodes[y].left = self.nodes[x].right;
        self.nodes[x].right = Some(y);
        self.update(y);
        self.update(x);
        x
    }

    fn rotate_left(&mut self, x: usize) -> usize {
        let Some(y) = self.nodes[x].right else {
            return x;
        };
        self.nodes[x].right = self.nodes[y].left;
        self.nodes[y].left = Some(x);
        self.update(x);
        self.update(y);
        y
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Height of the tree; zero when empty.
    pub fn depth(&self) -> usize {
        self.height(self.root) as usize
    }

    /// Every interval containing `point` (`start <= point < end`), ordered by
    /// `(start, end)`.
    pub fn at(&self, point: K) -> Vec<Interval<'_, K, V>> {
        let mut found = Vec::new();
        self.collect_at(self.root, point, &mut found);
        found
    }

    fn collect_at<'a>(&'a self, subtree: Option<usize>, point: K, found: &mut Vec<Interval<'a, K, V>>) {
        let Some(idx) = subtree else {
            return;
        };
        let node = &self.nodes[idx];
        if node.max_end <= point {
            return;
        }
        self.collect_at(node.left, point, found);
        if node.start <= point {
            if point < node.end {
                found.push(self.interval(idx));
            }
            self.collect_at(node.right, point, found);
        }
    }

    /// Every interval sharing at least one point with `[start, end)`.
    pub fn overlap(&self, start: K, end: K) -> Vec<Interval<'_, K, V>> {
        let mut found = Vec::new();
        if start < end {
            self.collect_overlap(self.root, start, end, &mut found);
        }
        found
    }

    fn collect_overlap<'a>(
        &'a self,
        subtree: Option<usize>,
        start: K,
        end: K,
        found: &mut Vec<Interval<'a, K, V>>,
    ) {
        let Some(idx) = subtree else {
            return;
        };
        let node = &self.nodes[idx];
        if node.max_end <= start {
            return;
        }
        self.collect_overlap(node.left, start, end, found);
        if node.start < end {
            if node.end > start {
                found.push(self.interval(idx));
            }
            self.collect_overlap(node.right, start, end, found);
        }
    }

    /// Every interval lying entirely inside `[start, end]`.
    pub fn envelop(&self, start: K, end: K) -> Vec<Interval<'_, K, V>> {
        let mut found = Vec::new();
        if start < end {
            self.collect_envelop(self.root, start, end, &mut found);
        }
        found
    }

    fn collect_envelop<'a>(
        &'a self,
        subtree: Option<usize>,
        start: K,
        end: K,
        found: &mut Vec<Interval<'a, K, V>>,
    ) {
        let Some(idx) = subtree else {
            return;
        };
        let node = &self.nodes[idx];
        if node.max_end <= start {
            return;
        }
        if node.start >= start {
            self.collect_envelop(node.left, start, end, found);
        }
        if node.start < end {
            if node.start >= start && node.end <= end {
                found.push(self.interval(idx));
            }
            self.collect_envelop(node.right, start, end, found);
        }
    }

    /// All intervals in `(start, end)` order.
    pub fn iter(&self) -> impl Iterator<Item = Interval<'_, K, V>> + '_ {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();
        let mut current = self.root;
        while current.is_some() || !stack.is_empty() {
            while let Some(idx) = current {
                stack.push(idx);
                current = self.nodes[idx].left;
            }
            if let Some(idx) = stack.pop() {
                order.push(idx);
                current = self.nodes[idx].right;
            }
        }
        order.into_iter().map(|idx| self.interval(idx))
    }

    fn interval(&self, idx: usize) -> Interval<'_, K, V> {
        let node = &self.nodes[idx];
        Interval {
            start: node.start,
            end: node.end,
            value: &node.value,
        }
    }
}

fn check_interval<K: Ord + fmt::Debug>(start: K, end: K) -> Result<()> {
    match start.cmp(&end) {
        Ordering::Less => Ok(()),
        _ => Err(IndexError::EmptyInterval {
            start: format!("{start:?}"),
            end: format!("{end:?}"),
        }),
    }
}
