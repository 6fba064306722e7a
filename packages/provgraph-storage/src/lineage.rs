//! Lineage graph store
//!
//! Queryable directed graph of provenance nodes built from persisted edge
//! records, with:
//! - Forward and reverse adjacency indices: O(1) lookup per hop
//! - BFS ancestor/descendant traversal: O(V+E) with a depth budget
//! - Lock-free concurrent access with DashMap

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::domain::ProvEdge;
use crate::{Result, StorageError};

/// Traversal direction over lineage edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineageDirection {
    /// Upstream: what produced this node (follow edges backwards)
    Ancestors,
    /// Downstream: what this node produced (follow edges forwards)
    Descendants,
}

impl LineageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineageDirection::Ancestors => "ancestors",
            LineageDirection::Descendants => "descendants",
        }
    }
}

impl std::fmt::Display for LineageDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved traversal options: direction plus an optional hop budget.
///
/// `max_depth: None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineageOptions {
    pub direction: LineageDirection,
    pub max_depth: Option<u32>,
}

impl LineageOptions {
    pub fn new(direction: LineageDirection, max_depth: Option<u32>) -> Self {
        Self {
            direction,
            max_depth,
        }
    }

    pub fn ancestors(max_depth: Option<u32>) -> Self {
        Self::new(LineageDirection::Ancestors, max_depth)
    }

    pub fn descendants(max_depth: Option<u32>) -> Self {
        Self::new(LineageDirection::Descendants, max_depth)
    }
}

/// A lineage traversal request: seed value, direction, and signed depth.
///
/// The signed depth follows the wire convention: negative magnitude for
/// ancestors, positive for descendants, `0` for unbounded in the stated
/// direction. A sign that contradicts `direction` is a caller programming
/// error and is rejected, not silently corrected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageQuery {
    /// Seed node, by LSID or by name
    pub seed_value: String,
    pub direction: LineageDirection,
    pub depth: i64,
}

impl LineageQuery {
    pub fn new(seed_value: impl Into<String>, direction: LineageDirection, depth: i64) -> Self {
        Self {
            seed_value: seed_value.into(),
            direction,
            depth,
        }
    }

    /// Build a query from a bare signed depth: `depth < 0` is ancestors,
    /// `depth > 0` is descendants, `0` is unbounded descendants.
    pub fn from_signed(seed_value: impl Into<String>, depth: i64) -> Self {
        let direction = if depth < 0 {
            LineageDirection::Ancestors
        } else {
            LineageDirection::Descendants
        };
        Self::new(seed_value, direction, depth)
    }

    /// Validate the direction/depth combination and resolve to options.
    ///
    /// Fails fast on a contradictory combination (e.g. `Ancestors` with a
    /// positive signed depth).
    pub fn options(&self) -> Result<LineageOptions> {
        let consistent = match self.direction {
            LineageDirection::Ancestors => self.depth <= 0,
            LineageDirection::Descendants => self.depth >= 0,
        };
        if !consistent {
            return Err(StorageError::invalid_query(format!(
                "signed depth {} contradicts direction {}",
                self.depth, self.direction
            )));
        }

        let max_depth = match self.depth.unsigned_abs() {
            0 => None,
            n => Some(n.min(u32::MAX as u64) as u32),
        };
        Ok(LineageOptions::new(self.direction, max_depth))
    }
}

/// In-memory lineage graph with forward and reverse adjacency indices.
///
/// Rebuilt on demand from the backing store's edge records; read-mostly and
/// safe to share across threads. Not held as global state across requests.
pub struct LineageGraph {
    /// from_lsid -> outgoing edges
    children: Arc<DashMap<String, Vec<ProvEdge>>>,
    /// to_lsid -> incoming edges
    parents: Arc<DashMap<String, Vec<ProvEdge>>>,
}

impl LineageGraph {
    pub fn new() -> Self {
        Self {
            children: Arc::new(DashMap::new()),
            parents: Arc::new(DashMap::new()),
        }
    }

    /// Build a graph from persisted edge records.
    pub fn from_edges(edges: impl IntoIterator<Item = ProvEdge>) -> Self {
        let graph = Self::new();
        for edge in edges {
            graph.add_edge(edge);
        }
        graph
    }

    pub fn add_edge(&self, edge: ProvEdge) {
        self.parents
            .entry(edge.to_lsid.clone())
            .or_default()
            .push(edge.clone());
        self.children
            .entry(edge.from_lsid.clone())
            .or_default()
            .push(edge);
    }

    /// Number of distinct nodes with at least one outgoing edge.
    pub fn source_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.parents.is_empty()
    }

    /// Neighbors of `lsid` one hop in the given direction.
    fn neighbors(&self, lsid: &str, direction: LineageDirection) -> Vec<String> {
        match direction {
            LineageDirection::Descendants => self
                .children
                .get(lsid)
                .map(|edges| edges.iter().map(|e| e.to_lsid.clone()).collect())
                .unwrap_or_default(),
            LineageDirection::Ancestors => self
                .parents
                .get(lsid)
                .map(|edges| edges.iter().map(|e| e.from_lsid.clone()).collect())
                .unwrap_or_default(),
        }
    }

    /// BFS traversal from `seed`, returning every node reachable within the
    /// depth budget. The seed is excluded unless a cycle edge leads back to
    /// it, in which case it is a member of its own lineage, matching the
    /// compiled SQL predicate.
    ///
    /// An unknown seed yields an empty set (lineage filters on unknown
    /// seeds must degrade to "matches nothing"). The visited-set guard
    /// keeps traversal terminating even on malformed cyclic data.
    pub fn traverse(&self, seed: &str, options: LineageOptions) -> HashSet<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut result: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();

        visited.insert(seed.to_string());
        frontier.push_back((seed.to_string(), 0));

        while let Some((lsid, depth)) = frontier.pop_front() {
            if let Some(budget) = options.max_depth {
                if depth >= budget {
                    continue;
                }
            }

            for next in self.neighbors(&lsid, options.direction) {
                if visited.insert(next.clone()) {
                    result.insert(next.clone());
                    frontier.push_back((next, depth + 1));
                } else if next == seed {
                    // A cycle edge back to the seed puts it in its own
                    // lineage; it is still never re-expanded.
                    result.insert(next);
                }
            }
        }

        result
    }
}

impl Default for LineageGraph {
    fn default() -> Self {
        Self::new()
    }
}
