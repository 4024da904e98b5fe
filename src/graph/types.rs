//! Ownership graph types
//!
//! The graph is a derived view, materialized per request from the persisted
//! holdings; it is never stored. Edges always point owner → owned company,
//! regardless of traversal direction.

use serde::{Deserialize, Serialize};

use crate::registry::types::EntityType;

/// Hard ceiling on traversal depth; keeps the graph bounded and rendering
/// tractable even for dense conglomerates.
pub const MAX_GRAPH_DEPTH: u32 = 5;

/// Default depth when the caller does not specify one.
pub const DEFAULT_GRAPH_DEPTH: u32 = 3;

/// Traversal direction from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Who owns the root company.
    Up,
    /// What the root company/entity owns.
    Down,
    /// Both traversals from the same root.
    Both,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction '{other}', expected up/down/both")),
        }
    }
}

/// One ownership graph request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQuery {
    pub orgnr: String,
    pub year: i32,
    pub direction: Direction,
    pub depth: u32,
}

impl GraphQuery {
    pub fn new(orgnr: impl Into<String>, year: i32) -> Self {
        Self {
            orgnr: orgnr.into(),
            year,
            direction: Direction::Both,
            depth: DEFAULT_GRAPH_DEPTH,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Effective traversal depth: at least 1, never above the ceiling.
    pub fn bounded_depth(&self) -> u32 {
        self.depth.clamp(1, MAX_GRAPH_DEPTH)
    }
}

/// A deduplicated entity/company in the result graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable id: the entity key string.
    pub id: String,
    pub name: String,
    pub node_type: EntityType,
    pub orgnr: Option<String>,
    /// Hops from the root (0 = root).
    pub depth: u32,
}

/// A holding relationship, owner → owned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub share_class: String,
    pub shares: u64,
    /// Percent of the owned company's aggregated total for the year, when
    /// that total is known.
    pub ownership_pct: Option<f64>,
}

/// The materialized node/edge view for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnershipGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub year: i32,
    pub truncated_at_depth: bool,
}

impl OwnershipGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
