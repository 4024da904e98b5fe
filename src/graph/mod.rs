//! Ownership graph construction and queries

pub mod builder;
pub mod types;

pub use builder::OwnershipGraphService;
pub use types::{Direction, GraphEdge, GraphNode, GraphQuery, OwnershipGraph};
