//! Dependency Graph
//!
//! This module turns discovered components into an execution tree.
//!
//! # Overview
//!
//! The tree is a directed acyclic graph where:
//!
//! - Nodes own one component each
//! - Edges run from a dependency to its dependents: if B depends on A, there
//!   is an edge from A to B
//! - Only direct edges are kept. If B depends on A and on C, and C already
//!   depends on A, the edge A -> B is dropped because A -> C -> B covers it
//!
//! Components without a known dependency are the branches (roots) of the
//! tree.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena owned by the tree and refer to each other by
//!    [`NodeIndex`]. A node shared by several parents exists once.
//!
//! 2. Dependents are kept in insertion order so every walk is deterministic.
//!
//! 3. The tree is immutable once built; edges are only added by the builder.

mod builder;
mod node;
mod tree;

pub use builder::{ComponentSource, Exclusion, ExclusionReason, GraphBuilder, GraphError};
pub use node::{NodeIndex, TransitiveDependents, TreeNode};
pub use tree::ExecutionTree;
