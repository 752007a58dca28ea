//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values, the computations that read them, and the
//! owners that dispose them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (cells) or computations (derived
//!   values, observers)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! A second, independent tree links every node to the owner that created
//! it. Disposal walks that tree; propagation walks the edges.
//!
//! # Design Decisions
//!
//! 1. We use a centralized arena rather than distributed linked lists:
//!    - Nodes are addressed by generational ids, so handles never dangle
//!    - Reference cycles between nodes cannot leak memory
//!
//! 2. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.
//!
//! 3. Dependents are kept in insertion order so that propagation is
//!    deterministic.

mod node;
mod scheduler;

pub use node::{DirtyState, NodeId, NodeKind};
pub(crate) use node::{Cleanup, Computation, ErrorHandler, Owned};
pub(crate) use scheduler::UpdateScheduler;
