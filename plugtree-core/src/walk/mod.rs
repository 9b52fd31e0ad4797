//! Lifecycle Walks
//!
//! A walk drives one operation over every node of an [`ExecutionTree`],
//! dependencies before dependents, and reports one result per node.
//!
//! Failures never stop a walk. A node whose operation fails is reported as an
//! [`NodeError::OperationFailed`] (or [`NodeError::Cancelled`]), and each of
//! its transitive dependents additionally gets a
//! [`NodeError::CascadedFailure`], so the final report separates broken
//! components from the ones that only suffered from a broken dependency.
//!
//! [`ExecutionTree`]: crate::graph::ExecutionTree

mod outcome;
mod walker;

pub use outcome::{aggregate, AggregateError, NodeError, NodeOutcome, Phase};
pub use walker::{cascaded_failure, Walker};
