//! Plugtree Core
//!
//! This crate drives host plugins ("components") through their lifecycle in
//! dependency order. It implements:
//!
//! - Construction of an execution tree from declared dependencies, keeping
//!   only direct edges
//! - Depth-first lifecycle walks that visit each component once
//! - Cascading failure reports, so a broken dependency marks its dependents
//! - A small host that runs configure, initialize and migrate in sequence
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `component`: the capability traits a plugin implements, and the service
//!   surfaces passed to them
//! - `graph`: tree nodes, the execution tree and the builder that creates it
//! - `walk`: the generic walker and result aggregation
//! - `host`: manifests, factories, host configuration and the plugin host
//!
//! # Example
//!
//! ```rust,ignore
//! use plugtree_core::graph::{ComponentSource, GraphBuilder};
//! use plugtree_core::component::ServiceRegistry;
//!
//! let mut builder = GraphBuilder::new();
//! builder.add(ComponentSource::from_component(core, Vec::<&str>::new()))?;
//! builder.add(ComponentSource::from_component(logging, ["core"]))?;
//! let tree = builder.build()?;
//!
//! let mut services = ServiceRegistry::new();
//! tree.configure_services(&mut services)?;
//! tree.initialize(&services.into_context(), &cancel).await?;
//! ```

pub mod component;
pub mod graph;
pub mod host;
pub mod walk;

#[cfg(test)]
mod testing;

pub use component::{Component, ComponentError, ComponentId, ComponentMetadata, Migrator};
pub use graph::{ComponentSource, ExecutionTree, GraphBuilder, GraphError};
pub use host::{HostConfig, HostError, PluginHost};
pub use walk::{AggregateError, NodeError, Phase};
