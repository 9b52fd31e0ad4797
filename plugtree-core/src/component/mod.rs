//! Components
//!
//! A component (plugin) is the unit the engine drives through its lifecycle.
//! The engine never discovers or instantiates components itself: a discovery
//! layer hands it already-constructed descriptors, each implementing
//! [`Component`].
//!
//! # Lifecycle
//!
//! Every component is driven through three phases, in order:
//!
//! 1. `configure_services` - synchronous; registers what the component
//!    provides into a shared [`ServiceRegistry`].
//! 2. `initialize` - asynchronous; the component may look up services through
//!    the read-only [`ExecutionContext`].
//! 3. `migrate` - asynchronous and optional; only components that expose a
//!    [`Migrator`] take part.
//!
//! Long-running operations receive a [`CancellationToken`] and are expected to
//! return [`ComponentError::Cancelled`] once they observe it.

mod services;

pub use services::{ExecutionContext, ServiceRegistry};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Stable identifier of a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Create an identifier from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ComponentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Descriptive data every component carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentMetadata {
    pub id: ComponentId,
    pub name: String,
    pub version: String,
}

impl ComponentMetadata {
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Failure returned by a component's own lifecycle operation.
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("{0}")]
    Failed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("required service not registered: {0}")]
    MissingService(&'static str),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ComponentError {
    /// Shorthand for a plain failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The lifecycle capabilities of a component.
#[async_trait]
pub trait Component: Send + Sync {
    /// Identity, name and version of this component.
    fn metadata(&self) -> &ComponentMetadata;

    /// Register the services this component provides.
    fn configure_services(&self, services: &mut ServiceRegistry) -> Result<(), ComponentError>;

    /// Bring the component up once every service has been registered.
    async fn initialize(
        &self,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), ComponentError>;

    /// The migration capability, if this component owns persistent state.
    fn migrator(&self) -> Option<&dyn Migrator> {
        None
    }

    fn id(&self) -> &ComponentId {
        &self.metadata().id
    }

    fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Optional capability for components that migrate a persistent store.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(
        &self,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), ComponentError>;
}
