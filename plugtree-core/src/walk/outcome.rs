//! Walk results and their aggregation.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::component::{ComponentError, ComponentId};
use crate::graph::NodeIndex;

/// The lifecycle phase a walk was driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ConfigureServices,
    Initialize,
    Migrate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::ConfigureServices => "configure-services",
            Phase::Initialize => "initialize",
            Phase::Migrate => "migrate",
        })
    }
}

/// Why a single node is reported as failed.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The node's own operation returned an error or panicked.
    #[error("component '{name}' ({component}) failed: {cause}")]
    OperationFailed {
        component: ComponentId,
        name: String,
        cause: ComponentError,
    },

    /// The node is marked failed because an upstream dependency failed.
    #[error("component '{name}' ({component}) skipped: dependency '{ancestor}' failed")]
    CascadedFailure {
        component: ComponentId,
        name: String,
        ancestor: ComponentId,
    },

    /// The node's operation observed cancellation.
    #[error("component '{name}' ({component}) cancelled")]
    Cancelled { component: ComponentId, name: String },
}

impl NodeError {
    /// Classify a component's own failure.
    pub fn from_component(component: ComponentId, name: String, cause: ComponentError) -> Self {
        match cause {
            ComponentError::Cancelled => NodeError::Cancelled { component, name },
            cause => NodeError::OperationFailed {
                component,
                name,
                cause,
            },
        }
    }

    /// Get the id of the component this failure is reported for.
    pub fn component(&self) -> &ComponentId {
        match self {
            NodeError::OperationFailed { component, .. }
            | NodeError::CascadedFailure { component, .. }
            | NodeError::Cancelled { component, .. } => component,
        }
    }

    /// Get the display name of the component this failure is reported for.
    pub fn name(&self) -> &str {
        match self {
            NodeError::OperationFailed { name, .. }
            | NodeError::CascadedFailure { name, .. }
            | NodeError::Cancelled { name, .. } => name,
        }
    }

    /// `true` unless the failure is only fallout from a dependency.
    pub fn is_root_cause(&self) -> bool {
        !matches!(self, NodeError::CascadedFailure { .. })
    }
}

/// One result emitted by a walk.
#[derive(Debug)]
pub struct NodeOutcome {
    pub node: NodeIndex,
    pub component: ComponentId,
    pub result: Result<(), NodeError>,
}

impl NodeOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Every failure produced by one phase.
#[derive(Error, Debug)]
#[error("{phase} failed for {} component(s)", self.component_count())]
pub struct AggregateError {
    phase: Phase,
    failures: Vec<NodeError>,
    succeeded: Vec<ComponentId>,
}

impl AggregateError {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of distinct components with at least one failure.
    pub fn component_count(&self) -> usize {
        self.failures
            .iter()
            .map(NodeError::component)
            .collect::<HashSet<_>>()
            .len()
    }

    /// All failures in emission order, cascaded markers included.
    pub fn failures(&self) -> &[NodeError] {
        &self.failures
    }

    /// Components whose operations succeeded during the same phase.
    pub fn succeeded(&self) -> &[ComponentId] {
        &self.succeeded
    }

    /// Failures caused by the component itself.
    pub fn root_causes(&self) -> impl Iterator<Item = &NodeError> {
        self.failures.iter().filter(|failure| failure.is_root_cause())
    }

    /// Failures that are only fallout from a failed dependency.
    pub fn cascaded(&self) -> impl Iterator<Item = &NodeError> {
        self.failures.iter().filter(|failure| !failure.is_root_cause())
    }

    pub fn into_failures(self) -> Vec<NodeError> {
        self.failures
    }
}

/// Fold a walk's outcomes into a single phase result.
pub fn aggregate(phase: Phase, outcomes: Vec<NodeOutcome>) -> Result<(), AggregateError> {
    let mut failures = Vec::new();
    let mut succeeded = Vec::new();

    for outcome in outcomes {
        match outcome.result {
            Ok(()) => succeeded.push(outcome.component),
            Err(error) => failures.push(error),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(AggregateError {
            phase,
            failures,
            succeeded,
        })
    }
}
