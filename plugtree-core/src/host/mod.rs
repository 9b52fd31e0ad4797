//! Plugin Host
//!
//! The host ties the pieces together: it builds the execution tree once and
//! then runs the lifecycle phases in order, one at a time.
//!
//! 1. configure services into a fresh [`ServiceRegistry`]
//! 2. freeze the registry into an [`ExecutionContext`]
//! 3. initialize
//! 4. migrate, if enabled
//!
//! With `stop_on_phase_failure` set, a failed phase prevents the later ones
//! from starting.

mod manifest;

pub use manifest::{ComponentCatalog, ComponentManifest, ManifestError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::component::{ComponentId, ExecutionContext, ServiceRegistry};
use crate::graph::{ComponentSource, ExecutionTree, GraphBuilder, GraphError};
use crate::walk::{AggregateError, Phase};

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("invalid host configuration: {0}")]
    Config(#[source] serde_json::Error),
}

/// Host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Run the migrate phase after initialization.
    pub run_migrations: bool,

    /// Components to leave out, together with everything depending on them.
    pub disabled: Vec<ComponentId>,

    /// Do not start a phase once an earlier one failed.
    pub stop_on_phase_failure: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            run_migrations: true,
            disabled: Vec::new(),
            stop_on_phase_failure: true,
        }
    }
}

impl HostConfig {
    pub fn from_json(text: &str) -> Result<Self, HostError> {
        serde_json::from_str(text).map_err(HostError::Config)
    }
}

/// Results of [`PluginHost::start`].
#[derive(Debug)]
pub struct StartReport {
    phases: Vec<(Phase, Result<(), AggregateError>)>,
    context: ExecutionContext,
}

impl StartReport {
    /// `true` if every phase that ran succeeded.
    pub fn is_success(&self) -> bool {
        self.phases.iter().all(|(_, result)| result.is_ok())
    }

    /// Phases that ran, in order.
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.phases.iter().map(|(phase, _)| *phase)
    }

    pub fn phase(&self, phase: Phase) -> Option<&Result<(), AggregateError>> {
        self.phases
            .iter()
            .find(|(ran, _)| *ran == phase)
            .map(|(_, result)| result)
    }

    pub fn errors(&self) -> impl Iterator<Item = &AggregateError> {
        self.phases.iter().filter_map(|(_, result)| result.as_ref().err())
    }

    /// The context built from the configured services.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The context on success, otherwise the first phase error.
    pub fn into_result(self) -> Result<ExecutionContext, AggregateError> {
        for (_, result) in self.phases {
            result?;
        }
        Ok(self.context)
    }
}

/// Owns an execution tree and drives its lifecycle.
#[derive(Debug)]
pub struct PluginHost {
    tree: ExecutionTree,
    config: HostConfig,
}

impl PluginHost {
    pub fn new<I>(sources: I, config: HostConfig) -> Result<Self, HostError>
    where
        I: IntoIterator<Item = ComponentSource>,
    {
        let mut builder = GraphBuilder::new();
        builder.extend(sources)?;
        for id in &config.disabled {
            builder.disable(id.clone());
        }
        let tree = builder.build()?;
        info!(
            components = tree.len(),
            branches = tree.branches().len(),
            excluded = tree.excluded().len(),
            "plugin host ready"
        );
        Ok(Self { tree, config })
    }

    /// Build a host from manifests, using `catalog` to construct components.
    pub fn from_manifests(
        manifests: Vec<ComponentManifest>,
        catalog: &ComponentCatalog,
        config: HostConfig,
    ) -> Result<Self, HostError> {
        Self::new(catalog.sources(manifests), config)
    }

    /// Like [`PluginHost::from_manifests`], reading the manifests from JSON.
    pub fn from_manifest_json(
        text: &str,
        catalog: &ComponentCatalog,
        config: HostConfig,
    ) -> Result<Self, HostError> {
        let manifests = ComponentManifest::from_json(text)?;
        Self::from_manifests(manifests, catalog, config)
    }

    /// Get the execution tree built for this host.
    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    /// Get the settings this host was created with.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run every lifecycle phase.
    pub async fn start(&self, cancel: &CancellationToken) -> StartReport {
        let mut phases = Vec::with_capacity(3);

        let mut services = ServiceRegistry::new();
        let configured = self.tree.configure_services(&mut services);
        let mut halted = self.halts(&configured);
        phases.push((Phase::ConfigureServices, configured));
        let context = services.into_context();

        if !halted {
            let initialized = self.tree.initialize(&context, cancel).await;
            halted = self.halts(&initialized);
            phases.push((Phase::Initialize, initialized));
        }

        if !halted && self.config.run_migrations {
            let migrated = self.tree.migrate(&context, cancel).await;
            phases.push((Phase::Migrate, migrated));
        }

        let report = StartReport { phases, context };
        if report.is_success() {
            info!("plugin host started");
        } else {
            warn!(failed_phases = report.errors().count(), "plugin host started with failures");
        }
        report
    }

    fn halts(&self, result: &Result<(), AggregateError>) -> bool {
        result.is_err() && self.config.stop_on_phase_failure
    }
}
