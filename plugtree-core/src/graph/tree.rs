//! Execution Tree
//!
//! The tree owns every node in an arena and remembers which nodes are
//! branches (components without known dependencies). The host itself is the
//! implicit root and is never materialised.
//!
//! Each lifecycle phase is a pre-order walk from the branches, in branch
//! order. A node reachable from several branches runs under the first one
//! that reaches it, so the order in which components were handed to the
//! builder decides scheduling. Callers must not run two phases against the
//! same tree at the same time.

use std::collections::{HashMap, HashSet};
use std::fmt;

use futures_util::future::{self, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::builder::Exclusion;
use super::node::{NodeIndex, TransitiveDependents, TreeNode};
use crate::component::{ComponentId, ExecutionContext, ServiceRegistry};
use crate::walk::{aggregate, cascaded_failure, AggregateError, NodeOutcome, Phase, Walker};

/// A forest of components linked by direct dependency edges.
pub struct ExecutionTree {
    nodes: Vec<TreeNode>,
    branches: Vec<NodeIndex>,
    index: HashMap<ComponentId, NodeIndex>,
    excluded: Vec<Exclusion>,
}

impl ExecutionTree {
    pub(crate) fn from_parts(
        nodes: Vec<TreeNode>,
        branches: Vec<NodeIndex>,
        excluded: Vec<Exclusion>,
    ) -> Self {
        let index = nodes
            .iter()
            .map(|node| (node.id().clone(), node.index()))
            .collect();
        Self {
            nodes,
            branches,
            index,
            excluded,
        }
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node by arena index.
    pub fn node(&self, index: NodeIndex) -> Option<&TreeNode> {
        self.nodes.get(index.raw())
    }

    /// Get a node by the id its component was declared under.
    pub fn node_by_id(&self, id: &ComponentId) -> Option<&TreeNode> {
        self.index.get(id).and_then(|&index| self.node(index))
    }

    /// Root nodes, in the order walks visit them.
    pub fn branches(&self) -> &[NodeIndex] {
        &self.branches
    }

    /// Every node, in construction (dependency) order.
    pub fn iter(&self) -> std::slice::Iter<'_, TreeNode> {
        self.nodes.iter()
    }

    /// Components left out during construction.
    pub fn excluded(&self) -> &[Exclusion] {
        &self.excluded
    }

    /// All nodes that depend on `index`, directly or transitively.
    pub fn transitive_dependents(&self, index: NodeIndex) -> TransitiveDependents<'_> {
        TransitiveDependents::new(&self.nodes, index)
    }

    pub(crate) fn node_at(&self, index: NodeIndex) -> &TreeNode {
        &self.nodes[index.raw()]
    }

    /// Run every component's `configure_services` against one registry.
    pub fn configure_services(&self, services: &mut ServiceRegistry) -> Result<(), AggregateError> {
        let phase = Phase::ConfigureServices;
        let _span = info_span!("phase", %phase).entered();

        let outcomes = Walker::new(self, cascaded_failure)
            .run(|node| node.component().configure_services(services));
        finish(phase, outcomes)
    }

    /// Run every component's `initialize`, one at a time.
    pub async fn initialize(
        &self,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), AggregateError> {
        let phase = Phase::Initialize;
        let outcomes = Walker::new(self, cascaded_failure)
            .run_async(|node| node.component().initialize(context, cancel))
            .instrument(info_span!("phase", %phase))
            .await;
        finish(phase, outcomes)
    }

    /// Run `migrate` for every component that supports it.
    ///
    /// Components without a migrator succeed trivially; their dependents are
    /// still visited.
    pub async fn migrate(
        &self,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), AggregateError> {
        let phase = Phase::Migrate;
        let outcomes = Walker::new(self, cascaded_failure)
            .run_async(|node| match node.component().migrator() {
                Some(migrator) => migrator.migrate(context, cancel),
                None => future::ready(Ok(())).boxed(),
            })
            .instrument(info_span!("phase", %phase))
            .await;
        finish(phase, outcomes)
    }
}

fn finish(phase: Phase, outcomes: Vec<NodeOutcome>) -> Result<(), AggregateError> {
    let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
    let result = aggregate(phase, outcomes);
    match &result {
        Ok(()) => info!(%phase, "phase completed"),
        Err(error) => warn!(
            %phase,
            failed,
            root_causes = error.root_causes().count(),
            "phase failed"
        ),
    }
    result
}

impl fmt::Debug for ExecutionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTree")
            .field("nodes", &self.nodes)
            .field("branches", &self.branches)
            .field("excluded", &self.excluded)
            .finish()
    }
}

/// Indented outline of every branch. Shared nodes are expanded once.
impl fmt::Display for ExecutionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printed = HashSet::new();
        for &branch in &self.branches {
            self.render(f, branch, 0, &mut printed)?;
        }
        Ok(())
    }
}

impl ExecutionTree {
    fn render(
        &self,
        f: &mut fmt::Formatter<'_>,
        index: NodeIndex,
        depth: usize,
        printed: &mut HashSet<NodeIndex>,
    ) -> fmt::Result {
        let node = self.node_at(index);
        let indent = depth * 2;
        if !printed.insert(index) {
            return writeln!(f, "{:indent$}{} (see above)", "", node.id());
        }

        let metadata = node.component().metadata();
        writeln!(f, "{:indent$}{} ({} {})", "", node.id(), metadata.name, metadata.version)?;
        for &dependent in node.dependents() {
            self.render(f, dependent, depth + 1, printed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentError};
    use crate::graph::ComponentSource;
    use crate::testing::{build, entries, source, Recorder};
    use crate::walk::NodeError;

    #[test]
    fn lookup_by_id_and_index() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("core", &journal), &[]),
            source(Recorder::new("ui", &journal), &["core"]),
        ]);

        let ui = tree.node_by_id(&"ui".into()).unwrap();
        assert_eq!(tree.node(ui.index()).unwrap().id().as_str(), "ui");
        assert!(tree.node_by_id(&"missing".into()).is_none());
        assert_eq!(tree.iter().count(), 2);
    }

    #[test]
    fn display_renders_outline() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("a", &journal), &[]),
            source(Recorder::new("b", &journal), &["a"]),
            source(Recorder::new("c", &journal), &["a"]),
            source(Recorder::new("d", &journal), &["b", "c"]),
        ]);

        let expected = "\
a (A 1.0.0)
  b (B 1.0.0)
    d (D 1.0.0)
  c (C 1.0.0)
    d (see above)
";
        assert_eq!(tree.to_string(), expected);
    }

    #[test]
    fn configure_services_runs_pre_order() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("metrics", &journal), &["core", "logging"]),
            source(Recorder::new("logging", &journal), &["core"]),
            source(Recorder::new("core", &journal), &[]),
        ]);

        let mut services = ServiceRegistry::new();
        tree.configure_services(&mut services).unwrap();
        assert_eq!(
            entries(&journal),
            vec!["configure:core", "configure:logging", "configure:metrics"]
        );
    }

    #[test]
    fn configure_services_reports_failure_and_fallout() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("core", &journal).failing("configure"), &[]),
            source(Recorder::new("logging", &journal), &["core"]),
            source(Recorder::new("metrics", &journal), &["logging"]),
        ]);

        let error = tree
            .configure_services(&mut ServiceRegistry::new())
            .unwrap_err();
        assert_eq!(error.phase(), Phase::ConfigureServices);
        assert_eq!(error.root_causes().count(), 1);
        assert_eq!(error.cascaded().count(), 2);
        // Dependents still run their own operation.
        assert_eq!(
            entries(&journal),
            vec!["configure:core", "configure:logging", "configure:metrics"]
        );
    }

    #[tokio::test]
    async fn initialize_reaches_every_node() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("a", &journal), &[]),
            source(Recorder::new("b", &journal), &["a"]),
            source(Recorder::new("c", &journal), &["a"]),
            source(Recorder::new("d", &journal), &["b", "c"]),
        ]);

        let context = ServiceRegistry::new().into_context();
        tree.initialize(&context, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            entries(&journal),
            vec!["initialize:a", "initialize:b", "initialize:d", "initialize:c"]
        );
    }

    #[tokio::test]
    async fn migrate_skips_components_without_migrator() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("core", &journal), &[]),
            source(Recorder::new("store", &journal).with_migration(), &["core"]),
        ]);

        let context = ServiceRegistry::new().into_context();
        tree.migrate(&context, &CancellationToken::new()).await.unwrap();
        assert_eq!(entries(&journal), vec!["migrate:store"]);
    }

    #[tokio::test]
    async fn cancelled_initialize_cascades() {
        let journal = Recorder::journal();
        let tree = build(vec![
            source(Recorder::new("core", &journal), &[]),
            source(Recorder::new("ui", &journal), &["core"]),
        ]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let context = ServiceRegistry::new().into_context();
        let error = tree.initialize(&context, &cancel).await.unwrap_err();

        let kinds: Vec<_> = error
            .failures()
            .iter()
            .map(|failure| match failure {
                NodeError::Cancelled { component, .. } => format!("cancelled:{component}"),
                NodeError::CascadedFailure { component, .. } => format!("cascaded:{component}"),
                NodeError::OperationFailed { component, .. } => format!("failed:{component}"),
            })
            .collect();
        assert_eq!(kinds, vec!["cancelled:core", "cascaded:ui", "cancelled:ui"]);
        assert_eq!(error.to_string(), "initialize failed for 2 component(s)");
        assert!(entries(&journal).is_empty());
    }

    #[test]
    fn failures_carry_declared_ids() {
        let journal = Recorder::journal();
        let failing = Recorder::new("shared", &journal).failing("configure");
        let tree = build(vec![
            ComponentSource::new("db", Vec::<ComponentId>::new(), move || {
                Some(Box::new(failing) as Box<dyn Component>)
            }),
            ComponentSource::new("api", ["db"], {
                let journal = journal.clone();
                move || Some(Box::new(Recorder::new("shared", &journal)) as Box<dyn Component>)
            }),
        ]);

        let error = tree
            .configure_services(&mut ServiceRegistry::new())
            .unwrap_err();
        let failed: Vec<_> = error.failures().iter().map(|f| f.component().as_str()).collect();
        assert_eq!(failed, vec!["db", "api"]);
        assert!(matches!(
            &error.failures()[1],
            NodeError::CascadedFailure { ancestor, .. } if ancestor.as_str() == "db"
        ));
        assert_eq!(error.succeeded(), &[ComponentId::from("api")]);
    }

    #[test]
    fn failure_cause_is_preserved() {
        let journal = Recorder::journal();
        let tree = build(vec![source(Recorder::new("db", &journal).failing("configure"), &[])]);

        let error = tree
            .configure_services(&mut ServiceRegistry::new())
            .unwrap_err();
        match &error.failures()[0] {
            NodeError::OperationFailed { cause, name, .. } => {
                assert_eq!(name, "DB");
                assert!(matches!(cause, ComponentError::Failed(message) if message == "configure refused"));
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }
}
