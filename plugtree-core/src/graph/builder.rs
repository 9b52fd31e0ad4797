//! Graph Builder
//!
//! The builder turns a flat set of components, each with the ids it declares
//! as dependencies, into an [`ExecutionTree`] linked only by direct edges.
//!
//! # Algorithm
//!
//! 1. Drop declared references to ids that are not part of the set.
//! 2. Order the components topologically with Kahn's algorithm, so that
//!    dependencies come before dependents. If some components can never be
//!    released the relation has a cycle and construction fails.
//! 3. Compute, in that order, the transitive dependency closure of every
//!    component.
//! 4. Walk the order again and construct each component. A component with no
//!    known dependency becomes a branch. For every dependency `dep` of
//!    `current`, the edge `dep -> current` is kept only if no other dependency
//!    of `current` already reaches `dep` through the closure. This keeps the
//!    transitive reduction of the relation.
//!
//! Components whose descriptor cannot be constructed, and everything that
//! depends on them, are left out of the tree and recorded as exclusions.
//! Nothing here invokes a lifecycle operation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;
use tracing::{debug, warn};

use super::node::{NodeIndex, TreeNode};
use super::tree::ExecutionTree;
use crate::component::{Component, ComponentId};

type Constructor = Box<dyn FnOnce() -> Option<Box<dyn Component>> + Send>;

/// Errors that prevent a tree from being built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cyclic dependency among components: {}", join_ids(.remaining))]
    CyclicDependency { remaining: Vec<ComponentId> },

    #[error("component '{0}' declared more than once")]
    DuplicateComponent(ComponentId),
}

fn join_ids(ids: &[ComponentId]) -> String {
    ids.iter().map(ComponentId::as_str).collect::<Vec<_>>().join(", ")
}

/// One component as handed over by discovery.
pub struct ComponentSource {
    id: ComponentId,
    depends_on: IndexSet<ComponentId>,
    construct: Constructor,
}

impl ComponentSource {
    /// Describe a component whose descriptor is created lazily.
    ///
    /// A constructor returning `None` excludes the component from the tree.
    pub fn new<I, D, F>(id: impl Into<ComponentId>, depends_on: I, construct: F) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<ComponentId>,
        F: FnOnce() -> Option<Box<dyn Component>> + Send + 'static,
    {
        Self {
            id: id.into(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
            construct: Box::new(construct),
        }
    }

    /// Describe an already constructed component.
    pub fn from_component<C, I, D>(component: C, depends_on: I) -> Self
    where
        C: Component + 'static,
        I: IntoIterator<Item = D>,
        D: Into<ComponentId>,
    {
        let id = component.id().clone();
        Self::new(id, depends_on, move || Some(Box::new(component) as Box<dyn Component>))
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn depends_on(&self) -> &IndexSet<ComponentId> {
        &self.depends_on
    }
}

impl fmt::Debug for ComponentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSource")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Why a known component is missing from the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Switched off before construction.
    Disabled,
    /// The constructor did not produce a descriptor.
    ConstructionFailed,
    /// A dependency was itself excluded.
    DependencyExcluded(ComponentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub id: ComponentId,
    pub reason: ExclusionReason,
}

/// Collects component sources and builds an [`ExecutionTree`] from them.
#[derive(Default)]
pub struct GraphBuilder {
    sources: IndexMap<ComponentId, ComponentSource>,
    disabled: HashSet<ComponentId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component. Ids must be unique.
    pub fn add(&mut self, source: ComponentSource) -> Result<&mut Self, GraphError> {
        if self.sources.contains_key(&source.id) {
            return Err(GraphError::DuplicateComponent(source.id));
        }
        self.sources.insert(source.id.clone(), source);
        Ok(self)
    }

    /// Add several components, stopping at the first duplicate.
    pub fn extend<I>(&mut self, sources: I) -> Result<&mut Self, GraphError>
    where
        I: IntoIterator<Item = ComponentSource>,
    {
        for source in sources {
            self.add(source)?;
        }
        Ok(self)
    }

    /// Exclude a component as if its constructor had returned `None`.
    pub fn disable(&mut self, id: impl Into<ComponentId>) -> &mut Self {
        self.disabled.insert(id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Build the tree.
    pub fn build(self) -> Result<ExecutionTree, GraphError> {
        let GraphBuilder { sources, disabled } = self;
        let ids: Vec<ComponentId> = sources.keys().cloned().collect();
        let mut constructors: Vec<Option<ComponentSource>> =
            sources.into_values().map(Some).collect();

        let dependencies = resolve_dependencies(&ids, &constructors);
        let order = topological_order(&ids, &dependencies)?;
        let closure = dependency_closure(&order, &dependencies);

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(ids.len());
        let mut branches = Vec::new();
        let mut placed: Vec<Option<NodeIndex>> = vec![None; ids.len()];
        let mut excluded = Vec::new();

        for &current in &order {
            let id = &ids[current];
            let deps = &dependencies[current];

            let reason = if disabled.contains(id) {
                Some(ExclusionReason::Disabled)
            } else if let Some(&missing) = deps.iter().find(|&&dep| placed[dep].is_none()) {
                Some(ExclusionReason::DependencyExcluded(ids[missing].clone()))
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!(component = %id, ?reason, "excluding component");
                excluded.push(Exclusion { id: id.clone(), reason });
                continue;
            }

            let component = constructors[current]
                .take()
                .and_then(|source| (source.construct)());
            let Some(component) = component else {
                warn!(component = %id, "component could not be constructed, excluding");
                excluded.push(Exclusion {
                    id: id.clone(),
                    reason: ExclusionReason::ConstructionFailed,
                });
                continue;
            };
            if component.id() != id {
                warn!(
                    component = %id,
                    descriptor = %component.id(),
                    "descriptor id differs from declared id"
                );
            }

            let index = NodeIndex::new(nodes.len());
            nodes.push(TreeNode::new(index, id.clone(), component));
            placed[current] = Some(index);

            if deps.is_empty() {
                branches.push(index);
                continue;
            }

            for &dep in deps {
                let reached_through_other = deps
                    .iter()
                    .any(|&other| other != dep && closure[other].contains(&dep));
                if reached_through_other {
                    debug!(component = %id, dependency = %ids[dep], "eliding indirect edge");
                    continue;
                }
                if let Some(parent) = placed[dep] {
                    nodes[parent.raw()].add_dependent(index);
                }
            }
        }

        let tree = ExecutionTree::from_parts(nodes, branches, excluded);
        debug!(nodes = tree.len(), "built execution tree\n{tree}");
        Ok(tree)
    }
}

/// Map declared references to positions, dropping unknown ids.
fn resolve_dependencies(ids: &[ComponentId], sources: &[Option<ComponentSource>]) -> Vec<Vec<usize>> {
    let position: HashMap<&ComponentId, usize> =
        ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

    sources
        .iter()
        .zip(ids)
        .map(|(source, id)| {
            let Some(source) = source else {
                return Vec::new();
            };
            source
                .depends_on
                .iter()
                .filter_map(|dep| match position.get(dep) {
                    Some(&index) => Some(index),
                    None => {
                        debug!(component = %id, dependency = %dep, "ignoring unknown dependency");
                        None
                    }
                })
                .collect()
        })
        .collect()
}

/// Kahn's algorithm over component positions.
///
/// Ties are broken by insertion order, so the result is deterministic.
fn topological_order(ids: &[ComponentId], dependencies: &[Vec<usize>]) -> Result<Vec<usize>, GraphError> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    for (current, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(current);
        }
    }

    let mut queue: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() < ids.len() {
        let remaining = (0..ids.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| ids[i].clone())
            .collect();
        return Err(GraphError::CyclicDependency { remaining });
    }
    Ok(order)
}

/// Everything each component depends on, directly or transitively.
fn dependency_closure(order: &[usize], dependencies: &[Vec<usize>]) -> Vec<HashSet<usize>> {
    let mut closure: Vec<HashSet<usize>> = vec![HashSet::new(); dependencies.len()];
    for &current in order {
        let mut reach = HashSet::new();
        for &dep in &dependencies[current] {
            reach.insert(dep);
            reach.extend(closure[dep].iter().copied());
        }
        closure[current] = reach;
    }
    closure
}
