//! Tree Walker
//!
//! A walk visits every node reachable from the tree's branches, depth first,
//! running a pre-operation on the way down and an optional post-operation on
//! the way up.
//!
//! # Algorithm
//!
//! For every branch, in order, with one visited set shared by all branches:
//!
//! 1. A node that was already visited contributes nothing.
//! 2. Otherwise it is marked visited and its pre-operation runs. A panic is
//!    caught and reported as a failure of that node.
//! 3. The result is emitted. On failure, a cascaded failure is emitted for
//!    every transitive dependent of the node before any of them is visited.
//! 4. Every direct dependent is walked, whatever happened in step 3.
//! 5. If a post-operation was supplied and neither the node nor anything
//!    visited beneath it failed, the post-operation runs and its result is
//!    emitted.
//!
//! The walk never stops early, so the result list always describes every
//! reachable node.
//!
//! # Sync and async drivers
//!
//! The traversal state lives in a [`Cursor`] that hands out one [`Step`] at a
//! time and is told the result. The sync and async drivers are plain loops
//! around it, so operations run strictly one after another in both cases.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use super::outcome::{NodeError, NodeOutcome};
use crate::component::ComponentError;
use crate::graph::{ExecutionTree, NodeIndex, TreeNode};

/// Default error factory: marks `dependent` as failed because `ancestor` did.
pub fn cascaded_failure(dependent: &TreeNode, ancestor: &TreeNode) -> NodeError {
    NodeError::CascadedFailure {
        component: dependent.id().clone(),
        name: dependent.name().to_string(),
        ancestor: ancestor.id().clone(),
    }
}

type AsyncOperation<'a> = BoxFuture<'a, Result<(), ComponentError>>;

/// Drives one walk over a tree.
///
/// A walker is consumed by the walk it runs; create a new one per phase.
pub struct Walker<'a, E> {
    tree: &'a ExecutionTree,
    error_factory: E,
}

impl<'a, E> Walker<'a, E>
where
    E: Fn(&TreeNode, &TreeNode) -> NodeError,
{
    /// `error_factory(dependent, ancestor)` builds the failure reported for a
    /// dependent of a failed node.
    pub fn new(tree: &'a ExecutionTree, error_factory: E) -> Self {
        Self { tree, error_factory }
    }

    /// Walk with a pre-operation only.
    pub fn run<Pre>(self, pre: Pre) -> Vec<NodeOutcome>
    where
        Pre: FnMut(&TreeNode) -> Result<(), ComponentError>,
    {
        self.drive(pre, None::<fn(&TreeNode) -> Result<(), ComponentError>>)
    }

    /// Walk with both a pre- and a post-operation.
    pub fn run_with_post<Pre, Post>(self, pre: Pre, post: Post) -> Vec<NodeOutcome>
    where
        Pre: FnMut(&TreeNode) -> Result<(), ComponentError>,
        Post: FnMut(&TreeNode) -> Result<(), ComponentError>,
    {
        self.drive(pre, Some(post))
    }

    /// Walk with an asynchronous pre-operation.
    pub async fn run_async<Pre>(self, pre: Pre) -> Vec<NodeOutcome>
    where
        Pre: FnMut(&'a TreeNode) -> AsyncOperation<'a>,
    {
        self.drive_async(pre, None::<fn(&'a TreeNode) -> AsyncOperation<'a>>)
            .await
    }

    /// Walk with asynchronous pre- and post-operations.
    pub async fn run_async_with_post<Pre, Post>(self, pre: Pre, post: Post) -> Vec<NodeOutcome>
    where
        Pre: FnMut(&'a TreeNode) -> AsyncOperation<'a>,
        Post: FnMut(&'a TreeNode) -> AsyncOperation<'a>,
    {
        self.drive_async(pre, Some(post)).await
    }

    fn drive<Pre, Post>(self, mut pre: Pre, mut post: Option<Post>) -> Vec<NodeOutcome>
    where
        Pre: FnMut(&TreeNode) -> Result<(), ComponentError>,
        Post: FnMut(&TreeNode) -> Result<(), ComponentError>,
    {
        let tree = self.tree;
        let mut cursor = Cursor::new(tree, &self.error_factory, post.is_some());

        while let Some(step) = cursor.next_step() {
            let result = match step {
                Step::Pre(index) => invoke(tree.node_at(index), "pre", &mut pre),
                Step::Post(index) => match post.as_mut() {
                    Some(post) => invoke(tree.node_at(index), "post", post),
                    None => Ok(()),
                },
            };
            cursor.complete(step, result);
        }
        cursor.finish()
    }

    async fn drive_async<Pre, Post>(self, mut pre: Pre, mut post: Option<Post>) -> Vec<NodeOutcome>
    where
        Pre: FnMut(&'a TreeNode) -> AsyncOperation<'a>,
        Post: FnMut(&'a TreeNode) -> AsyncOperation<'a>,
    {
        let tree = self.tree;
        let mut cursor = Cursor::new(tree, &self.error_factory, post.is_some());

        while let Some(step) = cursor.next_step() {
            let result = match step {
                Step::Pre(index) => invoke_async(tree.node_at(index), "pre", &mut pre).await,
                Step::Post(index) => match post.as_mut() {
                    Some(post) => invoke_async(tree.node_at(index), "post", post).await,
                    None => Ok(()),
                },
            };
            cursor.complete(step, result);
        }
        cursor.finish()
    }
}

fn invoke<F>(node: &TreeNode, stage: &'static str, operation: &mut F) -> Result<(), NodeError>
where
    F: FnMut(&TreeNode) -> Result<(), ComponentError>,
{
    debug!(component = %node.id(), stage, "running operation");
    let result = panic::catch_unwind(AssertUnwindSafe(|| operation(node)))
        .unwrap_or_else(|payload| Err(panicked(payload)));
    into_node_result(node, stage, result)
}

async fn invoke_async<'a, F>(node: &'a TreeNode, stage: &'static str, operation: &mut F) -> Result<(), NodeError>
where
    F: FnMut(&'a TreeNode) -> AsyncOperation<'a>,
{
    debug!(component = %node.id(), stage, "running operation");
    let result = match panic::catch_unwind(AssertUnwindSafe(|| operation(node))) {
        Ok(pending) => AssertUnwindSafe(pending)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panicked(payload))),
        Err(payload) => Err(panicked(payload)),
    };
    into_node_result(node, stage, result)
}

fn into_node_result(
    node: &TreeNode,
    stage: &'static str,
    result: Result<(), ComponentError>,
) -> Result<(), NodeError> {
    result.map_err(|cause| {
        warn!(component = %node.id(), stage, error = %cause, "operation failed");
        NodeError::from_component(node.id().clone(), node.name().to_string(), cause)
    })
}

fn panicked(payload: Box<dyn Any + Send>) -> ComponentError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    ComponentError::Failed(format!("panicked: {message}"))
}

/// The next operation a driver has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Pre(NodeIndex),
    Post(NodeIndex),
}

/// A node whose dependents are being walked.
struct Frame {
    node: NodeIndex,
    next_dependent: usize,
    /// No failure so far in this node or anything visited beneath it.
    clean: bool,
}

/// Traversal state of one walk.
struct Cursor<'a, 'e, E> {
    tree: &'a ExecutionTree,
    error_factory: &'e E,
    branches: std::slice::Iter<'a, NodeIndex>,
    visited: Vec<bool>,
    stack: Vec<Frame>,
    with_post: bool,
    outcomes: Vec<NodeOutcome>,
}

impl<'a, 'e, E> Cursor<'a, 'e, E>
where
    E: Fn(&TreeNode, &TreeNode) -> NodeError,
{
    fn new(tree: &'a ExecutionTree, error_factory: &'e E, with_post: bool) -> Self {
        Self {
            tree,
            error_factory,
            branches: tree.branches().iter(),
            visited: vec![false; tree.len()],
            stack: Vec::new(),
            with_post,
            outcomes: Vec::new(),
        }
    }

    /// Returns `true` the first time a node is seen.
    fn visit(&mut self, index: NodeIndex) -> bool {
        !std::mem::replace(&mut self.visited[index.raw()], true)
    }

    fn next_step(&mut self) -> Option<Step> {
        let tree = self.tree;
        loop {
            let Some(frame) = self.stack.last_mut() else {
                let branch = *self.branches.next()?;
                if self.visit(branch) {
                    return Some(Step::Pre(branch));
                }
                continue;
            };

            let dependents = tree.node_at(frame.node).dependents();
            if let Some(&child) = dependents.get_index(frame.next_dependent) {
                frame.next_dependent += 1;
                if self.visit(child) {
                    return Some(Step::Pre(child));
                }
                continue;
            }

            // Every dependent is done; leave the node.
            let Frame { node, clean, .. } = self.stack.pop()?;
            if self.with_post && clean {
                return Some(Step::Post(node));
            }
            self.propagate(clean);
        }
    }

    fn complete(&mut self, step: Step, result: Result<(), NodeError>) {
        match step {
            Step::Pre(index) => {
                let clean = result.is_ok();
                self.emit(index, result);
                if !clean {
                    self.cascade(index);
                }
                self.stack.push(Frame {
                    node: index,
                    next_dependent: 0,
                    clean,
                });
            }
            Step::Post(index) => {
                let clean = result.is_ok();
                self.emit(index, result);
                self.propagate(clean);
            }
        }
    }

    fn emit(&mut self, index: NodeIndex, result: Result<(), NodeError>) {
        self.outcomes.push(NodeOutcome {
            node: index,
            component: self.tree.node_at(index).id().clone(),
            result,
        });
    }

    fn cascade(&mut self, failed: NodeIndex) {
        let tree = self.tree;
        let ancestor = tree.node_at(failed);
        for dependent in tree.transitive_dependents(failed) {
            let error = (self.error_factory)(dependent, ancestor);
            self.outcomes.push(NodeOutcome {
                node: dependent.index(),
                component: dependent.id().clone(),
                result: Err(error),
            });
        }
    }

    fn propagate(&mut self, clean: bool) {
        if let Some(parent) = self.stack.last_mut() {
            parent.clean &= clean;
        }
    }

    fn finish(self) -> Vec<NodeOutcome> {
        self.outcomes
    }
}
