//! Shared fixtures for unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::component::{
    Component, ComponentError, ComponentMetadata, ExecutionContext, Migrator, ServiceRegistry,
};
use crate::graph::{ComponentSource, ExecutionTree, GraphBuilder};

pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

/// Component that writes `"<stage>:<id>"` into a journal for every call.
pub(crate) struct Recorder {
    metadata: ComponentMetadata,
    journal: Journal,
    failing: HashSet<&'static str>,
    panicking: HashSet<&'static str>,
    migrates: bool,
}

impl Recorder {
    pub(crate) fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub(crate) fn new(id: &str, journal: &Journal) -> Self {
        Self {
            metadata: ComponentMetadata::new(id, id.to_uppercase(), "1.0.0"),
            journal: journal.clone(),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            migrates: false,
        }
    }

    pub(crate) fn failing(mut self, stage: &'static str) -> Self {
        self.failing.insert(stage);
        self
    }

    pub(crate) fn panicking(mut self, stage: &'static str) -> Self {
        self.panicking.insert(stage);
        self
    }

    pub(crate) fn with_migration(mut self) -> Self {
        self.migrates = true;
        self
    }

    pub(crate) fn record(&self, stage: &'static str) -> Result<(), ComponentError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{stage}:{}", self.metadata.id));
        if self.panicking.contains(stage) {
            panic!("{} blew up in {stage}", self.metadata.id);
        }
        if self.failing.contains(stage) {
            return Err(ComponentError::failed(format!("{stage} refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl Component for Recorder {
    fn metadata(&self) -> &ComponentMetadata {
        &self.metadata
    }

    fn configure_services(&self, _: &mut ServiceRegistry) -> Result<(), ComponentError> {
        self.record("configure")
    }

    async fn initialize(
        &self,
        _: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), ComponentError> {
        if cancel.is_cancelled() {
            return Err(ComponentError::Cancelled);
        }
        self.record("initialize")
    }

    fn migrator(&self) -> Option<&dyn Migrator> {
        if self.migrates {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl Migrator for Recorder {
    async fn migrate(
        &self,
        _: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<(), ComponentError> {
        if cancel.is_cancelled() {
            return Err(ComponentError::Cancelled);
        }
        self.record("migrate")
    }
}

pub(crate) fn source(recorder: Recorder, depends_on: &[&str]) -> ComponentSource {
    ComponentSource::from_component(recorder, depends_on.iter().copied())
}

pub(crate) fn build(sources: Vec<ComponentSource>) -> ExecutionTree {
    let mut builder = GraphBuilder::new();
    builder.extend(sources).unwrap();
    builder.build().unwrap()
}

pub(crate) fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}
