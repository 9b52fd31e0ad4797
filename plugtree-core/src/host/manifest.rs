//! Component manifests
//!
//! A manifest is what a discovery layer knows about a component before it is
//! instantiated: its identity and the ids it depends on. The
//! [`ComponentCatalog`] pairs manifests with the factories that build the
//! actual descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::component::{Component, ComponentId, ComponentMetadata};
use crate::graph::ComponentSource;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("invalid component manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Declared identity and dependencies of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub id: ComponentId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub depends_on: Vec<ComponentId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(ComponentManifest),
    Many(Vec<ComponentManifest>),
}

impl ComponentManifest {
    pub fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata::new(self.id.clone(), self.name.clone(), self.version.clone())
    }

    /// Parse a single manifest object or an array of them.
    pub fn from_json(text: &str) -> Result<Vec<Self>, ManifestError> {
        Ok(match serde_json::from_str(text)? {
            OneOrMany::One(manifest) => vec![manifest],
            OneOrMany::Many(manifests) => manifests,
        })
    }
}

type Factory = Arc<dyn Fn(&ComponentManifest) -> Option<Box<dyn Component>> + Send + Sync>;

/// Factories able to build component descriptors, keyed by component id.
#[derive(Default, Clone)]
pub struct ComponentCatalog {
    factories: HashMap<ComponentId, Factory>,
}

impl ComponentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `id`, replacing any earlier one.
    pub fn register<F>(&mut self, id: impl Into<ComponentId>, factory: F) -> &mut Self
    where
        F: Fn(&ComponentManifest) -> Option<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.factories.contains_key(id)
    }

    /// Pair each manifest with its factory.
    ///
    /// A manifest without a factory still becomes a source; it is excluded
    /// when the tree is built, together with its dependents.
    pub fn sources(&self, manifests: Vec<ComponentManifest>) -> Vec<ComponentSource> {
        manifests
            .into_iter()
            .map(|manifest| {
                let factory = self.factories.get(&manifest.id).cloned();
                if factory.is_none() {
                    debug!(component = %manifest.id, "no factory registered");
                }
                let id = manifest.id.clone();
                let depends_on = manifest.depends_on.clone();
                ComponentSource::new(id, depends_on, move || {
                    factory.and_then(|factory| factory(&manifest))
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ComponentCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("ComponentCatalog").field("factories", &ids).finish()
    }
}
