//! Root resource registry
//!
//! Only roots are addressable from the outside; a hint that names a
//! resource below a root is a caller error.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::plugin::ResourcePlugin;
use crate::error::{CoreError, CoreErrorCode, CoreResult};
use crate::resolve::Hierarchy;

/// All root resources known to this agent.
#[derive(Debug, Default, Clone)]
pub struct ResourceRegistry {
    roots: BTreeMap<String, Arc<dyn ResourcePlugin>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plugin: Arc<dyn ResourcePlugin>) {
        self.roots.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, root: &str) -> Option<&Arc<dyn ResourcePlugin>> {
        self.roots.get(root)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Arc<dyn ResourcePlugin>> {
        self.roots.values()
    }

    /// Resolve a root resource by name.
    ///
    /// Naming a resource below some root fails with a direct-child error;
    /// a completely unknown name is a hierarchy error.
    pub fn resolve_root(&self, name: &str) -> CoreResult<&Arc<dyn ResourcePlugin>> {
        if let Some(plugin) = self.roots.get(name) {
            return Ok(plugin);
        }
        for plugin in self.roots.values() {
            if Hierarchy::parse(&plugin.hierarchy()).names_child(name) {
                return Err(CoreError::new(
                    CoreErrorCode::DirectChildAccess,
                    format!("[{}] names a child of root [{}]", name, plugin.name()),
                ));
            }
        }
        Err(CoreError::new(
            CoreErrorCode::HierarchyError,
            format!("unknown resource [{}]", name),
        ))
    }

    /// Plugin serving the given hierarchy string, addressed by its root.
    pub fn plugin_for_hierarchy(&self, resc_hier: &str) -> CoreResult<&Arc<dyn ResourcePlugin>> {
        let hierarchy = Hierarchy::parse(resc_hier);
        let root = hierarchy.root().ok_or_else(|| {
            CoreError::new(CoreErrorCode::HierarchyError, "empty resource hierarchy")
        })?;
        self.roots.get(root).ok_or_else(|| {
            CoreError::new(
                CoreErrorCode::HierarchyError,
                format!("no plugin for root [{}]", root),
            )
        })
    }
}
