//! The agent session
//!
//! All state that used to be process-global lives here: the descriptor
//! table and replica state table are owned per session; the access
//! table, advisory locks and catalog pool are shared handles threaded in
//! at construction. One session serves one client connection and is
//! single-threaded on its hot path.

use std::sync::Arc;

use crate::catalog::CatalogPool;
use crate::config::CoreConfig;
use crate::descriptor::{DescriptorTable, ReplicaAccessTable};
use crate::locking::{AdvisoryLockTable, ReplicaStateTable};
use crate::observability::Logger;
use crate::resource::ResourceRegistry;
use crate::rules::{NoopHooks, RuleHooks};
use crate::zone::ZoneGateway;

/// State shared by every session of one server process.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub config: Arc<CoreConfig>,
    pub catalog: CatalogPool,
    pub resources: ResourceRegistry,
    pub hooks: Arc<dyn RuleHooks>,
    pub gateway: Option<Arc<dyn ZoneGateway>>,
    pub access: Arc<ReplicaAccessTable>,
    pub advisory: Arc<AdvisoryLockTable>,
}

impl SessionContext {
    pub fn new(config: CoreConfig, catalog: CatalogPool, resources: ResourceRegistry) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            resources,
            hooks: Arc::new(NoopHooks),
            gateway: None,
            access: Arc::new(ReplicaAccessTable::new()),
            advisory: Arc::new(AdvisoryLockTable::new()),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RuleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn ZoneGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

/// One agent's view of the core.
#[derive(Debug)]
pub struct Session {
    pub(crate) context: SessionContext,
    pid: u32,
    user_name: String,
    pub(crate) descriptors: DescriptorTable,
    pub(crate) state: ReplicaStateTable,
}

impl Session {
    pub fn new(context: SessionContext, pid: u32) -> Self {
        let descriptors = DescriptorTable::new(context.config.descriptor_table_size);
        Self {
            context,
            pid,
            user_name: "anonymous".to_string(),
            descriptors,
            state: ReplicaStateTable::new(),
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn config(&self) -> &CoreConfig {
        &self.context.config
    }

    pub fn catalog(&self) -> &CatalogPool {
        &self.context.catalog
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.context.resources
    }

    pub fn hooks(&self) -> &dyn RuleHooks {
        self.context.hooks.as_ref()
    }

    pub fn gateway(&self) -> Option<&Arc<dyn ZoneGateway>> {
        self.context.gateway.as_ref()
    }

    pub fn access(&self) -> &ReplicaAccessTable {
        &self.context.access
    }

    pub fn advisory(&self) -> &AdvisoryLockTable {
        &self.context.advisory
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub fn state_table(&self) -> &ReplicaStateTable {
        &self.state
    }

    /// Agent teardown. Drops every access-table entry minted by this
    /// pid and clears the staging tables. Catalog rows are deliberately
    /// untouched: an orphaned intermediate replica is the sweeper's to
    /// recover.
    pub fn teardown(&mut self) {
        let dropped = self.context.access.erase_all_for_pid(self.pid);
        if !dropped.is_empty() {
            Logger::warn(
                "session_teardown_dropped_tokens",
                &[("count", &dropped.len().to_string())],
            );
        }
        self.state.clear();
        self.descriptors = DescriptorTable::new(self.context.config.descriptor_table_size);
    }
}
