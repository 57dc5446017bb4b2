// Catalog and stock ledger
pub mod catalog;
pub mod stock;

// Build orders
pub mod builds;
pub mod requirements;

// Allocation ledger
pub mod allocation;
pub mod auto_allocation;

// Build lifecycle
pub mod cancellation;
pub mod completion;
pub mod lifecycle;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{config::EngineConfig, events::EventSender};

use self::{
    allocation::AllocationService, auto_allocation::AutoAllocationService,
    builds::BuildService, cancellation::CancellationService, catalog::CatalogService,
    completion::CompletionService, lifecycle::LifecycleHooks, stock::StockService,
};

/// All engine services wired against one database, configuration, observer
/// list and event sender.
#[derive(Clone)]
pub struct BuildEngine {
    pub catalog: Arc<CatalogService>,
    pub stock: Arc<StockService>,
    pub builds: Arc<BuildService>,
    pub allocation: Arc<AllocationService>,
    pub auto_allocation: Arc<AutoAllocationService>,
    pub completion: Arc<CompletionService>,
    pub cancellation: Arc<CancellationService>,
    db: Arc<DatabaseConnection>,
}

impl BuildEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: EngineConfig,
        hooks: LifecycleHooks,
        event_sender: Option<EventSender>,
    ) -> Self {
        let hooks = Arc::new(hooks);
        let allocation = Arc::new(AllocationService::new(
            db.clone(),
            hooks.clone(),
            event_sender.clone(),
        ));

        Self {
            catalog: Arc::new(CatalogService::new(db.clone())),
            stock: Arc::new(StockService::new(db.clone())),
            builds: Arc::new(BuildService::new(db.clone(), event_sender.clone())),
            auto_allocation: Arc::new(AutoAllocationService::new(
                db.clone(),
                allocation.clone(),
                event_sender.clone(),
            )),
            allocation,
            completion: Arc::new(CompletionService::new(
                db.clone(),
                config,
                hooks.clone(),
                event_sender.clone(),
            )),
            cancellation: Arc::new(CancellationService::new(db.clone(), hooks, event_sender)),
            db,
        }
    }

    /// Engine with default policy, no observers and no event channel.
    pub fn with_defaults(db: Arc<DatabaseConnection>) -> Self {
        Self::new(db, EngineConfig::default(), LifecycleHooks::default(), None)
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }
}
