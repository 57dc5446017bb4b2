use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    entities::{bom_item, build, build_line, stock_item},
    errors::ServiceError,
};

/// Everything known about an allocation right before it is persisted.
#[derive(Debug)]
pub struct AllocationContext<'a> {
    pub build: &'a build::Model,
    pub line: &'a build_line::Model,
    pub bom_item: &'a bom_item::Model,
    pub stock_item: &'a stock_item::Model,
    pub quantity: Decimal,
    pub install_into: Option<&'a str>,
}

/// Extension points around the build lifecycle.
///
/// `pre_allocate` runs inside the allocation transaction after the built-in
/// checks passed; returning an error vetoes the allocation. The `post_*`
/// hooks run after commit and cannot undo the operation.
#[async_trait]
pub trait BuildLifecycleObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_allocate(&self, _ctx: &AllocationContext<'_>) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn post_complete(&self, _build: &build::Model, _outputs: &[stock_item::Model]) {}

    async fn post_cancel(&self, _build: &build::Model) {}
}

/// Ordered list of registered observers.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    observers: Vec<Arc<dyn BuildLifecycleObserver>>,
}

impl LifecycleHooks {
    pub fn new(observers: Vec<Arc<dyn BuildLifecycleObserver>>) -> Self {
        Self { observers }
    }

    pub fn register(&mut self, observer: Arc<dyn BuildLifecycleObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Stops at the first observer that rejects the allocation.
    pub async fn pre_allocate(&self, ctx: &AllocationContext<'_>) -> Result<(), ServiceError> {
        for observer in &self.observers {
            if let Err(e) = observer.pre_allocate(ctx).await {
                warn!(
                    observer = observer.name(),
                    build_id = ctx.build.id,
                    stock_item_id = ctx.stock_item.id,
                    error = %e,
                    "Allocation rejected by observer"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn post_complete(&self, build: &build::Model, outputs: &[stock_item::Model]) {
        for observer in &self.observers {
            debug!(observer = observer.name(), build_id = build.id, "post_complete");
            observer.post_complete(build, outputs).await;
        }
    }

    pub async fn post_cancel(&self, build: &build::Model) {
        for observer in &self.observers {
            debug!(observer = observer.name(), build_id = build.id, "post_cancel");
            observer.post_cancel(build).await;
        }
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|o| o.name()))
            .finish()
    }
}
