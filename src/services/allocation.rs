use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, IntoActiveModel, QueryFilter,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_transaction, commit_transaction, for_update},
    entities::{bom_item, build_item, build_line, stock_item},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        builds::{ensure_pending, load_build},
        catalog::{get_part, resolve_compatibility},
        lifecycle::{AllocationContext, LifecycleHooks},
        requirements::lines_with_bom,
        stock::allocated_quantity,
    },
};

/// Reserve `quantity` of a stock item against a build line.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocateRequest {
    pub build_line_id: i64,
    pub stock_item_id: i64,
    pub quantity: Decimal,
    /// Serial of the planned output the unit is designated for.
    pub install_into: Option<String>,
}

impl AllocateRequest {
    pub fn new(build_line_id: i64, stock_item_id: i64, quantity: Decimal) -> Self {
        Self {
            build_line_id,
            stock_item_id,
            quantity,
            install_into: None,
        }
    }

    pub fn install_into(mut self, serial: impl Into<String>) -> Self {
        self.install_into = Some(serial.into());
        self
    }
}

/// Narrows which reservations `unallocate_all` releases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnallocateFilter {
    /// Only lines requiring this part.
    pub part_id: Option<i64>,
    /// Only reservations designated for this output serial.
    pub install_into: Option<String>,
}

/// The allocation ledger: creates and releases reservations of stock against
/// build lines.
#[derive(Clone)]
pub struct AllocationService {
    db: Arc<DatabaseConnection>,
    hooks: Arc<LifecycleHooks>,
    event_sender: Option<EventSender>,
}

impl AllocationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        hooks: Arc<LifecycleHooks>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            hooks,
            event_sender,
        }
    }

    /// Reserves stock against a build line.
    ///
    /// A second allocation of the same stock item to the same line and output
    /// grows the existing reservation instead of adding a row.
    #[instrument(skip(self))]
    pub async fn allocate(&self, request: AllocateRequest) -> Result<build_item::Model, ServiceError> {
        let txn = begin_transaction(&self.db, "allocate").await?;
        let (build_id, item) = match self.allocate_in(&txn, &request).await {
            Ok(result) => result,
            Err(e) => {
                counter!("build_engine.allocations.rejected", 1, "reason" => e.kind().as_ref().to_string());
                return Err(e);
            }
        };
        commit_transaction(txn, "allocate").await?;

        counter!("build_engine.allocations.created", 1);
        info!(
            build_id,
            build_item_id = item.id,
            stock_item_id = item.stock_item_id,
            quantity = %request.quantity,
            "Stock allocated"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::StockAllocated {
                    build_id,
                    build_item_id: item.id,
                    stock_item_id: item.stock_item_id,
                    quantity: request.quantity,
                })
                .await;
        }

        Ok(item)
    }

    /// Allocation body shared with auto-allocation. Returns the build id with
    /// the persisted reservation.
    pub(crate) async fn allocate_in(
        &self,
        txn: &DatabaseTransaction,
        request: &AllocateRequest,
    ) -> Result<(i64, build_item::Model), ServiceError> {
        let line = build_line::Entity::find_by_id(request.build_line_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Build line", request.build_line_id))?;
        let build = load_build(txn, line.build_id, true).await?;
        let bom = bom_item::Entity::find_by_id(line.bom_item_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("BOM item", line.bom_item_id))?;
        let stock = for_update(stock_item::Entity::find_by_id(request.stock_item_id), txn)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Stock item", request.stock_item_id))?;

        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "Allocation quantity must be positive, got: {}",
                request.quantity
            )));
        }

        if resolve_compatibility(txn, &bom, stock.part_id).await?.is_none() {
            return Err(ServiceError::PartMismatch {
                stock_item_id: stock.id,
                stock_part_id: stock.part_id,
                required_part_id: bom.sub_part_id,
            });
        }

        let stock_part = get_part(txn, stock.part_id).await?;
        if stock_part.trackable && request.quantity != Decimal::ONE {
            return Err(ServiceError::SerializationViolation(format!(
                "Stock item {} is serialized; allocation quantity must be 1, got: {}",
                stock.id, request.quantity
            )));
        }
        if request.install_into.is_some() {
            let build_part = get_part(txn, build.part_id).await?;
            if !build_part.trackable || !stock_part.trackable {
                return Err(ServiceError::SerializationViolation(
                    "install_into requires a trackable build part and trackable stock"
                        .to_string(),
                ));
            }
        }

        let reserved = allocated_quantity(txn, stock.id).await?;
        let available = if stock.is_in_stock() {
            (stock.quantity - reserved).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        if request.quantity > available {
            return Err(ServiceError::InsufficientStock {
                stock_item_id: stock.id,
                requested: request.quantity,
                available,
            });
        }

        ensure_pending(&build)?;

        self.hooks
            .pre_allocate(&AllocationContext {
                build: &build,
                line: &line,
                bom_item: &bom,
                stock_item: &stock,
                quantity: request.quantity,
                install_into: request.install_into.as_deref(),
            })
            .await?;

        let mut existing = build_item::Entity::find()
            .filter(build_item::Column::BuildLineId.eq(line.id))
            .filter(build_item::Column::StockItemId.eq(stock.id));
        existing = match &request.install_into {
            Some(serial) => existing.filter(build_item::Column::InstallInto.eq(serial.as_str())),
            None => existing.filter(build_item::Column::InstallInto.is_null()),
        };
        let existing = existing.one(txn).await.map_err(ServiceError::db_error)?;

        let item = match existing {
            Some(current) => {
                let quantity = current.quantity + request.quantity;
                let mut active = current.into_active_model();
                active.quantity = Set(quantity);
                active.update(txn).await.map_err(ServiceError::db_error)?
            }
            None => build_item::ActiveModel {
                build_line_id: Set(line.id),
                stock_item_id: Set(stock.id),
                quantity: Set(request.quantity),
                install_into: Set(request.install_into.clone()),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?,
        };

        // Concurrent allocations may have raced past the availability check.
        let total = allocated_quantity(txn, stock.id).await?;
        if total > stock.quantity {
            return Err(ServiceError::InsufficientStock {
                stock_item_id: stock.id,
                requested: request.quantity,
                available: (stock.quantity - (total - request.quantity)).max(Decimal::ZERO),
            });
        }

        if line.quantity < allocated_on_line(txn, line.id).await? {
            warn!(build_line_id = line.id, "Build line is over-allocated");
        }

        Ok((build.id, item))
    }

    /// Releases reservations of a pending build. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn unallocate_all(
        &self,
        build_id: i64,
        filter: UnallocateFilter,
    ) -> Result<u64, ServiceError> {
        let txn = begin_transaction(&self.db, "unallocate_all").await?;
        let build = load_build(&txn, build_id, true).await?;
        ensure_pending(&build)?;
        let removed = unallocate_in(&txn, build.id, &filter).await?;
        commit_transaction(txn, "unallocate_all").await?;

        counter!("build_engine.allocations.removed", removed);
        info!(build_id, removed, "Allocations removed");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::AllocationsRemoved {
                    build_id,
                    count: removed,
                })
                .await;
        }

        Ok(removed)
    }

    /// Releases a single reservation.
    #[instrument(skip(self))]
    pub async fn remove_allocation(&self, build_item_id: i64) -> Result<(), ServiceError> {
        let txn = begin_transaction(&self.db, "remove_allocation").await?;
        let item = build_item::Entity::find_by_id(build_item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Build item", build_item_id))?;
        let line = build_line::Entity::find_by_id(item.build_line_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Build line", item.build_line_id))?;
        let build = load_build(&txn, line.build_id, true).await?;
        ensure_pending(&build)?;

        build_item::Entity::delete_by_id(item.id)
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        commit_transaction(txn, "remove_allocation").await?;

        counter!("build_engine.allocations.removed", 1);
        info!(build_id = build.id, build_item_id, "Allocation removed");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::AllocationsRemoved {
                    build_id: build.id,
                    count: 1,
                })
                .await;
        }

        Ok(())
    }
}

async fn allocated_on_line<C: ConnectionTrait>(conn: &C, build_line_id: i64) -> Result<Decimal, ServiceError> {
    let items = build_item::Entity::find()
        .filter(build_item::Column::BuildLineId.eq(build_line_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(items.iter().map(|i| i.quantity).sum())
}

/// Deletes the build's reservations matching `filter`. Caller checks status.
pub(crate) async fn unallocate_in<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
    filter: &UnallocateFilter,
) -> Result<u64, ServiceError> {
    let line_ids: Vec<i64> = lines_with_bom(conn, build_id)
        .await?
        .into_iter()
        .filter(|(_, bom)| filter.part_id.map_or(true, |part_id| bom.sub_part_id == part_id))
        .map(|(line, _)| line.id)
        .collect();

    if line_ids.is_empty() {
        return Ok(0);
    }

    let mut delete = build_item::Entity::delete_many()
        .filter(build_item::Column::BuildLineId.is_in(line_ids));
    if let Some(serial) = &filter.install_into {
        delete = delete.filter(build_item::Column::InstallInto.eq(serial.as_str()));
    }

    let result = delete.exec(conn).await.map_err(ServiceError::db_error)?;
    Ok(result.rows_affected)
}
