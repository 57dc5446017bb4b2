use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    db::{begin_transaction, commit_transaction},
    entities::stock_item,
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        allocation::{AllocateRequest, AllocationService},
        builds::{ensure_pending, load_build},
        catalog::compatible_part_ids,
        requirements::line_allocations,
        stock::{allocated_quantity, location_subtree_ids},
    },
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoAllocateOptions {
    /// Only take stock from this location tree. Defaults to the build's
    /// `take_from` location.
    pub location_id: Option<i64>,
    /// Never take stock from this location tree.
    pub exclude_location_id: Option<i64>,
    /// Also fill optional BOM lines.
    #[serde(default)]
    pub optional_items: bool,
}

/// One reservation auto-allocation would make.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationProposal {
    pub build_line_id: i64,
    pub stock_item_id: i64,
    pub part_id: i64,
    pub quantity: Decimal,
}

impl From<&AllocationProposal> for AllocateRequest {
    fn from(p: &AllocationProposal) -> Self {
        AllocateRequest::new(p.build_line_id, p.stock_item_id, p.quantity)
    }
}

/// Fills unambiguous build lines automatically.
///
/// A line is filled only when exactly one in-scope stock item can serve it
/// and that item alone covers the whole remaining requirement. Anything
/// else is left for manual allocation.
#[derive(Clone)]
pub struct AutoAllocationService {
    db: Arc<DatabaseConnection>,
    allocation: Arc<AllocationService>,
    event_sender: Option<EventSender>,
}

impl AutoAllocationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        allocation: Arc<AllocationService>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            allocation,
            event_sender,
        }
    }

    /// Computes proposals without writing anything.
    #[instrument(skip(self))]
    pub async fn propose_auto_allocations(
        &self,
        build_id: i64,
        options: AutoAllocateOptions,
    ) -> Result<Vec<AllocationProposal>, ServiceError> {
        propose_in(&*self.db, build_id, &options).await
    }

    /// Computes and applies proposals in one transaction. Either every
    /// proposal is persisted or none is.
    #[instrument(skip(self))]
    pub async fn commit_auto_allocations(
        &self,
        build_id: i64,
        options: AutoAllocateOptions,
    ) -> Result<Vec<AllocationProposal>, ServiceError> {
        let txn = begin_transaction(&self.db, "commit_auto_allocations").await?;
        let build = load_build(&txn, build_id, true).await?;
        ensure_pending(&build)?;

        let proposals = propose_in(&txn, build.id, &options).await?;
        let mut allocated = Vec::with_capacity(proposals.len());
        for proposal in &proposals {
            let (_, item) = self
                .allocation
                .allocate_in(&txn, &AllocateRequest::from(proposal))
                .await?;
            allocated.push(item);
        }

        commit_transaction(txn, "commit_auto_allocations").await?;

        counter!("build_engine.allocations.auto", proposals.len() as u64);
        info!(build_id, allocated = proposals.len(), "Auto-allocation applied");

        if let Some(sender) = &self.event_sender {
            for item in allocated {
                sender
                    .send_or_log(Event::StockAllocated {
                        build_id,
                        build_item_id: item.id,
                        stock_item_id: item.stock_item_id,
                        quantity: item.quantity,
                    })
                    .await;
            }
        }

        Ok(proposals)
    }
}

async fn propose_in<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
    options: &AutoAllocateOptions,
) -> Result<Vec<AllocationProposal>, ServiceError> {
    let build = load_build(conn, build_id, false).await?;
    ensure_pending(&build)?;

    let include = match options.location_id.or(build.take_from_id) {
        Some(root) => Some(location_subtree_ids(conn, root).await?),
        None => None,
    };
    let exclude = match options.exclude_location_id {
        Some(root) => location_subtree_ids(conn, root).await?,
        None => HashSet::new(),
    };

    // Quantities already proposed in this pass, per stock item.
    let mut proposed: HashMap<i64, Decimal> = HashMap::new();
    let mut proposals = Vec::new();

    for line in line_allocations(conn, build.id).await? {
        if line.bom_item.consumable || (line.bom_item.optional && !options.optional_items) {
            continue;
        }
        let remaining = line.remaining();
        if remaining <= Decimal::ZERO {
            continue;
        }

        let part_ids = compatible_part_ids(conn, &line.bom_item).await?;
        let candidates = stock_item::Entity::find()
            .filter(stock_item::Column::PartId.is_in(part_ids))
            .filter(stock_item::Column::Quantity.gt(Decimal::ZERO))
            .filter(stock_item::Column::BuildOrderId.is_null())
            .filter(stock_item::Column::BelongsToId.is_null())
            .order_by_asc(stock_item::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut viable = Vec::new();
        for item in candidates {
            let in_scope = match (&include, item.location_id) {
                (Some(include), Some(location)) => include.contains(&location),
                (Some(_), None) => false,
                (None, _) => true,
            };
            let excluded = item.location_id.map_or(false, |l| exclude.contains(&l));
            if !in_scope || excluded {
                continue;
            }
            // Serialized units can only fill a line needing exactly one.
            if item.serial.is_some() && remaining != Decimal::ONE {
                continue;
            }

            let available = item.quantity
                - allocated_quantity(conn, item.id).await?
                - proposed.get(&item.id).copied().unwrap_or_default();
            if available > Decimal::ZERO {
                viable.push((item, available));
            }
        }

        match viable.as_slice() {
            [(item, available)] if *available >= remaining => {
                *proposed.entry(item.id).or_default() += remaining;
                proposals.push(AllocationProposal {
                    build_line_id: line.line.id,
                    stock_item_id: item.id,
                    part_id: item.part_id,
                    quantity: remaining,
                });
            }
            [] => debug!(build_line_id = line.line.id, "No stock available for line"),
            [_] => debug!(build_line_id = line.line.id, "Single candidate does not cover line"),
            _ => debug!(
                build_line_id = line.line.id,
                candidates = viable.len(),
                "Ambiguous stock for line"
            ),
        }
    }

    Ok(proposals)
}
