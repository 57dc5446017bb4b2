use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    entities::{build_item, stock_item, stock_item_tracking, stock_location, TrackingType},
    errors::ServiceError,
    services::catalog::get_part,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewStockItem {
    pub part_id: i64,
    pub quantity: Decimal,
    pub location_id: Option<i64>,
    pub serial: Option<String>,
    pub batch: Option<String>,
}

impl NewStockItem {
    pub fn new(part_id: i64, quantity: Decimal) -> Self {
        Self {
            part_id,
            quantity,
            location_id: None,
            serial: None,
            batch: None,
        }
    }

    pub fn at(mut self, location_id: i64) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn batch(mut self, batch: impl Into<String>) -> Self {
        self.batch = Some(batch.into());
        self
    }
}

/// One history entry to append to a stock item.
#[derive(Debug, Clone)]
pub(crate) struct TrackingEntry<'a> {
    pub stock_item_id: i64,
    pub tracking_type: TrackingType,
    pub quantity: Decimal,
    pub build_id: Option<i64>,
    pub related_item_id: Option<i64>,
    pub user: &'a str,
}

/// Stock locations, stock receipt and stock history
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_location(
        &self,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<stock_location::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Location name cannot be empty".to_string(),
            ));
        }

        let db = &*self.db;
        if let Some(parent_id) = parent_id {
            get_location(db, parent_id).await?;
        }

        let location = stock_location::ActiveModel {
            name: Set(name.trim().to_string()),
            parent_id: Set(parent_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(location_id = location.id, "Stock location created");
        Ok(location)
    }

    /// Books new stock into the ledger.
    ///
    /// Stock of a trackable part is received one serialized unit at a time.
    #[instrument(skip(self))]
    pub async fn receive_stock(
        &self,
        input: NewStockItem,
    ) -> Result<stock_item::Model, ServiceError> {
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "Stock quantity must be positive, got: {}",
                input.quantity
            )));
        }

        let db = &*self.db;
        let part = get_part(db, input.part_id).await?;
        if let Some(location_id) = input.location_id {
            get_location(db, location_id).await?;
        }

        let serial = input
            .serial
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if part.trackable {
            let serial = serial.as_deref().ok_or_else(|| {
                ServiceError::SerializationViolation(format!(
                    "Part {} is trackable; stock requires a serial number",
                    part.id
                ))
            })?;
            if input.quantity != Decimal::ONE {
                return Err(ServiceError::SerializationViolation(format!(
                    "Serialized stock must have quantity 1, got: {}",
                    input.quantity
                )));
            }
            if serial_exists(db, part.id, serial).await? {
                return Err(ServiceError::DuplicateSerial {
                    part_id: part.id,
                    serial: serial.to_string(),
                });
            }
        } else if serial.is_some() {
            return Err(ServiceError::SerializationViolation(format!(
                "Part {} is not trackable; stock cannot carry a serial number",
                part.id
            )));
        }

        let item = stock_item::ActiveModel {
            part_id: Set(part.id),
            location_id: Set(input.location_id),
            quantity: Set(input.quantity),
            serial: Set(serial),
            batch: Set(input.batch),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("build_engine.stock.received", 1);
        info!(stock_item_id = item.id, part_id = part.id, quantity = %item.quantity, "Stock received");
        Ok(item)
    }

    pub async fn get_stock_item(&self, stock_item_id: i64) -> Result<stock_item::Model, ServiceError> {
        get_stock_item(&*self.db, stock_item_id).await
    }

    /// Quantity of a stock item not yet reserved by any build.
    pub async fn available_quantity(&self, stock_item_id: i64) -> Result<Decimal, ServiceError> {
        let db = &*self.db;
        let item = get_stock_item(db, stock_item_id).await?;
        available_quantity(db, &item).await
    }

    /// Tracking entries of a stock item, oldest first.
    pub async fn stock_history(
        &self,
        stock_item_id: i64,
    ) -> Result<Vec<stock_item_tracking::Model>, ServiceError> {
        stock_item_tracking::Entity::find()
            .filter(stock_item_tracking::Column::StockItemId.eq(stock_item_id))
            .order_by_asc(stock_item_tracking::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Stock items consumed by a build.
    pub async fn consumed_by(&self, build_id: i64) -> Result<Vec<stock_item::Model>, ServiceError> {
        stock_item::Entity::find()
            .filter(stock_item::Column::BuildOrderId.eq(build_id))
            .order_by_asc(stock_item::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Stock items produced by a build.
    pub async fn outputs_of(&self, build_id: i64) -> Result<Vec<stock_item::Model>, ServiceError> {
        stock_item::Entity::find()
            .filter(stock_item::Column::BuildId.eq(build_id))
            .order_by_asc(stock_item::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Stock items installed into an output.
    pub async fn installed_in(&self, output_id: i64) -> Result<Vec<stock_item::Model>, ServiceError> {
        stock_item::Entity::find()
            .filter(stock_item::Column::BelongsToId.eq(output_id))
            .order_by_asc(stock_item::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}

pub(crate) async fn get_stock_item<C: ConnectionTrait>(
    conn: &C,
    stock_item_id: i64,
) -> Result<stock_item::Model, ServiceError> {
    stock_item::Entity::find_by_id(stock_item_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Stock item", stock_item_id))
}

pub(crate) async fn get_location<C: ConnectionTrait>(
    conn: &C,
    location_id: i64,
) -> Result<stock_location::Model, ServiceError> {
    stock_location::Entity::find_by_id(location_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Stock location", location_id))
}

/// Sum of all reservations held against a stock item.
pub(crate) async fn allocated_quantity<C: ConnectionTrait>(
    conn: &C,
    stock_item_id: i64,
) -> Result<Decimal, ServiceError> {
    let reservations = build_item::Entity::find()
        .filter(build_item::Column::StockItemId.eq(stock_item_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(reservations.iter().map(|r| r.quantity).sum())
}

/// Unreserved quantity of an in-stock item; zero for consumed or empty items.
pub(crate) async fn available_quantity<C: ConnectionTrait>(
    conn: &C,
    item: &stock_item::Model,
) -> Result<Decimal, ServiceError> {
    if !item.is_in_stock() {
        return Ok(Decimal::ZERO);
    }
    let reserved = allocated_quantity(conn, item.id).await?;
    Ok((item.quantity - reserved).max(Decimal::ZERO))
}

pub(crate) async fn serial_exists<C: ConnectionTrait>(
    conn: &C,
    part_id: i64,
    serial: &str,
) -> Result<bool, ServiceError> {
    let existing = stock_item::Entity::find()
        .filter(stock_item::Column::PartId.eq(part_id))
        .filter(stock_item::Column::Serial.eq(serial))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(existing.is_some())
}

/// `root` and all of its descendant locations.
pub(crate) async fn location_subtree_ids<C: ConnectionTrait>(
    conn: &C,
    root: i64,
) -> Result<HashSet<i64>, ServiceError> {
    let mut ids = HashSet::from([root]);
    let mut frontier = vec![root];

    while !frontier.is_empty() {
        let children = stock_location::Entity::find()
            .filter(stock_location::Column::ParentId.is_in(frontier.clone()))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        frontier = children
            .into_iter()
            .map(|c| c.id)
            .filter(|id| ids.insert(*id))
            .collect();
    }

    Ok(ids)
}

pub(crate) async fn record_tracking<C: ConnectionTrait>(
    conn: &C,
    entry: TrackingEntry<'_>,
) -> Result<stock_item_tracking::Model, ServiceError> {
    stock_item_tracking::ActiveModel {
        stock_item_id: Set(entry.stock_item_id),
        tracking_type: Set(entry.tracking_type),
        quantity: Set(entry.quantity),
        build_id: Set(entry.build_id),
        related_item_id: Set(entry.related_item_id),
        user: Set(Some(entry.user.to_string())),
        notes: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)
}
