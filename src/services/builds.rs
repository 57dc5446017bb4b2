use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    db::{begin_transaction, commit_transaction, for_update},
    entities::{build, build_line, BuildStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{bom_items_for, get_part},
        requirements::{self, part_requirements, required_for_build, LineAllocation, PartRequirement},
        stock::get_location,
    },
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewBuild {
    pub reference: String,
    pub title: Option<String>,
    pub part_id: i64,
    pub quantity: Decimal,
    pub take_from_id: Option<i64>,
    pub destination_id: Option<i64>,
    pub batch: Option<String>,
}

impl NewBuild {
    pub fn new(reference: impl Into<String>, part_id: i64, quantity: Decimal) -> Self {
        Self {
            reference: reference.into(),
            title: None,
            part_id,
            quantity,
            take_from_id: None,
            destination_id: None,
            batch: None,
        }
    }
}

/// Build order creation and read access to requirements
#[derive(Clone)]
pub struct BuildService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl BuildService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a pending build together with one line per effective BOM item.
    #[instrument(skip(self, input), fields(reference = %input.reference, part_id = input.part_id))]
    pub async fn create_build(
        &self,
        input: NewBuild,
    ) -> Result<(build::Model, Vec<build_line::Model>), ServiceError> {
        let reference = input.reference.trim().to_string();
        if reference.is_empty() {
            return Err(ServiceError::ValidationError(
                "Build reference cannot be empty".to_string(),
            ));
        }
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "Build quantity must be positive, got: {}",
                input.quantity
            )));
        }

        let txn = begin_transaction(&self.db, "create_build").await?;

        let part = get_part(&txn, input.part_id).await?;
        if !part.is_assembly {
            return Err(ServiceError::ValidationError(format!(
                "Part {} is not an assembly",
                part.id
            )));
        }
        if part.trackable && !input.quantity.fract().is_zero() {
            return Err(ServiceError::InvalidQuantity(format!(
                "Part {} is trackable; build quantity must be a whole number, got: {}",
                part.id, input.quantity
            )));
        }
        for location_id in [input.take_from_id, input.destination_id].into_iter().flatten() {
            get_location(&txn, location_id).await?;
        }

        let duplicate = build::Entity::find()
            .filter(build::Column::Reference.eq(reference.as_str()))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Build reference '{}' already exists",
                reference
            )));
        }

        let created = build::ActiveModel {
            reference: Set(reference),
            title: Set(input.title),
            part_id: Set(part.id),
            quantity: Set(input.quantity),
            take_from_id: Set(input.take_from_id),
            destination_id: Set(input.destination_id),
            batch: Set(input.batch),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut lines = Vec::new();
        for bom in bom_items_for(&txn, part.id).await? {
            let line = build_line::ActiveModel {
                build_id: Set(created.id),
                bom_item_id: Set(bom.id),
                quantity: Set(required_for_build(&bom, created.quantity)),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
            lines.push(line);
        }

        commit_transaction(txn, "create_build").await?;

        counter!("build_engine.builds.created", 1);
        info!(build_id = created.id, lines = lines.len(), "Build order created");

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::BuildCreated {
                    build_id: created.id,
                    reference: created.reference.clone(),
                    part_id: created.part_id,
                    quantity: created.quantity,
                })
                .await;
        }

        Ok((created, lines))
    }

    pub async fn get_build(&self, build_id: i64) -> Result<build::Model, ServiceError> {
        load_build(&*self.db, build_id, false).await
    }

    pub async fn list_builds(
        &self,
        status: Option<BuildStatus>,
    ) -> Result<Vec<build::Model>, ServiceError> {
        let mut query = build::Entity::find().order_by_asc(build::Column::Id);
        if let Some(status) = status {
            query = query.filter(build::Column::Status.eq(status));
        }
        query.all(&*self.db).await.map_err(ServiceError::db_error)
    }

    /// Lines of a build with what is currently reserved against each.
    pub async fn line_allocations(&self, build_id: i64) -> Result<Vec<LineAllocation>, ServiceError> {
        let db = &*self.db;
        load_build(db, build_id, false).await?;
        requirements::line_allocations(db, build_id).await
    }

    pub async fn part_requirements(&self, build_id: i64) -> Result<Vec<PartRequirement>, ServiceError> {
        Ok(part_requirements(&self.line_allocations(build_id).await?))
    }

    /// Total quantity of `part_id` required across all lines of the build.
    pub async fn required_quantity(&self, build_id: i64, part_id: i64) -> Result<Decimal, ServiceError> {
        let db = &*self.db;
        load_build(db, build_id, false).await?;
        requirements::required_quantity(db, build_id, part_id).await
    }

    pub async fn is_part_fully_allocated(&self, build_id: i64, part_id: i64) -> Result<bool, ServiceError> {
        let db = &*self.db;
        load_build(db, build_id, false).await?;
        requirements::is_part_fully_allocated(db, build_id, part_id).await
    }

    pub async fn is_fully_allocated(&self, build_id: i64) -> Result<bool, ServiceError> {
        let db = &*self.db;
        load_build(db, build_id, false).await?;
        requirements::is_fully_allocated(db, build_id).await
    }
}

/// Loads a build, row-locking it when `lock` is set.
pub(crate) async fn load_build<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
    lock: bool,
) -> Result<build::Model, ServiceError> {
    let select = build::Entity::find_by_id(build_id);
    let select = if lock { for_update(select, conn) } else { select };
    select
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Build", build_id))
}

pub(crate) fn ensure_pending(build: &build::Model) -> Result<(), ServiceError> {
    if build.status != BuildStatus::Pending {
        return Err(ServiceError::BuildNotPending {
            build_id: build.id,
            status: build.status.to_string(),
        });
    }
    Ok(())
}
