use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, IntoActiveModel,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::{
    config::{EngineConfig, OutputAssignment},
    db::{begin_transaction, commit_transaction, for_update},
    entities::{build, build_item, part, stock_item, BuildStatus, TrackingType},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        builds::{ensure_pending, load_build},
        catalog::get_part,
        lifecycle::LifecycleHooks,
        requirements::{allocations_for_build, is_fully_allocated},
        stock::{record_tracking, serial_exists, TrackingEntry},
    },
};

/// Hands consumed trackable units to outputs according to the configured
/// policy.
struct OutputAssigner<'a> {
    policy: OutputAssignment,
    outputs: &'a [stock_item::Model],
    next: usize,
}

impl<'a> OutputAssigner<'a> {
    fn new(policy: OutputAssignment, outputs: &'a [stock_item::Model]) -> Self {
        Self {
            policy,
            outputs,
            next: 0,
        }
    }

    fn by_serial(&self, serial: &str) -> Option<i64> {
        self.outputs
            .iter()
            .find(|o| o.serial.as_deref() == Some(serial))
            .map(|o| o.id)
    }

    fn assign(&mut self) -> Option<i64> {
        if self.outputs.is_empty() {
            return None;
        }
        let index = match self.policy {
            OutputAssignment::FirstOutput => 0,
            OutputAssignment::RoundRobin => {
                let index = self.next % self.outputs.len();
                self.next += 1;
                index
            }
        };
        Some(self.outputs[index].id)
    }
}

/// Converts a pending build's reservations into produced stock.
#[derive(Clone)]
pub struct CompletionService {
    db: Arc<DatabaseConnection>,
    config: EngineConfig,
    hooks: Arc<LifecycleHooks>,
    event_sender: Option<EventSender>,
}

impl CompletionService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: EngineConfig,
        hooks: Arc<LifecycleHooks>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            config,
            hooks,
            event_sender,
        }
    }

    /// Completes a build in one transaction.
    ///
    /// Creates the outputs (one per serial for trackable parts, otherwise a
    /// single item of the build quantity), consumes every reservation by
    /// splitting or taking whole stock items, removes the reservations and
    /// marks the build `COMPLETE`. Any failure leaves the database untouched.
    #[instrument(skip(self, serials))]
    pub async fn complete_build(
        &self,
        build_id: i64,
        serials: Option<Vec<String>>,
        user: &str,
    ) -> Result<Vec<stock_item::Model>, ServiceError> {
        let started = Instant::now();
        let txn = begin_transaction(&self.db, "complete_build").await?;

        let result = self.complete_in(&txn, build_id, serials, user).await;
        let (completed, outputs) = match result {
            Ok(done) => done,
            Err(e) => {
                counter!("build_engine.builds.completion_failed", 1, "reason" => e.kind().as_ref().to_string());
                error!(build_id, error = %e, "Build completion failed");
                return Err(e);
            }
        };

        commit_transaction(txn, "complete_build").await?;

        counter!("build_engine.builds.completed", 1);
        histogram!(
            "build_engine.builds.completion_seconds",
            started.elapsed().as_secs_f64()
        );
        info!(
            build_id,
            outputs = outputs.len(),
            quantity = %completed.quantity,
            "Build completed"
        );

        self.hooks.post_complete(&completed, &outputs).await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::BuildCompleted {
                    build_id,
                    output_ids: outputs.iter().map(|o| o.id).collect(),
                    quantity: completed.quantity,
                    completed_at: completed.completion_date.unwrap_or_else(Utc::now),
                })
                .await;
        }

        Ok(outputs)
    }

    async fn complete_in(
        &self,
        txn: &DatabaseTransaction,
        build_id: i64,
        serials: Option<Vec<String>>,
        user: &str,
    ) -> Result<(build::Model, Vec<stock_item::Model>), ServiceError> {
        let build = load_build(txn, build_id, true).await?;
        ensure_pending(&build)?;

        let part = get_part(txn, build.part_id).await?;
        let output_serials = resolve_output_serials(txn, &build, &part, serials).await?;

        if self.config.require_full_allocation && !is_fully_allocated(txn, build.id).await? {
            return Err(ServiceError::NotFullyAllocated(build.id));
        }

        let output_quantity = if part.trackable {
            Decimal::ONE
        } else {
            build.quantity
        };

        let mut outputs = Vec::with_capacity(output_serials.len());
        for serial in output_serials {
            let output = stock_item::ActiveModel {
                part_id: Set(part.id),
                location_id: Set(build.destination_id),
                quantity: Set(output_quantity),
                serial: Set(serial),
                batch: Set(build.batch.clone()),
                build_id: Set(Some(build.id)),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;

            record_tracking(
                txn,
                TrackingEntry {
                    stock_item_id: output.id,
                    tracking_type: TrackingType::BuildOutputCreated,
                    quantity: output.quantity,
                    build_id: Some(build.id),
                    related_item_id: None,
                    user,
                },
            )
            .await?;
            outputs.push(output);
        }

        let mut assigner = OutputAssigner::new(self.config.output_assignment, &outputs);
        let mut trackable_parts: HashMap<i64, bool> = HashMap::new();

        for allocation in allocations_for_build(txn, build.id).await? {
            let stock = for_update(stock_item::Entity::find_by_id(allocation.stock_item_id), txn)
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::not_found("Stock item", allocation.stock_item_id))?;

            let trackable = match trackable_parts.get(&stock.part_id) {
                Some(trackable) => *trackable,
                None => {
                    let trackable = get_part(txn, stock.part_id).await?.trackable;
                    trackable_parts.insert(stock.part_id, trackable);
                    trackable
                }
            };

            let belongs_to = match allocation.install_into.as_deref() {
                Some(serial) => Some(assigner.by_serial(serial).ok_or_else(|| {
                    ServiceError::SerializationViolation(format!(
                        "Allocation {} is designated for output '{}', which is not being built",
                        allocation.id, serial
                    ))
                })?),
                None if trackable => assigner.assign(),
                None => None,
            };

            consume(txn, &build, stock, &allocation, belongs_to, user).await?;

            build_item::Entity::delete_by_id(allocation.id)
                .exec(txn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        let now = Utc::now();
        let mut active = build.into_active_model();
        active.status = Set(BuildStatus::Complete);
        active.completed = Set(produced_quantity(&outputs));
        active.completion_date = Set(Some(now));
        active.completed_by = Set(Some(user.to_string()));
        let completed = active.update(txn).await.map_err(ServiceError::db_error)?;

        Ok((completed, outputs))
    }
}

fn produced_quantity(outputs: &[stock_item::Model]) -> Decimal {
    outputs.iter().map(|o| o.quantity).sum()
}

/// Validates the serials handed to completion and returns one entry per
/// output to create.
async fn resolve_output_serials<C: ConnectionTrait>(
    conn: &C,
    build: &build::Model,
    part: &part::Model,
    serials: Option<Vec<String>>,
) -> Result<Vec<Option<String>>, ServiceError> {
    let serials: Vec<String> = serials
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect();

    if !part.trackable {
        if !serials.is_empty() {
            return Err(ServiceError::SerializationViolation(format!(
                "Part {} is not trackable; outputs cannot be serialized",
                part.id
            )));
        }
        return Ok(vec![None]);
    }

    if serials.is_empty() {
        return Err(ServiceError::SerializationViolation(format!(
            "Part {} is trackable; serial numbers are required to complete build {}",
            part.id, build.id
        )));
    }
    if Decimal::from(serials.len()) != build.quantity {
        return Err(ServiceError::QuantityMismatch {
            expected: build.quantity,
            actual: Decimal::from(serials.len()),
        });
    }

    let mut seen = HashSet::with_capacity(serials.len());
    for serial in &serials {
        if serial.is_empty() {
            return Err(ServiceError::SerializationViolation(
                "Serial numbers cannot be empty".to_string(),
            ));
        }
        if !seen.insert(serial.as_str()) || serial_exists(conn, part.id, serial).await? {
            return Err(ServiceError::DuplicateSerial {
                part_id: part.id,
                serial: serial.clone(),
            });
        }
    }

    Ok(serials.into_iter().map(Some).collect())
}

/// Realises one reservation against its stock item.
///
/// Reserving the whole item consumes it in place; otherwise the reserved
/// quantity is split off into a new child item which is consumed instead.
async fn consume(
    txn: &DatabaseTransaction,
    build: &build::Model,
    stock: stock_item::Model,
    allocation: &build_item::Model,
    belongs_to: Option<i64>,
    user: &str,
) -> Result<stock_item::Model, ServiceError> {
    if !stock.is_in_stock() || allocation.quantity > stock.quantity {
        return Err(ServiceError::InsufficientStock {
            stock_item_id: stock.id,
            requested: allocation.quantity,
            available: if stock.is_in_stock() {
                stock.quantity
            } else {
                Decimal::ZERO
            },
        });
    }

    if allocation.quantity == stock.quantity {
        let stock_id = stock.id;
        let mut active = stock.into_active_model();
        active.build_order_id = Set(Some(build.id));
        active.belongs_to_id = Set(belongs_to);
        let consumed = active.update(txn).await.map_err(ServiceError::db_error)?;

        record_tracking(
            txn,
            TrackingEntry {
                stock_item_id: stock_id,
                tracking_type: TrackingType::BuildConsumed,
                quantity: consumed.quantity,
                build_id: Some(build.id),
                related_item_id: belongs_to,
                user,
            },
        )
        .await?;
        return Ok(consumed);
    }

    let remaining = stock.quantity - allocation.quantity;
    // Split children never carry the serial: serialized items hold exactly
    // one unit and are always consumed whole.
    let child = stock_item::ActiveModel {
        part_id: Set(stock.part_id),
        location_id: Set(stock.location_id),
        quantity: Set(allocation.quantity),
        serial: Set(None),
        batch: Set(stock.batch.clone()),
        parent_id: Set(Some(stock.id)),
        build_order_id: Set(Some(build.id)),
        belongs_to_id: Set(belongs_to),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let parent_id = stock.id;
    let mut parent = stock.into_active_model();
    parent.quantity = Set(remaining);
    parent.update(txn).await.map_err(ServiceError::db_error)?;

    for entry in [
        TrackingEntry {
            stock_item_id: parent_id,
            tracking_type: TrackingType::SplitChildItem,
            quantity: allocation.quantity,
            build_id: Some(build.id),
            related_item_id: Some(child.id),
            user,
        },
        TrackingEntry {
            stock_item_id: child.id,
            tracking_type: TrackingType::SplitFromParent,
            quantity: allocation.quantity,
            build_id: Some(build.id),
            related_item_id: Some(parent_id),
            user,
        },
        TrackingEntry {
            stock_item_id: child.id,
            tracking_type: TrackingType::BuildConsumed,
            quantity: allocation.quantity,
            build_id: Some(build.id),
            related_item_id: belongs_to,
            user,
        },
    ] {
        record_tracking(txn, entry).await?;
    }

    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn output(id: i64, serial: &str) -> stock_item::Model {
        let now = Utc::now();
        stock_item::Model {
            id,
            part_id: 1,
            location_id: None,
            quantity: dec!(1),
            serial: Some(serial.to_string()),
            batch: None,
            parent_id: None,
            build_id: Some(1),
            build_order_id: None,
            belongs_to_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn round_robin_cycles_through_outputs() {
        let outputs = vec![output(10, "1"), output(11, "2"), output(12, "3")];
        let mut assigner = OutputAssigner::new(OutputAssignment::RoundRobin, &outputs);

        let assigned: Vec<_> = (0..4).filter_map(|_| assigner.assign()).collect();
        assert_eq!(assigned, vec![10, 11, 12, 10]);
    }

    #[test]
    fn first_output_policy_always_picks_first() {
        let outputs = vec![output(10, "1"), output(11, "2")];
        let mut assigner = OutputAssigner::new(OutputAssignment::FirstOutput, &outputs);

        assert_eq!(assigner.assign(), Some(10));
        assert_eq!(assigner.assign(), Some(10));
    }

    #[test]
    fn designated_serial_resolves_to_its_output() {
        let outputs = vec![output(10, "4"), output(11, "5")];
        let assigner = OutputAssigner::new(OutputAssignment::RoundRobin, &outputs);

        assert_eq!(assigner.by_serial("5"), Some(11));
        assert_eq!(assigner.by_serial("6"), None);
    }
}
