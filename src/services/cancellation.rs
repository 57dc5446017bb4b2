use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, IntoActiveModel};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    db::{begin_transaction, commit_transaction},
    entities::{build, BuildStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        allocation::{unallocate_in, UnallocateFilter},
        builds::load_build,
        lifecycle::LifecycleHooks,
    },
};

#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    hooks: Arc<LifecycleHooks>,
    event_sender: Option<EventSender>,
}

impl CancellationService {
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

    /// Cancels a pending build, releasing all of its reservations.
    ///
    /// Stock quantities are never touched. Cancelling an already cancelled
    /// build is a no-op; a completed build cannot be cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_build(&self, build_id: i64, user: &str) -> Result<build::Model, ServiceError> {
        let txn = begin_transaction(&self.db, "cancel_build").await?;
        let build = load_build(&txn, build_id, true).await?;

        match build.status {
            BuildStatus::Cancelled => {
                debug!(build_id, "Build already cancelled");
                return Ok(build);
            }
            BuildStatus::Complete => {
                return Err(ServiceError::BuildNotPending {
                    build_id,
                    status: build.status.to_string(),
                });
            }
            BuildStatus::Pending => {}
        }

        let released = unallocate_in(&txn, build.id, &UnallocateFilter::default()).await?;

        let mut active = build.into_active_model();
        active.status = Set(BuildStatus::Cancelled);
        active.completion_date = Set(Some(Utc::now()));
        active.completed_by = Set(Some(user.to_string()));
        let cancelled = active.update(&txn).await.map_err(ServiceError::db_error)?;

        commit_transaction(txn, "cancel_build").await?;

        counter!("build_engine.builds.cancelled", 1);
        counter!("build_engine.allocations.removed", released);
        info!(build_id, released, "Build cancelled");

        self.hooks.post_cancel(&cancelled).await;
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::BuildCancelled {
                    build_id,
                    cancelled_at: cancelled.completion_date.unwrap_or_else(Utc::now),
                })
                .await;
        }

        Ok(cancelled)
    }
}
