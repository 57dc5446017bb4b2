use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Lifecycle events emitted by the build order engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BuildCreated {
        build_id: i64,
        reference: String,
        part_id: i64,
        quantity: Decimal,
    },
    StockAllocated {
        build_id: i64,
        build_item_id: i64,
        stock_item_id: i64,
        quantity: Decimal,
    },
    AllocationsRemoved {
        build_id: i64,
        count: u64,
    },
    BuildCompleted {
        build_id: i64,
        output_ids: Vec<i64>,
        quantity: Decimal,
        completed_at: DateTime<Utc>,
    },
    BuildCancelled {
        build_id: i64,
        cancelled_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn build_id(&self) -> i64 {
        match self {
            Event::BuildCreated { build_id, .. }
            | Event::StockAllocated { build_id, .. }
            | Event::AllocationsRemoved { build_id, .. }
            | Event::BuildCompleted { build_id, .. }
            | Event::BuildCancelled { build_id, .. } => *build_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving half of a bounded channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is gone.
    ///
    /// Events are emitted after the owning transaction committed, so a lost
    /// event must never fail the operation.
    pub async fn send_or_log(&self, event: Event) {
        let build_id = event.build_id();
        if let Err(e) = self.send(event).await {
            warn!(build_id, error = %e, "Dropping build lifecycle event");
        }
    }
}

/// Drains the event channel, logging every event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(build_id = event.build_id(), event = ?event, "Received event");
    }

    info!("Event channel closed; stopping event processing loop");
}
