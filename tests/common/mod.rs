#![allow(dead_code)]

use std::sync::Arc;

use build_order_engine::{
    config::EngineConfig,
    db,
    entities::{bom_item, build, build_line, part, stock_item, stock_location},
    events::{Event, EventSender},
    services::{
        builds::NewBuild,
        catalog::{NewBomItem, NewPart},
        lifecycle::{BuildLifecycleObserver, LifecycleHooks},
        stock::NewStockItem,
    },
    BuildEngine,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Engine backed by a fresh, migrated in-memory SQLite database.
pub struct TestEngine {
    pub engine: BuildEngine,
    pub events: mpsc::Receiver<Event>,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default(), Vec::new()).await
    }

    pub async fn with_config(
        config: EngineConfig,
        observers: Vec<Arc<dyn BuildLifecycleObserver>>,
    ) -> Self {
        Self::on_database("sqlite::memory:", config, observers).await
    }

    /// Engine on an arbitrary database URL, e.g. a file-backed SQLite pool.
    pub async fn on_database(
        url: &str,
        config: EngineConfig,
        observers: Vec<Arc<dyn BuildLifecycleObserver>>,
    ) -> Self {
        let pool = db::establish_connection(url)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (sender, events) = EventSender::channel(256);
        let engine = BuildEngine::new(
            Arc::new(pool),
            config,
            LifecycleHooks::new(observers),
            Some(sender),
        );

        Self { engine, events }
    }

    /// Events emitted so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn location(&self, name: &str, parent: Option<i64>) -> stock_location::Model {
        self.engine
            .stock
            .create_location(name, parent)
            .await
            .expect("create location")
    }

    pub async fn assembly(&self, name: &str, trackable: bool) -> part::Model {
        self.engine
            .catalog
            .create_part(NewPart {
                name: name.to_string(),
                trackable,
                is_assembly: true,
                ..Default::default()
            })
            .await
            .expect("create assembly")
    }

    pub async fn component(&self, name: &str, trackable: bool) -> part::Model {
        self.engine
            .catalog
            .create_part(NewPart {
                name: name.to_string(),
                trackable,
                is_component: true,
                ..Default::default()
            })
            .await
            .expect("create component")
    }

    pub async fn variant(&self, name: &str, template: &part::Model) -> part::Model {
        self.engine
            .catalog
            .create_part(NewPart {
                name: name.to_string(),
                trackable: template.trackable,
                is_component: true,
                variant_of: Some(template.id),
                ..Default::default()
            })
            .await
            .expect("create variant")
    }

    pub async fn bom(&self, assembly: &part::Model, component: &part::Model, quantity: Decimal) -> bom_item::Model {
        self.bom_with(NewBomItem::new(assembly.id, component.id, quantity))
            .await
    }

    pub async fn bom_with(&self, input: NewBomItem) -> bom_item::Model {
        self.engine
            .catalog
            .add_bom_item(input)
            .await
            .expect("add BOM item")
    }

    pub async fn stock(&self, part: &part::Model, quantity: Decimal, location: Option<i64>) -> stock_item::Model {
        let mut input = NewStockItem::new(part.id, quantity);
        input.location_id = location;
        self.engine
            .stock
            .receive_stock(input)
            .await
            .expect("receive stock")
    }

    pub async fn serialized(&self, part: &part::Model, serial: &str) -> stock_item::Model {
        self.engine
            .stock
            .receive_stock(NewStockItem::new(part.id, Decimal::ONE).serial(serial))
            .await
            .expect("receive serialized stock")
    }

    pub async fn build(&self, reference: &str, part: &part::Model, quantity: Decimal) -> (build::Model, Vec<build_line::Model>) {
        self.engine
            .builds
            .create_build(NewBuild::new(reference, part.id, quantity))
            .await
            .expect("create build")
    }

    pub async fn stock_item(&self, id: i64) -> stock_item::Model {
        self.engine
            .stock
            .get_stock_item(id)
            .await
            .expect("load stock item")
    }
}

pub fn line_for<'a>(lines: &'a [build_line::Model], bom: &bom_item::Model) -> &'a build_line::Model {
    lines
        .iter()
        .find(|l| l.bom_item_id == bom.id)
        .expect("build line for BOM item")
}

pub fn serials(range: std::ops::RangeInclusive<u32>) -> Vec<String> {
    range.map(|n| n.to_string()).collect()
}
