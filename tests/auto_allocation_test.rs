mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use assert_matches::assert_matches;
use async_trait::async_trait;
use build_order_engine::{
    config::EngineConfig,
    services::{
        allocation::AllocateRequest,
        auto_allocation::AutoAllocateOptions,
        builds::NewBuild,
        catalog::NewBomItem,
        lifecycle::{AllocationContext, BuildLifecycleObserver},
    },
    ServiceError,
};
use common::{line_for, TestEngine};
use rust_decimal_macros::dec;

#[tokio::test]
async fn single_covering_candidate_is_allocated() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    let nut = t.component("Nut", false).await;
    let screw_bom = t.bom(&widget, &screw, dec!(4)).await;
    let nut_bom = t.bom(&widget, &nut, dec!(2)).await;

    let screws = t.stock(&screw, dec!(100), None).await;
    // Two nut lots make the nut line ambiguous.
    t.stock(&nut, dec!(50), None).await;
    t.stock(&nut, dec!(50), None).await;

    let (build, lines) = t.build("BO-0001", &widget, dec!(5)).await;

    let proposals = t
        .engine
        .auto_allocation
        .propose_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].build_line_id, line_for(&lines, &screw_bom).id);
    assert_eq!(proposals[0].stock_item_id, screws.id);
    assert_eq!(proposals[0].quantity, dec!(20));

    // Proposing writes nothing.
    assert_eq!(t.engine.stock.available_quantity(screws.id).await.unwrap(), dec!(100));

    let applied = t
        .engine
        .auto_allocation
        .commit_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert_eq!(applied, proposals);
    assert_eq!(t.engine.stock.available_quantity(screws.id).await.unwrap(), dec!(80));

    let lines = t.engine.builds.line_allocations(build.id).await.unwrap();
    let nut_line = lines.iter().find(|l| l.line.bom_item_id == nut_bom.id).unwrap();
    assert_eq!(nut_line.allocated, dec!(0));
}

#[tokio::test]
async fn insufficient_single_candidate_is_skipped() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    t.bom(&widget, &screw, dec!(10)).await;
    t.stock(&screw, dec!(15), None).await;
    let (build, _) = t.build("BO-0001", &widget, dec!(2)).await;

    let proposals = t
        .engine
        .auto_allocation
        .commit_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();

    assert!(proposals.is_empty());
    assert!(!t.engine.builds.is_fully_allocated(build.id).await.unwrap());
}

#[tokio::test]
async fn only_the_remaining_quantity_is_proposed() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    let bom = t.bom(&widget, &screw, dec!(10)).await;
    let lot = t.stock(&screw, dec!(100), None).await;
    let (build, lines) = t.build("BO-0001", &widget, dec!(3)).await;

    t.engine
        .allocation
        .allocate(AllocateRequest::new(line_for(&lines, &bom).id, lot.id, dec!(12)))
        .await
        .unwrap();

    let proposals = t
        .engine
        .auto_allocation
        .propose_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].quantity, dec!(18));
}

#[tokio::test]
async fn location_scope_and_exclusion_are_honoured() {
    let t = TestEngine::new().await;
    let warehouse = t.location("Warehouse", None).await;
    let shelf = t.location("Shelf A", Some(warehouse.id)).await;
    let quarantine = t.location("Quarantine", None).await;

    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    t.bom(&widget, &screw, dec!(1)).await;

    let shelved = t.stock(&screw, dec!(10), Some(shelf.id)).await;
    t.stock(&screw, dec!(10), Some(quarantine.id)).await;

    let mut input = NewBuild::new("BO-0001", widget.id, dec!(5));
    input.take_from_id = Some(warehouse.id);
    let (build, _) = t.engine.builds.create_build(input).await.unwrap();

    // take_from limits the search to the warehouse tree.
    let proposals = t
        .engine
        .auto_allocation
        .propose_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].stock_item_id, shelved.id);

    // Excluding the shelf leaves nothing in scope.
    let proposals = t
        .engine
        .auto_allocation
        .propose_auto_allocations(
            build.id,
            AutoAllocateOptions {
                exclude_location_id: Some(shelf.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(proposals.is_empty());
}

#[tokio::test]
async fn optional_and_consumable_lines() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let sticker = t.component("Sticker", false).await;
    let grease = t.component("Grease", false).await;

    let mut optional = NewBomItem::new(widget.id, sticker.id, dec!(1));
    optional.optional = true;
    t.bom_with(optional).await;
    let mut consumable = NewBomItem::new(widget.id, grease.id, dec!(1));
    consumable.consumable = true;
    t.bom_with(consumable).await;

    t.stock(&sticker, dec!(10), None).await;
    t.stock(&grease, dec!(10), None).await;
    let (build, _) = t.build("BO-0001", &widget, dec!(2)).await;

    let default_pass = t
        .engine
        .auto_allocation
        .propose_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert!(default_pass.is_empty());

    let with_optional = t
        .engine
        .auto_allocation
        .propose_auto_allocations(
            build.id,
            AutoAllocateOptions {
                optional_items: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(with_optional.len(), 1);
    assert_eq!(with_optional[0].part_id, sticker.id);
}

#[tokio::test]
async fn one_lot_is_not_promised_twice_in_a_pass() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let gadget = t.component("Gadget", false).await;
    let screw = t.component("Screw", false).await;
    let screw_variant = t.variant("Screw M3", &screw).await;

    // Two lines that can both draw from the same variant lot.
    let mut direct = NewBomItem::new(widget.id, screw_variant.id, dec!(6));
    direct.reference = Some("direct".into());
    t.bom_with(direct).await;
    let mut via_template = NewBomItem::new(widget.id, screw.id, dec!(6));
    via_template.allow_variants = true;
    t.bom_with(via_template).await;
    t.bom(&widget, &gadget, dec!(1)).await;

    let lot = t.stock(&screw_variant, dec!(10), None).await;
    t.stock(&gadget, dec!(1), None).await;
    let (build, _) = t.build("BO-0001", &widget, dec!(1)).await;

    let proposals = t
        .engine
        .auto_allocation
        .commit_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();

    let from_lot: Vec<_> = proposals.iter().filter(|p| p.stock_item_id == lot.id).collect();
    assert_eq!(from_lot.len(), 1);
    assert_eq!(t.engine.stock.available_quantity(lot.id).await.unwrap(), dec!(4));
}

#[tokio::test]
async fn cancelled_build_cannot_be_auto_allocated() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    t.bom(&widget, &screw, dec!(1)).await;
    t.stock(&screw, dec!(10), None).await;
    let (build, _) = t.build("BO-0001", &widget, dec!(1)).await;

    t.engine.cancellation.cancel_build(build.id, "tester").await.unwrap();

    assert_matches!(
        t.engine
            .auto_allocation
            .commit_auto_allocations(build.id, AutoAllocateOptions::default())
            .await,
        Err(ServiceError::BuildNotPending { .. })
    );
}

#[tokio::test]
async fn serialized_stock_is_never_proposed_for_a_fraction() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let cpu = t.component("CPU", true).await;
    let plate = t.component("Plate", false).await;
    let cpu_bom = t.bom(&widget, &cpu, dec!(1)).await;
    let plate_bom = t.bom(&widget, &plate, dec!(2)).await;

    let first_cpu = t.serialized(&cpu, "CPU-1").await;
    t.serialized(&cpu, "CPU-2").await;
    let plates = t.stock(&plate, dec!(10), None).await;
    let (build, lines) = t.build("BO-0001", &widget, dec!(1.5)).await;

    t.engine
        .allocation
        .allocate(AllocateRequest::new(line_for(&lines, &cpu_bom).id, first_cpu.id, dec!(1)))
        .await
        .unwrap();

    // The CPU line still needs 0.5, which no serialized unit can supply.
    let proposals = t
        .engine
        .auto_allocation
        .commit_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].build_line_id, line_for(&lines, &plate_bom).id);
    assert_eq!(proposals[0].stock_item_id, plates.id);
    assert_eq!(proposals[0].quantity, dec!(3));

    let lines = t.engine.builds.line_allocations(build.id).await.unwrap();
    let allocated = |bom_id: i64| lines.iter().find(|l| l.line.bom_item_id == bom_id).unwrap().allocated;
    assert_eq!(allocated(cpu_bom.id), dec!(1));
    assert_eq!(allocated(plate_bom.id), dec!(3));
}

/// Rejects every allocation after the first one it sees.
#[derive(Default)]
struct RejectAfterFirst {
    seen: AtomicUsize,
}

#[async_trait]
impl BuildLifecycleObserver for RejectAfterFirst {
    fn name(&self) -> &str {
        "reject-after-first"
    }

    async fn pre_allocate(&self, _ctx: &AllocationContext<'_>) -> Result<(), ServiceError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(ServiceError::ValidationError("quota reached".into()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn batch_is_rolled_back_when_any_allocation_fails() {
    let t = TestEngine::with_config(
        EngineConfig::default(),
        vec![Arc::new(RejectAfterFirst::default())],
    )
    .await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    let nut = t.component("Nut", false).await;
    t.bom(&widget, &screw, dec!(4)).await;
    t.bom(&widget, &nut, dec!(2)).await;
    let screws = t.stock(&screw, dec!(100), None).await;
    let nuts = t.stock(&nut, dec!(100), None).await;
    let (build, _) = t.build("BO-0001", &widget, dec!(5)).await;

    let proposals = t
        .engine
        .auto_allocation
        .propose_auto_allocations(build.id, AutoAllocateOptions::default())
        .await
        .unwrap();
    assert_eq!(proposals.len(), 2);

    assert_matches!(
        t.engine
            .auto_allocation
            .commit_auto_allocations(build.id, AutoAllocateOptions::default())
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let lines = t.engine.builds.line_allocations(build.id).await.unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.allocated.is_zero()));
    assert_eq!(t.engine.stock.available_quantity(screws.id).await.unwrap(), dec!(100));
    assert_eq!(t.engine.stock.available_quantity(nuts.id).await.unwrap(), dec!(100));
}
