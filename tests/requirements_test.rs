mod common;

use assert_matches::assert_matches;
use build_order_engine::{
    services::{allocation::AllocateRequest, builds::NewBuild, catalog::NewBomItem},
    ServiceError,
};
use common::{line_for, TestEngine};
use rust_decimal_macros::dec;

#[tokio::test]
async fn build_lines_scale_with_build_quantity() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    let glue = t.component("Glue", false).await;
    let panel = t.component("Panel", false).await;

    let screws = t.bom(&widget, &screw, dec!(4)).await;
    let mut glue_input = NewBomItem::new(widget.id, glue.id, dec!(3));
    glue_input.setup_quantity = dec!(5);
    let glue_bom = t.bom_with(glue_input).await;
    let mut panel_input = NewBomItem::new(widget.id, panel.id, dec!(3));
    panel_input.rounding_multiple = Some(dec!(10));
    let panel_bom = t.bom_with(panel_input).await;

    let (build, lines) = t.build("BO-0001", &widget, dec!(7)).await;

    assert_eq!(lines.len(), 3);
    assert_eq!(line_for(&lines, &screws).quantity, dec!(28));
    assert_eq!(line_for(&lines, &glue_bom).quantity, dec!(26));
    assert_eq!(line_for(&lines, &panel_bom).quantity, dec!(30));

    assert_eq!(
        t.engine.builds.required_quantity(build.id, screw.id).await.unwrap(),
        dec!(28)
    );
    assert_eq!(
        t.engine.builds.required_quantity(build.id, widget.id).await.unwrap(),
        dec!(0)
    );
}

#[tokio::test]
async fn variants_inherit_template_bom_lines() {
    let t = TestEngine::new().await;
    let chair = t.assembly("Chair", false).await;
    let leg = t.component("Leg", false).await;
    let cushion = t.component("Cushion", false).await;
    let armrest = t.component("Armrest", false).await;

    let mut legs = NewBomItem::new(chair.id, leg.id, dec!(4));
    legs.inherited = true;
    t.bom_with(legs).await;
    t.bom(&chair, &cushion, dec!(1)).await;

    let armchair = t
        .engine
        .catalog
        .create_part(build_order_engine::services::catalog::NewPart {
            name: "Armchair".into(),
            is_assembly: true,
            variant_of: Some(chair.id),
            ..Default::default()
        })
        .await
        .unwrap();
    t.bom(&armchair, &armrest, dec!(2)).await;
    assert_eq!(t.engine.catalog.variants_of(chair.id).await.unwrap(), vec![armchair.id]);
    assert!(t.engine.catalog.variants_of(armchair.id).await.unwrap().is_empty());

    let bom = t.engine.catalog.bom_items_for(armchair.id).await.unwrap();
    let sub_parts: Vec<i64> = bom.iter().map(|b| b.sub_part_id).collect();
    assert_eq!(sub_parts, vec![armrest.id, leg.id]);

    let (build, lines) = t.build("BO-0001", &armchair, dec!(3)).await;
    assert_eq!(lines.len(), 2);
    assert_eq!(
        t.engine.builds.required_quantity(build.id, leg.id).await.unwrap(),
        dec!(12)
    );
}

#[tokio::test]
async fn fully_allocated_tracks_every_non_consumable_part() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let screw = t.component("Screw", false).await;
    let grease = t.component("Grease", false).await;

    let screw_bom = t.bom(&widget, &screw, dec!(2)).await;
    let mut grease_input = NewBomItem::new(widget.id, grease.id, dec!(1));
    grease_input.consumable = true;
    t.bom_with(grease_input).await;

    let lot_a = t.stock(&screw, dec!(3), None).await;
    let lot_b = t.stock(&screw, dec!(3), None).await;
    let (build, lines) = t.build("BO-0001", &widget, dec!(3)).await;
    let line = line_for(&lines, &screw_bom);

    assert!(!t.engine.builds.is_fully_allocated(build.id).await.unwrap());
    assert!(t.engine.builds.is_part_fully_allocated(build.id, grease.id).await.unwrap());

    t.engine
        .allocation
        .allocate(AllocateRequest::new(line.id, lot_a.id, dec!(3)))
        .await
        .unwrap();
    assert!(!t.engine.builds.is_part_fully_allocated(build.id, screw.id).await.unwrap());

    t.engine
        .allocation
        .allocate(AllocateRequest::new(line.id, lot_b.id, dec!(3)))
        .await
        .unwrap();
    assert!(t.engine.builds.is_part_fully_allocated(build.id, screw.id).await.unwrap());
    assert!(t.engine.builds.is_fully_allocated(build.id).await.unwrap());

    let rollup = t.engine.builds.part_requirements(build.id).await.unwrap();
    let screws = rollup.iter().find(|p| p.part_id == screw.id).unwrap();
    assert_eq!(screws.required, dec!(6));
    assert_eq!(screws.allocated, dec!(6));
}

#[tokio::test]
async fn build_creation_validates_input() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", true).await;
    let screw = t.component("Screw", false).await;
    t.bom(&widget, &screw, dec!(1)).await;

    assert_matches!(
        t.engine
            .builds
            .create_build(NewBuild::new("BO-1", widget.id, dec!(0)))
            .await,
        Err(ServiceError::InvalidQuantity(_))
    );
    assert_matches!(
        t.engine
            .builds
            .create_build(NewBuild::new("BO-1", widget.id, dec!(1.5)))
            .await,
        Err(ServiceError::InvalidQuantity(_))
    );
    assert_matches!(
        t.engine
            .builds
            .create_build(NewBuild::new("BO-1", screw.id, dec!(1)))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    t.build("BO-1", &widget, dec!(1)).await;
    assert_matches!(
        t.engine
            .builds
            .create_build(NewBuild::new("BO-1", widget.id, dec!(1)))
            .await,
        Err(ServiceError::Conflict(_))
    );
}

#[tokio::test]
async fn bom_rejects_cycles_and_duplicates() {
    let t = TestEngine::new().await;
    let top = t
        .engine
        .catalog
        .create_part(build_order_engine::services::catalog::NewPart {
            name: "Top".into(),
            is_assembly: true,
            is_component: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let middle = t
        .engine
        .catalog
        .create_part(build_order_engine::services::catalog::NewPart {
            name: "Middle".into(),
            is_assembly: true,
            is_component: true,
            ..Default::default()
        })
        .await
        .unwrap();

    t.bom(&top, &middle, dec!(1)).await;

    assert_matches!(
        t.engine
            .catalog
            .add_bom_item(NewBomItem::new(top.id, middle.id, dec!(2)))
            .await,
        Err(ServiceError::Conflict(_))
    );
    assert_matches!(
        t.engine
            .catalog
            .add_bom_item(NewBomItem::new(middle.id, top.id, dec!(1)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        t.engine
            .catalog
            .add_bom_item(NewBomItem::new(top.id, top.id, dec!(1)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn trackable_components_need_whole_bom_quantities() {
    let t = TestEngine::new().await;
    let widget = t.assembly("Widget", false).await;
    let cpu = t.component("CPU", true).await;
    let paste = t.component("Paste", false).await;

    assert_matches!(
        t.engine
            .catalog
            .add_bom_item(NewBomItem::new(widget.id, cpu.id, dec!(0.5)))
            .await,
        Err(ServiceError::InvalidQuantity(_))
    );
    let mut with_setup = NewBomItem::new(widget.id, cpu.id, dec!(1));
    with_setup.setup_quantity = dec!(0.5);
    assert_matches!(
        t.engine.catalog.add_bom_item(with_setup).await,
        Err(ServiceError::InvalidQuantity(_))
    );

    t.bom(&widget, &cpu, dec!(2)).await;
    t.bom(&widget, &paste, dec!(0.25)).await;
    assert_eq!(t.engine.catalog.bom_items_for(widget.id).await.unwrap().len(), 2);
}
