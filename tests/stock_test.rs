mod common;

use assert_matches::assert_matches;
use build_order_engine::{services::stock::NewStockItem, ServiceError};
use common::TestEngine;
use rust_decimal_macros::dec;

#[tokio::test]
async fn trackable_stock_must_be_serialized_units() {
    let t = TestEngine::new().await;
    let board = t.component("Board", true).await;

    assert_matches!(
        t.engine.stock.receive_stock(NewStockItem::new(board.id, dec!(1))).await,
        Err(ServiceError::SerializationViolation(_))
    );
    assert_matches!(
        t.engine
            .stock
            .receive_stock(NewStockItem::new(board.id, dec!(2)).serial("B-1"))
            .await,
        Err(ServiceError::SerializationViolation(_))
    );

    t.serialized(&board, "B-1").await;
    assert_matches!(
        t.engine
            .stock
            .receive_stock(NewStockItem::new(board.id, dec!(1)).serial("B-1"))
            .await,
        Err(ServiceError::DuplicateSerial { ref serial, .. }) if serial == "B-1"
    );
}

#[tokio::test]
async fn untracked_stock_rejects_serials_and_bad_quantities() {
    let t = TestEngine::new().await;
    let screw = t.component("Screw", false).await;

    assert_matches!(
        t.engine
            .stock
            .receive_stock(NewStockItem::new(screw.id, dec!(5)).serial("S-1"))
            .await,
        Err(ServiceError::SerializationViolation(_))
    );
    assert_matches!(
        t.engine.stock.receive_stock(NewStockItem::new(screw.id, dec!(0))).await,
        Err(ServiceError::InvalidQuantity(_))
    );
    assert_matches!(
        t.engine.stock.receive_stock(NewStockItem::new(999, dec!(1))).await,
        Err(ServiceError::NotFound(_))
    );

    let lot = t
        .engine
        .stock
        .receive_stock(NewStockItem::new(screw.id, dec!(25)).batch("L-7"))
        .await
        .unwrap();
    assert_eq!(lot.batch.as_deref(), Some("L-7"));
    assert!(lot.is_in_stock());
    assert_eq!(t.engine.stock.available_quantity(lot.id).await.unwrap(), dec!(25));
}

#[tokio::test]
async fn locations_require_existing_parent() {
    let t = TestEngine::new().await;
    let root = t.location("Warehouse", None).await;
    let child = t.location("Bin 1", Some(root.id)).await;
    assert_eq!(child.parent_id, Some(root.id));

    assert_matches!(
        t.engine.stock.create_location("Orphan", Some(999)).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        t.engine.stock.create_location("  ", None).await,
        Err(ServiceError::ValidationError(_))
    );
}
