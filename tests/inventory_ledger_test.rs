mod common;

use chrono::{Duration, Utc};
use comanda::{
    entities::{MovementDirection, MovementReason, StockStatus, StockUnit},
    errors::ServiceError,
    events::Event,
    services::inventory::{InventoryAdjustment, MovementDraft, NewInventoryItem},
};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn movement(direction: MovementDirection, quantity: Decimal) -> MovementDraft {
    MovementDraft {
        direction,
        quantity,
        date: None,
        reason: MovementReason::Purchase,
        notes: None,
    }
}

#[tokio::test]
async fn register_books_initial_stock_as_a_movement() {
    let app = TestApp::new().await;
    let product = app.seed_product("Queijo").await;

    let item_id = app
        .services
        .inventory
        .register_item(NewInventoryItem {
            product_id: product.id,
            initial_quantity: dec!(12.5),
            unit: StockUnit::Kg,
            min_threshold: dec!(2),
        })
        .await
        .expect("register item");

    let item = app.services.inventory.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.product_name, "Queijo");
    assert_eq!(item.quantity, dec!(12.5));
    assert_eq!(item.unit, StockUnit::Kg);
    assert_eq!(item.status, StockStatus::Normal);

    let movements = app.services.inventory.get_movements(item_id).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].direction, MovementDirection::In);
    assert_eq!(movements[0].quantity, dec!(12.5));
    assert_eq!(movements[0].reason, MovementReason::InitialStock);
}

#[tokio::test]
async fn register_with_zero_quantity_has_no_movement() {
    let app = TestApp::new().await;
    let product = app.seed_product("Presunto").await;

    let item_id = app.seed_stock(product.id, Decimal::ZERO, dec!(1)).await;

    assert!(app.services.inventory.get_movements(item_id).await.unwrap().is_empty());
    let item = app.services.inventory.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, StockStatus::OutOfStock);
}

#[tokio::test]
async fn second_record_for_a_product_conflicts() {
    let app = TestApp::new().await;
    let product = app.seed_product("Farinha").await;
    app.seed_stock(product.id, dec!(5), dec!(1)).await;

    let err = app
        .services
        .inventory
        .register_item(NewInventoryItem {
            product_id: product.id,
            initial_quantity: dec!(1),
            unit: StockUnit::Kg,
            min_threshold: dec!(1),
        })
        .await
        .expect_err("duplicate record");
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn register_rejects_unknown_product_and_negative_values() {
    let app = TestApp::new().await;

    let missing = app
        .services
        .inventory
        .register_item(NewInventoryItem {
            product_id: Uuid::new_v4(),
            initial_quantity: dec!(1),
            unit: StockUnit::Un,
            min_threshold: dec!(1),
        })
        .await
        .expect_err("unknown product");
    assert!(matches!(missing, ServiceError::NotFound(_)));

    let product = app.seed_product("Ovo").await;
    let negative = app
        .services
        .inventory
        .register_item(NewInventoryItem {
            product_id: product.id,
            initial_quantity: dec!(-1),
            unit: StockUnit::Un,
            min_threshold: dec!(1),
        })
        .await
        .expect_err("negative quantity");
    assert!(matches!(negative, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn on_hand_matches_the_movement_ledger() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tomate").await;
    let item_id = app.seed_stock(product.id, dec!(10), dec!(2)).await;

    let steps = [
        (MovementDirection::In, dec!(4)),
        (MovementDirection::Out, dec!(3.5)),
        (MovementDirection::Out, dec!(1)),
        (MovementDirection::In, dec!(0.25)),
    ];
    for (direction, quantity) in steps {
        app.services
            .inventory
            .record_movement(item_id, movement(direction, quantity))
            .await
            .expect("record movement");
    }

    let item = app.services.inventory.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.quantity, dec!(9.75));

    let ledger: Decimal = app
        .services
        .inventory
        .get_movements(item_id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.direction.apply(Decimal::ZERO, m.quantity))
        .sum();
    assert_eq!(ledger, item.quantity);
}

#[tokio::test]
async fn movements_are_listed_newest_first() {
    let app = TestApp::new().await;
    let product = app.seed_product("Alface").await;
    let item_id = app.seed_stock(product.id, Decimal::ZERO, dec!(1)).await;

    let mut older = movement(MovementDirection::In, dec!(1));
    older.date = Some(Utc::now() - Duration::days(2));
    let older_id = app.services.inventory.record_movement(item_id, older).await.unwrap();

    let newer_id = app
        .services
        .inventory
        .record_movement(item_id, movement(MovementDirection::In, dec!(2)))
        .await
        .unwrap();

    let ids: Vec<Uuid> = app
        .services
        .inventory
        .get_movements(item_id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![newer_id, older_id]);
}

#[tokio::test]
async fn movement_quantity_must_be_positive() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cebola").await;
    let item_id = app.seed_stock(product.id, dec!(3), dec!(1)).await;

    let err = app
        .services
        .inventory
        .record_movement(item_id, movement(MovementDirection::In, Decimal::ZERO))
        .await
        .expect_err("zero quantity");
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let mut blank = movement(MovementDirection::In, dec!(1));
    blank.notes = Some("   ".to_string());
    let err = app
        .services
        .inventory
        .record_movement(item_id, blank)
        .await
        .expect_err("blank notes");
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let missing = app
        .services
        .inventory
        .record_movement(Uuid::new_v4(), movement(MovementDirection::In, dec!(1)))
        .await
        .expect_err("unknown item");
    assert!(matches!(missing, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn adjustment_reconciles_with_one_movement() {
    let app = TestApp::new().await;
    let product = app.seed_product("Leite").await;
    let item_id = app.seed_stock(product.id, dec!(10), dec!(2)).await;

    let adjusted = app
        .services
        .inventory
        .adjust_item(
            item_id,
            InventoryAdjustment {
                new_quantity: dec!(6),
                unit: StockUnit::L,
                min_threshold: dec!(3),
            },
        )
        .await
        .unwrap()
        .expect("item exists");
    assert_eq!(adjusted.quantity, dec!(6));
    assert_eq!(adjusted.unit, StockUnit::L);

    let movements = app.services.inventory.get_movements(item_id).await.unwrap();
    let adjustments: Vec<_> = movements
        .iter()
        .filter(|m| m.reason == MovementReason::StockAdjustment)
        .collect();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0].direction, MovementDirection::Out);
    assert_eq!(adjustments[0].quantity, dec!(4));

    // Same quantity, new threshold: no movement.
    app.services
        .inventory
        .adjust_item(
            item_id,
            InventoryAdjustment {
                new_quantity: dec!(6),
                unit: StockUnit::L,
                min_threshold: dec!(1),
            },
        )
        .await
        .unwrap();
    let after = app.services.inventory.get_movements(item_id).await.unwrap();
    assert_eq!(after.len(), movements.len());

    let missing = app
        .services
        .inventory
        .adjust_item(
            Uuid::new_v4(),
            InventoryAdjustment {
                new_quantity: dec!(1),
                unit: StockUnit::Un,
                min_threshold: dec!(0),
            },
        )
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn manual_exit_cannot_exceed_stock() {
    let mut app = TestApp::new().await;
    let product = app.seed_product("Carne").await;
    let item_id = app.seed_stock(product.id, dec!(5), dec!(2)).await;
    app.drain_events();

    let err = app
        .services
        .inventory
        .record_manual_exit(item_id, dec!(6), MovementReason::Loss, None)
        .await
        .expect_err("more than on hand");
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    let movement_id = app
        .services
        .inventory
        .record_manual_exit(
            item_id,
            dec!(4),
            MovementReason::Consumption,
            Some("staff meal".to_string()),
        )
        .await
        .expect("within stock");

    let item = app.services.inventory.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.quantity, dec!(1));
    assert_eq!(item.status, StockStatus::Low);

    let events = app.drain_events();
    assert_eq!(
        events,
        vec![
            Event::StockMovementRecorded {
                item_id,
                movement_id,
                new_quantity: dec!(1),
            },
            Event::LowStock {
                item_id,
                product_id: product.id,
                quantity: dec!(1),
                min_threshold: dec!(2),
            },
        ]
    );
}

#[tokio::test]
async fn search_and_alerts() {
    let app = TestApp::new().await;
    let bacon = app.seed_product("Bacon").await;
    let pao = app.seed_product("Pão de hambúrguer").await;
    let molho = app.seed_product("Molho especial").await;
    app.seed_stock(bacon.id, dec!(1), dec!(2)).await;
    app.seed_stock(pao.id, dec!(50), dec!(10)).await;
    app.seed_stock(molho.id, Decimal::ZERO, dec!(1)).await;

    let found = app.services.inventory.search_items("BACON").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].product_id, bacon.id);

    let all = app.services.inventory.get_items().await.unwrap();
    let names: Vec<&str> = all.iter().map(|i| i.product_name.as_str()).collect();
    assert_eq!(names, vec!["Bacon", "Molho especial", "Pão de hambúrguer"]);

    let low: Vec<Uuid> = app
        .services
        .inventory
        .low_stock_items()
        .await
        .unwrap()
        .iter()
        .map(|i| i.product_id)
        .collect();
    assert_eq!(low, vec![bacon.id, molho.id]);
    assert_eq!(app.services.inventory.stock_alerts_count().await.unwrap(), 2);
}
