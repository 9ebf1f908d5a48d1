mod common;

use comanda::{db, entities::StockStatus};
use common::TestApp;
use rust_decimal_macros::dec;

#[tokio::test]
async fn lookups_are_sorted_and_filtered() {
    let app = TestApp::new().await;
    app.seed_customer("Zilda").await;
    app.seed_customer("Bruno").await;
    let suco = app.seed_product("Suco").await;
    let agua = app.seed_product("Água").await;
    app.seed_product_with("Esfiha (sazonal)", false).await;
    let bolo = app.seed_product("Bolo").await;
    app.seed_stock(bolo.id, dec!(3), dec!(5)).await;

    let customers: Vec<String> = app
        .services
        .catalog
        .list_customers()
        .await
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(customers, vec!["Bruno".to_string(), "Zilda".to_string()]);

    let active: Vec<_> = app
        .services
        .catalog
        .list_active_products()
        .await
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(active.len(), 3);
    assert!(active.contains(&suco.id));
    assert!(active.contains(&agua.id));

    let overview = app.services.catalog.list_inventory_overview().await;
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0].product_name, "Bolo");
    assert_eq!(overview[0].status, StockStatus::Low);

    let unstocked = app.services.catalog.list_products_without_inventory().await;
    assert_eq!(unstocked.len(), 3);
    assert!(unstocked.iter().all(|p| p.id != bolo.id));
}

#[tokio::test]
async fn lookups_degrade_to_empty_when_the_store_is_gone() {
    let app = TestApp::new().await;
    app.seed_customer("Bruno").await;

    db::close_pool((*app.db).clone()).await.unwrap();

    assert!(app.services.catalog.list_customers().await.is_empty());
    assert!(app.services.catalog.list_active_products().await.is_empty());
    assert!(app.services.catalog.list_inventory_overview().await.is_empty());
    assert!(app
        .services
        .catalog
        .list_products_without_inventory()
        .await
        .is_empty());
}
