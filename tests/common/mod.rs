#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use comanda::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{customer, employee, product, StockUnit},
    events::{Event, EventSender},
    services::{inventory::NewInventoryItem, AppServices},
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Services over a fresh, migrated in-memory SQLite database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    events: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        // An in-memory database lives as long as its connection, so the pool
        // is pinned to exactly one.
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to set up test database");
        let db = Arc::new(pool);

        let (sender, events) = EventSender::channel(1024);
        let services = AppServices::new(db.clone(), Some(Arc::new(sender)));

        Self {
            db,
            services,
            events,
        }
    }

    /// Everything published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn seed_customer(&self, name: &str) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            phone: Set(None),
            address: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed customer")
    }

    pub async fn seed_product(&self, name: &str) -> product::Model {
        self.seed_product_with(name, true).await
    }

    pub async fn seed_product_with(&self, name: &str, active: bool) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            category: Set(Some("lanches".to_string())),
            ingredients: Set(None),
            active: Set(active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed product")
    }

    pub async fn seed_employee(&self, name: &str, role: &str, active: bool) -> employee::Model {
        employee::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            role: Set(role.to_string()),
            active: Set(active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed employee")
    }

    pub async fn seed_courier(&self, name: &str) -> employee::Model {
        self.seed_employee(name, employee::DELIVERER_ROLE, true).await
    }

    /// Registers a stock record through the ledger, so the initial quantity
    /// is backed by a movement.
    pub async fn seed_stock(&self, product_id: Uuid, quantity: Decimal, min_threshold: Decimal) -> Uuid {
        self.services
            .inventory
            .register_item(NewInventoryItem {
                product_id,
                initial_quantity: quantity,
                unit: StockUnit::Un,
                min_threshold,
            })
            .await
            .expect("failed to seed stock")
    }
}
