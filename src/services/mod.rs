pub mod catalog;
pub mod deliveries;
pub mod inventory;
pub mod orders;
pub mod status_sync;
mod validation;

use crate::{db::DbPool, events::EventSender};
use std::sync::Arc;

/// All services over one pool and one event channel.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<orders::OrderService>,
    pub inventory: Arc<inventory::InventoryService>,
    pub deliveries: Arc<deliveries::DeliveryService>,
    pub catalog: Arc<catalog::CatalogService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            orders: Arc::new(orders::OrderService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            inventory: Arc::new(inventory::InventoryService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            deliveries: Arc::new(deliveries::DeliveryService::new(
                db_pool.clone(),
                event_sender,
            )),
            catalog: Arc::new(catalog::CatalogService::new(db_pool)),
        }
    }
}
