use super::inventory::{load_stock_views, StockItemView};
use crate::{
    db::DbPool,
    entities::{
        customer::{self, Entity as CustomerEntity},
        inventory_item::{self, Entity as InventoryItemEntity},
        product::{self, Entity as ProductEntity, Model as ProductModel},
    },
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub name: String,
}

/// Read-only lookups backing the order and inventory forms.
///
/// Every accessor degrades to an empty list when the store is unavailable;
/// callers treat that as "nothing to pick".
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn list_customers(&self) -> Vec<CustomerSummary> {
        match CustomerEntity::find()
            .order_by_asc(customer::Column::Name)
            .all(&*self.db_pool)
            .await
        {
            Ok(customers) => customers
                .into_iter()
                .map(|c| CustomerSummary {
                    id: c.id,
                    name: c.name,
                })
                .collect(),
            Err(e) => {
                error!(error = %e, "Failed to fetch customers");
                Vec::new()
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn list_active_products(&self) -> Vec<ProductModel> {
        ProductEntity::find()
            .filter(product::Column::Active.eq(true))
            .order_by_asc(product::Column::Name)
            .all(&*self.db_pool)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to fetch active products");
                Vec::new()
            })
    }

    /// Stock records joined with product names.
    #[instrument(skip(self))]
    pub async fn list_inventory_overview(&self) -> Vec<StockItemView> {
        load_stock_views(&*self.db_pool, None)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to fetch inventory overview");
                Vec::new()
            })
    }

    /// Products that do not have a stock record yet, i.e. the ones a new
    /// stock record may be registered for.
    #[instrument(skip(self))]
    pub async fn list_products_without_inventory(&self) -> Vec<ProductModel> {
        let db = &*self.db_pool;

        let stocked: Vec<Uuid> = match InventoryItemEntity::find()
            .select_only()
            .column(inventory_item::Column::ProductId)
            .into_tuple()
            .all(db)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to fetch stocked products");
                return Vec::new();
            }
        };
        let stocked: HashSet<Uuid> = stocked.into_iter().collect();

        match ProductEntity::find()
            .order_by_asc(product::Column::Name)
            .all(db)
            .await
        {
            Ok(products) => products
                .into_iter()
                .filter(|p| !stocked.contains(&p.id))
                .collect(),
            Err(e) => {
                error!(error = %e, "Failed to fetch products");
                Vec::new()
            }
        }
    }
}
