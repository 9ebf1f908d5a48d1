use super::validation::{validate_non_negative, validate_not_blank, validate_positive};
use crate::{
    db::{self, DbPool},
    entities::{
        inventory_item::{self, Entity as InventoryItemEntity, Model as InventoryItemModel},
        inventory_movement::{self, Entity as MovementEntity, Model as MovementModel},
        product::{self, Entity as ProductEntity},
        MovementDirection, MovementReason, StockStatus, StockUnit,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Register a stock record for a product that has none yet.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewInventoryItem {
    pub product_id: Uuid,
    #[validate(custom = "validate_non_negative")]
    pub initial_quantity: Decimal,
    pub unit: StockUnit,
    #[validate(custom = "validate_non_negative")]
    pub min_threshold: Decimal,
}

/// Direct edit of a stock record. The quantity is absolute, not a delta.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InventoryAdjustment {
    #[validate(custom = "validate_non_negative")]
    pub new_quantity: Decimal,
    pub unit: StockUnit,
    #[validate(custom = "validate_non_negative")]
    pub min_threshold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MovementDraft {
    pub direction: MovementDirection,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    /// Defaults to now.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    pub reason: MovementReason,
    /// Omitted rather than blank.
    #[validate(length(max = 500), custom = "validate_not_blank")]
    pub notes: Option<String>,
}

/// Stock record joined with its product, as listed on the inventory screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit: StockUnit,
    pub min_threshold: Decimal,
    pub status: StockStatus,
    pub updated_at: DateTime<Utc>,
}

impl StockItemView {
    fn from_parts(item: InventoryItemModel, product: Option<product::Model>) -> Self {
        let status = item.stock_status();
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: product.map(|p| p.name).unwrap_or_default(),
            quantity: item.quantity,
            unit: item.unit,
            min_threshold: item.min_threshold,
            status,
            updated_at: item.updated_at,
        }
    }
}

/// A ledger row together with the stock record as it stands after it.
#[derive(Debug, Clone)]
pub(crate) struct AppliedMovement {
    pub movement: MovementModel,
    pub item: InventoryItemModel,
}

impl AppliedMovement {
    pub(crate) fn events(&self) -> Vec<Event> {
        let mut events = vec![Event::StockMovementRecorded {
            item_id: self.item.id,
            movement_id: self.movement.id,
            new_quantity: self.item.quantity,
        }];
        if self.item.stock_status().needs_attention() {
            events.push(Event::LowStock {
                item_id: self.item.id,
                product_id: self.item.product_id,
                quantity: self.item.quantity,
                min_threshold: self.item.min_threshold,
            });
        }
        events
    }
}

/// Every stock record joined with its product name, optionally narrowed to
/// names containing `name_filter` (case-insensitive).
pub(crate) async fn load_stock_views<C: ConnectionTrait>(
    conn: &C,
    name_filter: Option<&str>,
) -> Result<Vec<StockItemView>, DbErr> {
    let needle = name_filter
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty());

    let rows = InventoryItemEntity::find()
        .find_also_related(ProductEntity)
        .order_by_asc(product::Column::Name)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(item, product)| StockItemView::from_parts(item, product))
        .filter(|view| match &needle {
            Some(needle) => view.product_name.to_lowercase().contains(needle),
            None => true,
        })
        .collect())
}

pub(crate) async fn find_by_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Option<(InventoryItemModel, Option<product::Model>)>, DbErr> {
    InventoryItemEntity::find()
        .filter(inventory_item::Column::ProductId.eq(product_id))
        .find_also_related(ProductEntity)
        .one(conn)
        .await
}

async fn insert_movement<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    direction: MovementDirection,
    quantity: Decimal,
    date: DateTime<Utc>,
    reason: MovementReason,
    notes: Option<String>,
) -> Result<MovementModel, ServiceError> {
    let movement = inventory_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        inventory_item_id: Set(item_id),
        direction: Set(direction),
        quantity: Set(quantity),
        date: Set(date),
        reason: Set(reason),
        notes: Set(notes),
        ..Default::default()
    };

    let movement = movement.insert(conn).await.map_err(|e| {
        error!(error = %e, item_id = %item_id, "Failed to insert inventory movement");
        ServiceError::DatabaseError(e)
    })?;

    counter!(
        "comanda_inventory.movements_recorded",
        1,
        "direction" => direction.to_string()
    );
    Ok(movement)
}

/// Appends a movement and applies it to the on-hand quantity in the same
/// unit of work. Does not check for negative results.
pub(crate) async fn append_movement<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    draft: MovementDraft,
) -> Result<AppliedMovement, ServiceError> {
    let date = draft.date.unwrap_or_else(Utc::now);
    let movement = insert_movement(
        conn,
        item_id,
        draft.direction,
        draft.quantity,
        date,
        draft.reason,
        draft.notes,
    )
    .await?;

    let quantity = Expr::col(inventory_item::Column::Quantity);
    let new_quantity = match draft.direction {
        MovementDirection::In => quantity.add(draft.quantity),
        MovementDirection::Out => quantity.sub(draft.quantity),
    };

    InventoryItemEntity::update_many()
        .col_expr(inventory_item::Column::Quantity, new_quantity)
        .col_expr(inventory_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_item::Column::Id.eq(item_id))
        .exec(conn)
        .await
        .map_err(|e| {
            error!(error = %e, item_id = %item_id, "Failed to apply movement to stock quantity");
            ServiceError::DatabaseError(e)
        })?;

    let item = InventoryItemEntity::find_by_id(item_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Inventory item {} not found", item_id)))?;

    Ok(AppliedMovement { movement, item })
}

/// Inventory ledger: current stock per product plus its movement history.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(event_sender) = &self.event_sender {
            for event in events {
                event_sender.send_or_log(event).await;
            }
        }
    }

    /// All stock records with their derived status.
    #[instrument(skip(self))]
    pub async fn get_items(&self) -> Result<Vec<StockItemView>, ServiceError> {
        load_stock_views(&*self.db_pool, None).await.map_err(|e| {
            error!(error = %e, "Failed to load inventory items");
            ServiceError::DatabaseError(e)
        })
    }

    #[instrument(skip(self))]
    pub async fn search_items(&self, term: &str) -> Result<Vec<StockItemView>, ServiceError> {
        load_stock_views(&*self.db_pool, Some(term))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to search inventory items");
                ServiceError::DatabaseError(e)
            })
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn get_item(&self, item_id: Uuid) -> Result<Option<StockItemView>, ServiceError> {
        let row = InventoryItemEntity::find_by_id(item_id)
            .find_also_related(ProductEntity)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, item_id = %item_id, "Failed to fetch inventory item");
                ServiceError::DatabaseError(e)
            })?;
        Ok(row.map(|(item, product)| StockItemView::from_parts(item, product)))
    }

    /// Movement history for one item, newest first.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn get_movements(&self, item_id: Uuid) -> Result<Vec<MovementModel>, ServiceError> {
        MovementEntity::find()
            .filter(inventory_movement::Column::InventoryItemId.eq(item_id))
            .order_by_desc(inventory_movement::Column::Date)
            .order_by_desc(inventory_movement::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, item_id = %item_id, "Failed to fetch inventory movements");
                ServiceError::DatabaseError(e)
            })
    }

    /// Items whose derived status is low or out-of-stock.
    #[instrument(skip(self))]
    pub async fn low_stock_items(&self) -> Result<Vec<StockItemView>, ServiceError> {
        Ok(self
            .get_items()
            .await?
            .into_iter()
            .filter(|view| view.status.needs_attention())
            .collect())
    }

    pub async fn stock_alerts_count(&self) -> Result<usize, ServiceError> {
        Ok(self.low_stock_items().await?.len())
    }

    /// Creates the stock record for a product. A positive initial quantity is
    /// booked as an inbound "initial stock" movement.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn register_item(&self, request: NewInventoryItem) -> Result<Uuid, ServiceError> {
        request.validate()?;

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let product = ProductEntity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", request.product_id))
            })?;

        if find_by_product(&txn, request.product_id).await?.is_some() {
            warn!(product_id = %request.product_id, "Product already has a stock record");
            return Err(ServiceError::Conflict(format!(
                "{} already has a stock record",
                product.name
            )));
        }

        let item_id = Uuid::new_v4();
        let item = inventory_item::ActiveModel {
            id: Set(item_id),
            product_id: Set(request.product_id),
            quantity: Set(Decimal::ZERO),
            unit: Set(request.unit),
            min_threshold: Set(request.min_threshold),
            ..Default::default()
        };
        item.insert(&txn).await.map_err(|e| {
            error!(error = %e, product_id = %request.product_id, "Failed to create inventory item");
            ServiceError::DatabaseError(e)
        })?;

        let mut events = Vec::new();
        if request.initial_quantity > Decimal::ZERO {
            let applied = append_movement(
                &txn,
                item_id,
                MovementDraft {
                    direction: MovementDirection::In,
                    quantity: request.initial_quantity,
                    date: None,
                    reason: MovementReason::InitialStock,
                    notes: None,
                },
            )
            .await?;
            events.extend(applied.events());
        }

        db::commit(txn, started).await?;

        info!(item_id = %item_id, product_id = %request.product_id, "Inventory item registered");
        self.publish(events).await;
        Ok(item_id)
    }

    /// Overwrites quantity, unit and threshold. A changed quantity is
    /// reconciled into exactly one "stock adjustment" movement.
    #[instrument(skip(self, request), fields(item_id = %item_id))]
    pub async fn adjust_item(
        &self,
        item_id: Uuid,
        request: InventoryAdjustment,
    ) -> Result<Option<InventoryItemModel>, ServiceError> {
        request.validate()?;

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let Some(current) = InventoryItemEntity::find_by_id(item_id).one(&txn).await? else {
            warn!(item_id = %item_id, "Inventory item not found; nothing to adjust");
            return Ok(None);
        };

        let old_quantity = current.quantity;
        let delta = request.new_quantity - old_quantity;

        let mut item: inventory_item::ActiveModel = current.into();
        item.quantity = Set(request.new_quantity);
        item.unit = Set(request.unit);
        item.min_threshold = Set(request.min_threshold);
        let item = item.update(&txn).await.map_err(|e| {
            error!(error = %e, item_id = %item_id, "Failed to update inventory item");
            ServiceError::DatabaseError(e)
        })?;

        let mut movement = None;
        if !delta.is_zero() {
            let direction = if delta > Decimal::ZERO {
                MovementDirection::In
            } else {
                MovementDirection::Out
            };
            movement = Some(
                insert_movement(
                    &txn,
                    item_id,
                    direction,
                    delta.abs(),
                    Utc::now(),
                    MovementReason::StockAdjustment,
                    Some(format!(
                        "Adjusted from {} to {}",
                        old_quantity, request.new_quantity
                    )),
                )
                .await?,
            );
        }

        db::commit(txn, started).await?;

        info!(
            item_id = %item_id,
            old_quantity = %old_quantity,
            new_quantity = %item.quantity,
            "Inventory item adjusted"
        );

        if let Some(movement) = movement {
            let applied = AppliedMovement {
                movement,
                item: item.clone(),
            };
            self.publish(applied.events()).await;
        }

        Ok(Some(item))
    }

    /// Appends a movement and applies it to the on-hand quantity.
    #[instrument(skip(self, draft), fields(item_id = %item_id))]
    pub async fn record_movement(
        &self,
        item_id: Uuid,
        draft: MovementDraft,
    ) -> Result<Uuid, ServiceError> {
        draft.validate()?;

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        if InventoryItemEntity::find_by_id(item_id)
            .one(&txn)
            .await?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Inventory item {} not found",
                item_id
            )));
        }

        let applied = append_movement(&txn, item_id, draft).await?;
        db::commit(txn, started).await?;

        info!(
            item_id = %item_id,
            movement_id = %applied.movement.id,
            direction = %applied.movement.direction,
            quantity = %applied.movement.quantity,
            "Inventory movement recorded"
        );
        self.publish(applied.events()).await;
        Ok(applied.movement.id)
    }

    /// Outbound movement entered by hand. Refuses to take more than is on
    /// hand.
    #[instrument(skip(self, notes), fields(item_id = %item_id))]
    pub async fn record_manual_exit(
        &self,
        item_id: Uuid,
        quantity: Decimal,
        reason: MovementReason,
        notes: Option<String>,
    ) -> Result<Uuid, ServiceError> {
        let draft = MovementDraft {
            direction: MovementDirection::Out,
            quantity,
            date: None,
            reason,
            notes,
        };
        draft.validate()?;

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let item = InventoryItemEntity::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Inventory item {} not found", item_id)))?;

        if MovementDirection::Out.apply(item.quantity, quantity) < Decimal::ZERO {
            warn!(
                item_id = %item_id,
                requested = %quantity,
                available = %item.quantity,
                "Manual exit exceeds stock on hand"
            );
            return Err(ServiceError::InsufficientStock(format!(
                "Requested {} {}, only {} available",
                quantity, item.unit, item.quantity
            )));
        }

        let applied = append_movement(&txn, item_id, draft).await?;
        db::commit(txn, started).await?;

        info!(item_id = %item_id, quantity = %quantity, "Manual stock exit recorded");
        self.publish(applied.events()).await;
        Ok(applied.movement.id)
    }
}
