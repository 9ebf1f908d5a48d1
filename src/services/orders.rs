use super::{
    deliveries::{self, DeliveryChange},
    inventory::{self, AppliedMovement, MovementDraft},
    status_sync,
    validation::validate_non_negative,
};
use crate::{
    db::{self, DbPool},
    entities::{
        customer::{self, Entity as CustomerEntity},
        delivery::{Entity as DeliveryEntity, Model as DeliveryModel},
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity},
        product::Entity as ProductEntity,
        DeliveryStatus, MovementDirection, MovementReason, OrderKind, OrderStatus, PaymentMethod,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineDraft {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Entered per line; the catalog keeps no prices.
    #[validate(custom = "validate_non_negative")]
    pub unit_price: Decimal,
}

impl OrderLineDraft {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// The order form as submitted.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderDraft {
    pub customer_id: Uuid,
    /// Order date; defaults to now.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub kind: OrderKind,
    #[serde(default = "default_status")]
    pub status: OrderStatus,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub discount: Decimal,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderLineDraft>,
}

fn default_status() -> OrderStatus {
    OrderStatus::Pending
}

impl OrderDraft {
    fn check(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if self.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "An order needs at least one item".to_string(),
            ));
        }
        for item in &self.items {
            item.validate()?;
        }
        if self.status == OrderStatus::EnRoute && self.kind != OrderKind::Delivery {
            return Err(ServiceError::InvalidStatus(
                "Only delivery orders can be en route".to_string(),
            ));
        }
        Ok(())
    }

    pub fn totals(&self) -> OrderTotals {
        OrderTotals::compute(&self.items, self.discount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    /// Clamped to `[0, subtotal]`.
    pub discount: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    pub fn compute(lines: &[OrderLineDraft], discount: Decimal) -> Self {
        let subtotal: Decimal = lines.iter().map(OrderLineDraft::subtotal).sum();
        let discount = discount.max(Decimal::ZERO).min(subtotal);
        Self {
            subtotal,
            discount,
            total: (subtotal - discount).max(Decimal::ZERO),
        }
    }
}

/// Forward moves along pending → preparing → ready → en-route → delivered,
/// skips allowed, plus cancel from any open status. En route is for delivery
/// orders only. Staying put is always allowed.
pub fn is_valid_transition(kind: OrderKind, from: OrderStatus, to: OrderStatus) -> bool {
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    if to == OrderStatus::EnRoute && kind != OrderKind::Delivery {
        return false;
    }
    match (from.stage(), to.stage()) {
        (Some(_), None) => true,
        (Some(from), Some(to)) => to > from,
        (None, _) => false,
    }
}

/// Whether the order form may still be opened for editing.
pub fn is_editable(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Pending | OrderStatus::Preparing)
}

fn ensure_transition(order: &OrderModel, to: OrderStatus) -> Result<(), ServiceError> {
    if is_valid_transition(order.kind, order.status, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "Order {} cannot move from {} to {}",
            order.id, order.status, to
        )))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    /// Inclusive.
    pub date_from: Option<NaiveDate>,
    /// Inclusive.
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive match against the customer name.
    pub customer: Option<String>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn today() -> Self {
        let today = Utc::now().date_naive();
        Self {
            date_from: Some(today),
            date_to: Some(today),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub created_at: DateTime<Utc>,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineView {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub created_at: DateTime<Utc>,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderLineView>,
}

/// What a status-changing write did besides saving the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdateOutcome {
    pub order: OrderModel,
    pub previous_status: OrderStatus,
    /// Stock movements booked by fulfillment.
    pub movements: Vec<Uuid>,
    /// Delivery created or synchronized, if any.
    pub delivery: Option<DeliveryModel>,
    /// Soft problems, e.g. a product with no stock record to deduct from.
    pub warnings: Vec<String>,
}

struct Deduction {
    item_id: Uuid,
    quantity: i32,
}

#[derive(Default)]
struct DeductionPlan {
    lines: Vec<Deduction>,
    warnings: Vec<String>,
}

#[derive(Default)]
struct SideEffects {
    movements: Vec<AppliedMovement>,
    deliveries: Vec<DeliveryChange>,
    warnings: Vec<String>,
}

impl SideEffects {
    fn outcome(&self, order: OrderModel, previous_status: OrderStatus) -> OrderUpdateOutcome {
        OrderUpdateOutcome {
            order,
            previous_status,
            movements: self.movements.iter().map(|m| m.movement.id).collect(),
            delivery: self.deliveries.last().map(|c| c.delivery.clone()),
            warnings: self.warnings.clone(),
        }
    }

    fn events(&self) -> Vec<Event> {
        self.movements
            .iter()
            .flat_map(AppliedMovement::events)
            .chain(self.deliveries.iter().map(DeliveryChange::event))
            .collect()
    }
}

fn needs_deduction(previous: OrderStatus, next: OrderStatus) -> bool {
    next == OrderStatus::Delivered && previous != OrderStatus::Delivered
}

async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    Ok(OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?
        .into_iter()
        .map(|line| (line.product_id, line.quantity))
        .collect())
}

/// Checks every line against stock before anything is written. A product
/// without a stock record is a warning; a shortfall fails the whole plan.
async fn plan_deduction<C: ConnectionTrait>(
    conn: &C,
    lines: &[(Uuid, i32)],
) -> Result<DeductionPlan, ServiceError> {
    let mut requested: HashMap<Uuid, i64> = HashMap::new();
    for (product_id, quantity) in lines {
        *requested.entry(*product_id).or_default() += i64::from(*quantity);
    }

    let mut plan = DeductionPlan::default();
    let mut checked: HashMap<Uuid, Option<Uuid>> = HashMap::new();

    for (product_id, quantity) in lines {
        if !checked.contains_key(product_id) {
            let stock = match inventory::find_by_product(conn, *product_id).await? {
                None => {
                    warn!(product_id = %product_id, "No stock record for product; skipping deduction");
                    plan.warnings.push(format!(
                        "Product {} has no stock record; deduct it manually",
                        product_id
                    ));
                    None
                }
                Some((item, product)) => {
                    let needed = Decimal::from(requested[product_id]);
                    if needed > item.quantity {
                        let name = product.map(|p| p.name).unwrap_or_else(|| product_id.to_string());
                        warn!(
                            product_id = %product_id,
                            requested = %needed,
                            available = %item.quantity,
                            "Insufficient stock for fulfillment"
                        );
                        return Err(ServiceError::InsufficientStock(format!(
                            "{}: {} requested, {} {} available",
                            name, needed, item.quantity, item.unit
                        )));
                    }
                    Some(item.id)
                }
            };
            checked.insert(*product_id, stock);
        }

        if let Some(Some(item_id)) = checked.get(product_id) {
            plan.lines.push(Deduction {
                item_id: *item_id,
                quantity: *quantity,
            });
        }
    }

    Ok(plan)
}

/// Fulfillment deduction, delivery sync and automatic delivery creation for
/// an order whose row has already been written inside `conn`.
async fn run_side_effects<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    previous: Option<OrderStatus>,
    plan: DeductionPlan,
) -> Result<SideEffects, ServiceError> {
    let mut effects = SideEffects {
        warnings: plan.warnings,
        ..Default::default()
    };

    for line in plan.lines {
        let applied = inventory::append_movement(
            conn,
            line.item_id,
            MovementDraft {
                direction: MovementDirection::Out,
                quantity: Decimal::from(line.quantity),
                date: None,
                reason: MovementReason::OrderFulfillment,
                notes: Some(format!("Order {}", order.id)),
            },
        )
        .await?;
        effects.movements.push(applied);
    }

    if order.kind != OrderKind::Delivery {
        return Ok(effects);
    }

    let changed = previous.map_or(false, |p| p != order.status);
    if changed {
        if let Some(target) = status_sync::delivery_status_for(order.status) {
            if let Some(active) = deliveries::find_active_for_order(conn, order.id).await? {
                if active.status != target {
                    let change = deliveries::apply_status(conn, active, target, None).await?;
                    effects.deliveries.push(change);
                }
            }
        }
    }

    let entering_ready =
        order.status == OrderStatus::Ready && previous != Some(OrderStatus::Ready);
    if entering_ready && deliveries::find_active_for_order(conn, order.id).await?.is_none() {
        match deliveries::load_couriers(conn).await?.into_iter().next() {
            Some(courier) => {
                let change = deliveries::insert_delivery(
                    conn,
                    order.id,
                    courier.id,
                    Utc::now(),
                    Some(format!("Delivery created automatically for order {}", order.id)),
                )
                .await?;
                info!(
                    order_id = %order.id,
                    courier_id = %courier.id,
                    delivery_id = %change.delivery.id,
                    "Delivery created automatically"
                );
                effects.deliveries.push(change);
            }
            None => {
                warn!(order_id = %order.id, "No courier available; delivery not created");
                effects
                    .warnings
                    .push("No courier available; assign the delivery manually".to_string());
            }
        }
    }

    Ok(effects)
}

async fn insert_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    lines: &[OrderLineDraft],
) -> Result<(), ServiceError> {
    let models = lines
        .iter()
        .enumerate()
        .map(|(position, line)| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            position: Set(position as i32),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            subtotal: Set(line.subtotal()),
        })
        .collect::<Vec<_>>();

    OrderItemEntity::insert_many(models)
        .exec_without_returning(conn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to insert order items");
            ServiceError::DatabaseError(e)
        })?;
    Ok(())
}

/// Moves an existing order to `next` and runs the side effects, all inside
/// `conn`. Only the status column is written.
async fn transition<C: ConnectionTrait>(
    conn: &C,
    order: OrderModel,
    next: OrderStatus,
) -> Result<(OrderModel, SideEffects), ServiceError> {
    ensure_transition(&order, next)?;
    let previous = order.status;

    let plan = if needs_deduction(previous, next) {
        let lines = load_lines(conn, order.id).await?;
        plan_deduction(conn, &lines).await?
    } else {
        DeductionPlan::default()
    };

    let order = if previous != next {
        let order_id = order.id;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(next);
        active.update(conn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?
    } else {
        order
    };

    let effects = run_side_effects(conn, &order, Some(previous), plan).await?;
    Ok((order, effects))
}

/// Owns orders and their line items, and drives the stock and delivery side
/// effects of status changes. Each write and its side effects share one
/// transaction.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
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

    async fn publish_outcome(
        &self,
        head: Vec<Event>,
        outcome: &OrderUpdateOutcome,
        effects: &SideEffects,
    ) {
        let mut events = head;
        if outcome.previous_status != outcome.order.status {
            events.push(Event::OrderStatusChanged {
                order_id: outcome.order.id,
                old_status: outcome.previous_status,
                new_status: outcome.order.status,
            });
            if outcome.order.status == OrderStatus::Canceled {
                events.push(Event::OrderCancelled(outcome.order.id));
            }
        }
        events.extend(effects.events());
        self.publish(events).await;
    }

    /// Persists a new order and its items. Entering ready as a delivery
    /// order assigns the first available courier.
    #[instrument(skip(self, draft), fields(customer_id = %draft.customer_id))]
    pub async fn create(&self, draft: OrderDraft) -> Result<Uuid, ServiceError> {
        draft.check()?;
        if draft.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "A new order cannot start as {}",
                draft.status
            )));
        }

        let totals = draft.totals();
        let order_id = Uuid::new_v4();
        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        if CustomerEntity::find_by_id(draft.customer_id)
            .one(&txn)
            .await?
            .is_none()
        {
            return Err(ServiceError::ValidationError(format!(
                "Customer {} does not exist",
                draft.customer_id
            )));
        }

        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(draft.customer_id),
            created_at: Set(draft.created_at.unwrap_or_else(Utc::now)),
            kind: Set(draft.kind),
            status: Set(draft.status),
            subtotal: Set(totals.subtotal),
            discount: Set(totals.discount),
            total: Set(totals.total),
            payment_method: Set(draft.payment_method),
            updated_at: Set(None),
        };

        let order = order.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;
        insert_lines(&txn, order_id, &draft.items).await?;

        let effects = run_side_effects(&txn, &order, None, DeductionPlan::default()).await?;

        db::commit(txn, started).await?;

        counter!("comanda_orders.created", 1, "kind" => order.kind.to_string());
        info!(
            order_id = %order_id,
            customer_id = %draft.customer_id,
            total = %order.total,
            "Order created successfully"
        );

        let mut events = vec![Event::OrderCreated(order_id)];
        events.extend(effects.events());
        self.publish(events).await;

        Ok(order_id)
    }

    /// Replaces the order row and its items, then runs the side effects of
    /// the status change. A stock shortfall rolls everything back.
    #[instrument(skip(self, draft), fields(order_id = %order_id))]
    pub async fn update(
        &self,
        order_id: Uuid,
        draft: OrderDraft,
    ) -> Result<Option<OrderUpdateOutcome>, ServiceError> {
        draft.check()?;
        let totals = draft.totals();
        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let Some(current) = OrderEntity::find_by_id(order_id).one(&txn).await? else {
            warn!(order_id = %order_id, "Order not found; nothing to update");
            return Ok(None);
        };

        let previous = current.status;
        if previous.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {} and can no longer be edited",
                order_id, previous
            )));
        }
        if current.kind != draft.kind
            && deliveries::find_active_for_order(&txn, order_id).await?.is_some()
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has an active delivery; cancel it before changing the order type",
                order_id
            )));
        }
        if !is_valid_transition(draft.kind, previous, draft.status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} cannot move from {} to {}",
                order_id, previous, draft.status
            )));
        }

        let plan = if needs_deduction(previous, draft.status) {
            let lines: Vec<(Uuid, i32)> = draft
                .items
                .iter()
                .map(|line| (line.product_id, line.quantity))
                .collect();
            plan_deduction(&txn, &lines).await?
        } else {
            DeductionPlan::default()
        };

        let mut active: order::ActiveModel = current.into();
        active.customer_id = Set(draft.customer_id);
        if let Some(created_at) = draft.created_at {
            active.created_at = Set(created_at);
        }
        active.kind = Set(draft.kind);
        active.status = Set(draft.status);
        active.subtotal = Set(totals.subtotal);
        active.discount = Set(totals.discount);
        active.total = Set(totals.total);
        active.payment_method = Set(draft.payment_method);
        let order = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order");
            ServiceError::DatabaseError(e)
        })?;

        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to delete order items");
                ServiceError::DatabaseError(e)
            })?;
        insert_lines(&txn, order_id, &draft.items).await?;

        let effects = run_side_effects(&txn, &order, Some(previous), plan).await?;

        db::commit(txn, started).await?;

        info!(
            order_id = %order_id,
            old_status = %previous,
            new_status = %order.status,
            movements = effects.movements.len(),
            "Order updated successfully"
        );

        let outcome = effects.outcome(order, previous);
        self.publish_outcome(vec![Event::OrderUpdated(order_id)], &outcome, &effects)
            .await;
        Ok(Some(outcome))
    }

    /// Cancels an open order and its active delivery. Stock already deducted
    /// is not returned; delivered orders cannot be canceled.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<Option<OrderUpdateOutcome>, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let Some(current) = OrderEntity::find_by_id(order_id).one(&txn).await? else {
            warn!(order_id = %order_id, "Order not found; nothing to cancel");
            return Ok(None);
        };

        if current.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is already {}",
                order_id, current.status
            )));
        }

        let previous = current.status;
        let (order, effects) = transition(&txn, current, OrderStatus::Canceled).await?;
        db::commit(txn, started).await?;

        info!(order_id = %order_id, old_status = %previous, "Order canceled");

        let outcome = effects.outcome(order, previous);
        self.publish_outcome(Vec::new(), &outcome, &effects).await;
        Ok(Some(outcome))
    }

    /// "Mark delivered" on the delivery screen: completes the delivery and
    /// moves the order to delivered, deducting stock once.
    #[instrument(skip(self), fields(delivery_id = %delivery_id))]
    pub async fn mark_delivery_completed(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<OrderUpdateOutcome>, ServiceError> {
        self.finish_delivery(delivery_id, DeliveryStatus::Completed)
            .await
    }

    /// "Cancel delivery" on the delivery screen: cancels the delivery and the
    /// order with it.
    #[instrument(skip(self), fields(delivery_id = %delivery_id))]
    pub async fn cancel_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<OrderUpdateOutcome>, ServiceError> {
        self.finish_delivery(delivery_id, DeliveryStatus::Canceled)
            .await
    }

    async fn finish_delivery(
        &self,
        delivery_id: Uuid,
        delivery_status: DeliveryStatus,
    ) -> Result<Option<OrderUpdateOutcome>, ServiceError> {
        let Some(order_status) = status_sync::order_status_for(delivery_status) else {
            return Err(ServiceError::InvalidOperation(format!(
                "{} does not drive the order status",
                delivery_status
            )));
        };

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let Some(delivery) = DeliveryEntity::find_by_id(delivery_id).one(&txn).await? else {
            warn!(delivery_id = %delivery_id, "Delivery not found; nothing to update");
            return Ok(None);
        };

        let order = OrderEntity::find_by_id(delivery.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", delivery.order_id))
            })?;
        let previous = order.status;

        let delivery_change =
            deliveries::apply_status(&txn, delivery, delivery_status, None).await?;
        let (order, mut effects) = transition(&txn, order, order_status).await?;
        effects.deliveries.insert(0, delivery_change);

        db::commit(txn, started).await?;

        info!(
            delivery_id = %delivery_id,
            order_id = %order.id,
            order_status = %order.status,
            "Delivery finished"
        );

        let outcome = effects.outcome(order, previous);
        self.publish_outcome(Vec::new(), &outcome, &effects).await;
        Ok(Some(outcome))
    }

    /// Order with customer name and items in submission order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get(&self, order_id: Uuid) -> Result<Option<OrderView>, ServiceError> {
        let db = &*self.db_pool;

        let Some((order, customer)) = OrderEntity::find_by_id(order_id)
            .find_also_related(CustomerEntity)
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order from database");
                ServiceError::DatabaseError(e)
            })?
        else {
            info!(order_id = %order_id, "Order not found");
            return Ok(None);
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .find_also_related(ProductEntity)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order items");
                ServiceError::DatabaseError(e)
            })?
            .into_iter()
            .map(|(line, product)| OrderLineView {
                product_id: line.product_id,
                product_name: product.map(|p| p.name).unwrap_or_default(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal: line.subtotal,
            })
            .collect();

        Ok(Some(OrderView {
            id: order.id,
            customer_id: order.customer_id,
            customer_name: customer.map(|c| c.name).unwrap_or_default(),
            created_at: order.created_at,
            kind: order.kind,
            status: order.status,
            subtotal: order.subtotal,
            discount: order.discount,
            total: order.total,
            payment_method: order.payment_method,
            updated_at: order.updated_at,
            items,
        }))
    }

    /// Orders newest first, narrowed by `filter`.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: OrderFilter) -> Result<Vec<OrderSummary>, ServiceError> {
        let mut query = OrderEntity::find().find_also_related(CustomerEntity);

        if let Some(from) = filter.date_from {
            query = query.filter(order::Column::CreatedAt.gte(start_of_day(from)));
        }
        if let Some(next_day) = filter.date_to.and_then(|to| to.checked_add_days(Days::new(1))) {
            query = query.filter(order::Column::CreatedAt.lt(start_of_day(next_day)));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let rows = query
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list orders");
                ServiceError::DatabaseError(e)
            })?;

        let needle = filter
            .customer
            .as_deref()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty());

        Ok(rows
            .into_iter()
            .map(|(order, customer): (OrderModel, Option<customer::Model>)| OrderSummary {
                id: order.id,
                customer_id: order.customer_id,
                customer_name: customer.map(|c| c.name).unwrap_or_default(),
                created_at: order.created_at,
                kind: order.kind,
                status: order.status,
                total: order.total,
                payment_method: order.payment_method,
            })
            .filter(|summary| match &needle {
                Some(needle) => summary.customer_name.to_lowercase().contains(needle),
                None => true,
            })
            .collect())
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(quantity: i32, unit_price: Decimal) -> OrderLineDraft {
        OrderLineDraft {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn totals_subtract_discount() {
        let totals = OrderTotals::compute(&[line(3, dec!(10)), line(1, dec!(5))], dec!(5));
        assert_eq!(totals.subtotal, dec!(35));
        assert_eq!(totals.discount, dec!(5));
        assert_eq!(totals.total, dec!(30));
    }

    #[test]
    fn discount_is_clamped_to_subtotal() {
        let totals = OrderTotals::compute(&[line(2, dec!(4.50))], dec!(20));
        assert_eq!(totals.subtotal, dec!(9));
        assert_eq!(totals.discount, dec!(9));
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[test]
    fn forward_transitions_only() {
        use OrderStatus::*;
        let kind = OrderKind::Delivery;
        assert!(is_valid_transition(kind, Pending, Preparing));
        assert!(is_valid_transition(kind, Pending, Delivered));
        assert!(is_valid_transition(kind, Ready, EnRoute));
        assert!(is_valid_transition(kind, EnRoute, Canceled));
        assert!(is_valid_transition(kind, Ready, Ready));
        assert!(!is_valid_transition(kind, Ready, Pending));
        assert!(!is_valid_transition(kind, Delivered, Canceled));
        assert!(!is_valid_transition(kind, Canceled, Pending));
    }

    #[test]
    fn en_route_requires_delivery_kind() {
        assert!(!is_valid_transition(
            OrderKind::InStore,
            OrderStatus::Ready,
            OrderStatus::EnRoute
        ));
        assert!(is_valid_transition(
            OrderKind::InStore,
            OrderStatus::Ready,
            OrderStatus::Delivered
        ));
    }

    #[test]
    fn editable_statuses() {
        assert!(is_editable(OrderStatus::Pending));
        assert!(is_editable(OrderStatus::Preparing));
        assert!(!is_editable(OrderStatus::Ready));
        assert!(!is_editable(OrderStatus::Delivered));
    }

    #[test]
    fn draft_requires_items() {
        let draft = OrderDraft {
            customer_id: Uuid::new_v4(),
            created_at: None,
            kind: OrderKind::InStore,
            status: OrderStatus::Pending,
            discount: Decimal::ZERO,
            payment_method: PaymentMethod::Cash,
            items: Vec::new(),
        };
        assert!(matches!(draft.check(), Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn draft_rejects_zero_quantity() {
        let draft = OrderDraft {
            customer_id: Uuid::new_v4(),
            created_at: None,
            kind: OrderKind::InStore,
            status: OrderStatus::Pending,
            discount: Decimal::ZERO,
            payment_method: PaymentMethod::Pix,
            items: vec![line(0, dec!(1))],
        };
        assert!(matches!(draft.check(), Err(ServiceError::ValidationError(_))));
    }
}
