use crate::{
    db::{self, DbPool},
    entities::{
        customer::{self, Entity as CustomerEntity},
        delivery::{self, Entity as DeliveryEntity, Model as DeliveryModel},
        employee::{self, Entity as EmployeeEntity, Model as EmployeeModel},
        order::{self, Entity as OrderEntity, Model as OrderModel},
        DeliveryStatus, OrderKind, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Insert (no `id`) or edit (with `id`) of a delivery record.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeliveryDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub status: DeliveryStatus,
    pub departure_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Delivery joined with the names shown in the delivery list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_name: String,
    pub courier_id: Uuid,
    pub courier_name: String,
    pub status: DeliveryStatus,
    pub departure_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// A delivery whose status moved, kept for publishing after commit.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryChange {
    pub previous: Option<DeliveryStatus>,
    pub delivery: DeliveryModel,
}

impl DeliveryChange {
    pub(crate) fn event(&self) -> Event {
        match self.previous {
            None => Event::DeliveryAssigned {
                delivery_id: self.delivery.id,
                order_id: self.delivery.order_id,
                courier_id: self.delivery.courier_id,
            },
            Some(old_status) => Event::DeliveryStatusChanged {
                delivery_id: self.delivery.id,
                old_status,
                new_status: self.delivery.status,
            },
        }
    }
}

pub(crate) async fn find_active_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<DeliveryModel>, DbErr> {
    DeliveryEntity::find()
        .filter(delivery::Column::OrderId.eq(order_id))
        .filter(delivery::Column::Status.is_in(DeliveryStatus::active()))
        .order_by_desc(delivery::Column::DepartureAt)
        .one(conn)
        .await
}

/// Active employees with the deliverer role, by name.
pub(crate) async fn load_couriers<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<EmployeeModel>, DbErr> {
    let employees = EmployeeEntity::find()
        .filter(employee::Column::Active.eq(true))
        .order_by_asc(employee::Column::Name)
        .all(conn)
        .await?;
    Ok(employees.into_iter().filter(|e| e.is_courier()).collect())
}

pub(crate) async fn insert_delivery<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    courier_id: Uuid,
    departure_at: DateTime<Utc>,
    notes: Option<String>,
) -> Result<DeliveryChange, ServiceError> {
    let delivery = delivery::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        courier_id: Set(courier_id),
        status: Set(DeliveryStatus::Pending),
        departure_at: Set(departure_at),
        delivered_at: Set(None),
        notes: Set(notes),
    };
    let delivery = delivery.insert(conn).await.map_err(|e| {
        error!(error = %e, order_id = %order_id, "Failed to create delivery");
        ServiceError::DatabaseError(e)
    })?;
    Ok(DeliveryChange {
        previous: None,
        delivery,
    })
}

/// Moves `current` to `next`. Completing stamps the delivery time (now when
/// none is given); canceling clears it.
pub(crate) async fn apply_status<C: ConnectionTrait>(
    conn: &C,
    current: DeliveryModel,
    next: DeliveryStatus,
    delivered_at: Option<DateTime<Utc>>,
) -> Result<DeliveryChange, ServiceError> {
    let previous = current.status;
    if !previous.can_transition_to(next) {
        return Err(ServiceError::InvalidStatus(format!(
            "Delivery {} cannot move from {} to {}",
            current.id, previous, next
        )));
    }

    let delivery_id = current.id;
    let mut delivery: delivery::ActiveModel = current.into();
    delivery.status = Set(next);
    match next {
        DeliveryStatus::Completed => {
            delivery.delivered_at = Set(Some(delivered_at.unwrap_or_else(Utc::now)));
        }
        DeliveryStatus::Canceled => delivery.delivered_at = Set(None),
        DeliveryStatus::Pending | DeliveryStatus::EnRoute => {}
    }

    let delivery = delivery.update(conn).await.map_err(|e| {
        error!(error = %e, delivery_id = %delivery_id, "Failed to update delivery status");
        ServiceError::DatabaseError(e)
    })?;

    Ok(DeliveryChange {
        previous: Some(previous),
        delivery,
    })
}

/// Links delivery orders to couriers and tracks the delivery's own status.
#[derive(Clone)]
pub struct DeliveryService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl DeliveryService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn publish(&self, change: &DeliveryChange) {
        if let Some(event_sender) = &self.event_sender {
            event_sender.send_or_log(change.event()).await;
        }
    }

    /// Delivery orders that are still open and have no active delivery.
    #[instrument(skip(self))]
    pub async fn list_available_orders(&self) -> Result<Vec<OrderModel>, ServiceError> {
        let db = &*self.db_pool;

        let orders = OrderEntity::find()
            .filter(order::Column::Kind.eq(OrderKind::Delivery))
            .filter(order::Column::Status.is_not_in([OrderStatus::Delivered, OrderStatus::Canceled]))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch orders awaiting delivery");
                ServiceError::DatabaseError(e)
            })?;

        let busy: HashSet<Uuid> = DeliveryEntity::find()
            .filter(delivery::Column::Status.is_in(DeliveryStatus::active()))
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch active deliveries");
                ServiceError::DatabaseError(e)
            })?
            .into_iter()
            .map(|d| d.order_id)
            .collect();

        Ok(orders
            .into_iter()
            .filter(|o| !busy.contains(&o.id))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn list_couriers(&self) -> Result<Vec<EmployeeModel>, ServiceError> {
        load_couriers(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, "Failed to fetch couriers");
            ServiceError::DatabaseError(e)
        })
    }

    /// Deliveries newest departure first, optionally narrowed by a
    /// case-insensitive match on status, customer name or courier name.
    #[instrument(skip(self))]
    pub async fn list_deliveries(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<DeliveryView>, ServiceError> {
        let db = &*self.db_pool;

        let rows = DeliveryEntity::find()
            .find_also_related(EmployeeEntity)
            .order_by_desc(delivery::Column::DepartureAt)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch deliveries");
                ServiceError::DatabaseError(e)
            })?;

        let order_ids: HashSet<Uuid> = rows.iter().map(|(d, _)| d.order_id).collect();
        let customer_names: HashMap<Uuid, String> = OrderEntity::find()
            .filter(order::Column::Id.is_in(order_ids))
            .find_also_related(CustomerEntity)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to fetch delivery customers");
                ServiceError::DatabaseError(e)
            })?
            .into_iter()
            .map(|(order, customer): (OrderModel, Option<customer::Model>)| {
                (order.id, customer.map(|c| c.name).unwrap_or_default())
            })
            .collect();

        let needle = search
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty());

        Ok(rows
            .into_iter()
            .map(|(delivery, courier)| DeliveryView {
                id: delivery.id,
                order_id: delivery.order_id,
                customer_name: customer_names
                    .get(&delivery.order_id)
                    .cloned()
                    .unwrap_or_default(),
                courier_id: delivery.courier_id,
                courier_name: courier.map(|c| c.name).unwrap_or_default(),
                status: delivery.status,
                departure_at: delivery.departure_at,
                delivered_at: delivery.delivered_at,
                notes: delivery.notes,
            })
            .filter(|view| match &needle {
                Some(needle) => {
                    view.status.to_string().contains(needle.as_str())
                        || view.customer_name.to_lowercase().contains(needle)
                        || view.courier_name.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect())
    }

    #[instrument(skip(self), fields(delivery_id = %delivery_id))]
    pub async fn get(&self, delivery_id: Uuid) -> Result<Option<DeliveryModel>, ServiceError> {
        DeliveryEntity::find_by_id(delivery_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, delivery_id = %delivery_id, "Failed to fetch delivery");
                ServiceError::DatabaseError(e)
            })
    }

    /// The pending or en-route delivery for `order_id`, if any.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn active_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<DeliveryModel>, ServiceError> {
        find_active_for_order(&*self.db_pool, order_id)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch active delivery");
                ServiceError::DatabaseError(e)
            })
    }

    /// Upsert keyed on the presence of `draft.id`. Inserting does not check
    /// for an existing active delivery; use [`DeliveryService::assign`] for
    /// that.
    #[instrument(skip(self, draft), fields(order_id = %draft.order_id))]
    pub async fn create_or_update(&self, draft: DeliveryDraft) -> Result<Uuid, ServiceError> {
        draft.validate()?;

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;
        let change = save_draft(&txn, draft).await?;
        db::commit(txn, started).await?;

        info!(
            delivery_id = %change.delivery.id,
            status = %change.delivery.status,
            "Delivery saved"
        );
        self.publish(&change).await;
        Ok(change.delivery.id)
    }

    /// Manual assignment of an open delivery order to a courier.
    #[instrument(skip(self, draft), fields(order_id = %draft.order_id, courier_id = %draft.courier_id))]
    pub async fn assign(&self, draft: DeliveryDraft) -> Result<Uuid, ServiceError> {
        draft.validate()?;
        if draft.id.is_some() {
            return Err(ServiceError::InvalidOperation(
                "Assignment creates a new delivery; edit existing ones instead".to_string(),
            ));
        }

        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let order = OrderEntity::find_by_id(draft.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", draft.order_id)))?;

        if order.kind != OrderKind::Delivery {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not a delivery order",
                order.id
            )));
        }
        if order.status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is already {}",
                order.id, order.status
            )));
        }
        if let Some(active) = find_active_for_order(&txn, order.id).await? {
            warn!(order_id = %order.id, delivery_id = %active.id, "Order already has an active delivery");
            return Err(ServiceError::Conflict(format!(
                "Order {} already has an active delivery",
                order.id
            )));
        }

        let courier = EmployeeEntity::find_by_id(draft.courier_id).one(&txn).await?;
        if !courier.map_or(false, |c| c.is_courier()) {
            return Err(ServiceError::ValidationError(format!(
                "Employee {} is not an active courier",
                draft.courier_id
            )));
        }

        let change = save_draft(&txn, draft).await?;
        db::commit(txn, started).await?;

        info!(delivery_id = %change.delivery.id, order_id = %order.id, "Delivery assigned");
        self.publish(&change).await;
        Ok(change.delivery.id)
    }

    /// Transitions a delivery's own status. Terminal deliveries are
    /// immutable. This does not touch the parent order; the order-side
    /// actions live on `OrderService`.
    #[instrument(skip(self), fields(delivery_id = %delivery_id))]
    pub async fn set_status(
        &self,
        delivery_id: Uuid,
        new_status: DeliveryStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<Option<DeliveryModel>, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(&self.db_pool).await?;

        let Some(current) = DeliveryEntity::find_by_id(delivery_id).one(&txn).await? else {
            warn!(delivery_id = %delivery_id, "Delivery not found; nothing to update");
            return Ok(None);
        };

        let change = apply_status(&txn, current, new_status, delivered_at).await?;
        db::commit(txn, started).await?;

        info!(delivery_id = %delivery_id, status = %new_status, "Delivery status updated");
        self.publish(&change).await;
        Ok(Some(change.delivery))
    }
}

async fn save_draft<C: ConnectionTrait>(
    conn: &C,
    draft: DeliveryDraft,
) -> Result<DeliveryChange, ServiceError> {
    if draft.status == DeliveryStatus::Completed && draft.delivered_at.is_none() {
        return Err(ServiceError::ValidationError(
            "A completed delivery needs a delivery time".to_string(),
        ));
    }

    let Some(delivery_id) = draft.id else {
        let mut change = insert_delivery(
            conn,
            draft.order_id,
            draft.courier_id,
            draft.departure_at,
            draft.notes,
        )
        .await?;
        if draft.status != DeliveryStatus::Pending {
            let created = change.delivery.clone();
            change = apply_status(conn, created, draft.status, draft.delivered_at).await?;
            change.previous = None;
        }
        return Ok(change);
    };

    let current = DeliveryEntity::find_by_id(delivery_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Delivery {} not found", delivery_id)))?;

    if current.status.is_terminal() {
        return Err(ServiceError::InvalidStatus(format!(
            "Delivery {} is {} and can no longer be edited",
            delivery_id, current.status
        )));
    }

    let previous = current.status;
    let mut change = apply_status(conn, current, draft.status, draft.delivered_at).await?;

    let mut delivery: delivery::ActiveModel = change.delivery.into();
    delivery.courier_id = Set(draft.courier_id);
    delivery.departure_at = Set(draft.departure_at);
    delivery.notes = Set(draft.notes);
    change.delivery = delivery.update(conn).await.map_err(|e| {
        error!(error = %e, delivery_id = %delivery_id, "Failed to update delivery");
        ServiceError::DatabaseError(e)
    })?;
    change.previous = Some(previous);
    Ok(change)
}
