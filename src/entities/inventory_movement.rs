use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementDirection {
    /// Entrada: stock coming in.
    #[sea_orm(string_value = "in")]
    In,
    /// Saída: stock going out.
    #[sea_orm(string_value = "out")]
    Out,
}

impl MovementDirection {
    /// Applies a movement of `quantity` in this direction to `on_hand`.
    pub fn apply(self, on_hand: Decimal, quantity: Decimal) -> Decimal {
        match self {
            MovementDirection::In => on_hand + quantity,
            MovementDirection::Out => on_hand - quantity,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementReason {
    #[sea_orm(string_value = "initial_stock")]
    InitialStock,
    #[sea_orm(string_value = "stock_adjustment")]
    StockAdjustment,
    #[sea_orm(string_value = "order_fulfillment")]
    OrderFulfillment,
    #[sea_orm(string_value = "purchase")]
    Purchase,
    #[sea_orm(string_value = "loss")]
    Loss,
    #[sea_orm(string_value = "consumption")]
    Consumption,
    #[sea_orm(string_value = "other")]
    Other,
}

/// Append-only ledger row. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub inventory_item_id: Uuid,
    pub direction: MovementDirection,
    /// Always positive; `direction` carries the sign.
    pub quantity: Decimal,
    pub date: DateTime<Utc>,
    pub reason: MovementReason,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_item::Entity",
        from = "Column::InventoryItemId",
        to = "super::inventory_item::Column::Id"
    )]
    InventoryItem,
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(Utc::now());
            }
        }
        Ok(active_model)
    }
}
