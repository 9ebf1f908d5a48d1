use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// Unit of measure for a stocked product.
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
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StockUnit {
    /// Unit (un)
    #[sea_orm(string_value = "un")]
    Un,
    #[sea_orm(string_value = "kg")]
    Kg,
    #[sea_orm(string_value = "g")]
    G,
    #[sea_orm(string_value = "l")]
    L,
    #[sea_orm(string_value = "ml")]
    Ml,
    /// Box (cx)
    #[sea_orm(string_value = "cx")]
    Cx,
    /// Pack (pct)
    #[sea_orm(string_value = "pct")]
    Pct,
}

/// Display/alerting status derived from on-hand quantity. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Normal,
}

impl StockStatus {
    pub fn classify(quantity: Decimal, min_threshold: Decimal) -> Self {
        if quantity <= Decimal::ZERO {
            StockStatus::OutOfStock
        } else if quantity <= min_threshold {
            StockStatus::Low
        } else {
            StockStatus::Normal
        }
    }

    pub fn needs_attention(self) -> bool {
        !matches!(self, StockStatus::Normal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit: StockUnit,
    pub min_threshold: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn stock_status(&self) -> StockStatus {
        StockStatus::classify(self.quantity, self.min_threshold)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::inventory_movement::Entity")]
    InventoryMovement,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::inventory_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryMovement.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        active_model.updated_at = Set(Utc::now());
        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn classify_boundaries() {
        assert_eq!(StockStatus::classify(dec!(0), dec!(5)), StockStatus::OutOfStock);
        assert_eq!(StockStatus::classify(dec!(-1), dec!(5)), StockStatus::OutOfStock);
        assert_eq!(StockStatus::classify(dec!(5), dec!(5)), StockStatus::Low);
        assert_eq!(StockStatus::classify(dec!(0.5), dec!(0)), StockStatus::Normal);
        assert_eq!(StockStatus::classify(dec!(5.01), dec!(5)), StockStatus::Normal);
    }

    #[test]
    fn unit_parses_from_label() {
        assert_eq!("kg".parse::<StockUnit>().unwrap(), StockUnit::Kg);
        assert_eq!(StockUnit::Pct.to_string(), "pct");
        assert!("ton".parse::<StockUnit>().is_err());
    }
}
