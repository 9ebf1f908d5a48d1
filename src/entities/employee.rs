use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Role label that makes an employee eligible for delivery assignment.
pub const DELIVERER_ROLE: &str = "entregador";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "employees")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// Free-text job title as typed on the employee form.
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn is_courier(&self) -> bool {
        self.active && self.role.trim().eq_ignore_ascii_case(DELIVERER_ROLE)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::delivery::Entity")]
    Delivery,
}

impl Related<super::delivery::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Delivery.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
