use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Percentage-off discount rule with a cap, validity window and global usage
/// limit. `usage_count` may only grow through the conditional increment in the
/// discount service; it never exceeds `usage_limit`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discount_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_percentage: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub max_discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub min_cart_value: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: i32,
    pub usage_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Whether `now` falls inside the rule's validity window and the rule has
    /// not been switched off.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from <= now && self.valid_until >= now
    }

    /// Whether the global usage cap still has room.
    pub fn has_remaining_uses(&self) -> bool {
        self.usage_count < self.usage_limit
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_discount::Entity")]
    CartDiscounts,
}

impl Related<super::cart_discount::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartDiscounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
