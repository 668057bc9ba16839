use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Applied-discount snapshot embedded in a cart. At most one row per cart;
/// the snapshotted fields shield a later order from rule edits.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cart_discounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub cart_id: Uuid,
    pub rule_id: Uuid,
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount_percentage: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub max_discount_amount: Decimal,
    pub applied_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cart::Entity",
        from = "Column::CartId",
        to = "super::cart::Column::Id"
    )]
    Cart,
    #[sea_orm(
        belongs_to = "super::discount_rule::Entity",
        from = "Column::RuleId",
        to = "super::discount_rule::Column::Id"
    )]
    DiscountRule,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cart.def()
    }
}

impl Related<super::discount_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiscountRule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
