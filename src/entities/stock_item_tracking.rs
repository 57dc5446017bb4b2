use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kinds of history entries written against a stock item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum TrackingType {
    #[sea_orm(string_value = "build_output_created")]
    BuildOutputCreated,
    #[sea_orm(string_value = "build_consumed")]
    BuildConsumed,
    #[sea_orm(string_value = "split_from_parent")]
    SplitFromParent,
    #[sea_orm(string_value = "split_child_item")]
    SplitChildItem,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_item_tracking")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub stock_item_id: i64,
    pub tracking_type: TrackingType,
    pub quantity: Decimal,
    pub build_id: Option<i64>,
    /// Related stock item (split partner or produced output).
    pub related_item_id: Option<i64>,
    pub user: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_item::Entity",
        from = "Column::StockItemId",
        to = "super::stock_item::Column::Id"
    )]
    StockItem,
}

impl Related<super::stock_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
