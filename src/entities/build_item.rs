use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};

/// Reservation of `quantity` units of a stock item against a build line.
///
/// A reservation does not change the stock item. It is either released
/// (unallocation, cancellation) or realised as a consumption when the
/// build completes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "build_item")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub build_line_id: i64,
    pub stock_item_id: i64,
    pub quantity: Decimal,
    /// Serial of the planned output this unit is designated for.
    pub install_into: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::build_line::Entity",
        from = "Column::BuildLineId",
        to = "super::build_line::Column::Id",
        on_delete = "Cascade"
    )]
    BuildLine,
    #[sea_orm(
        belongs_to = "super::stock_item::Entity",
        from = "Column::StockItemId",
        to = "super::stock_item::Column::Id"
    )]
    StockItem,
}

impl Related<super::build_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BuildLine.def()
    }
}

impl Related<super::stock_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockItem.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
        }

        self.updated_at = ActiveValue::Set(now);

        Ok(self)
    }
}
