use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};

/// Directed BOM edge `part -> sub_part`. Unique per (part, sub_part).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bom_item")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The assembly this line belongs to.
    pub part_id: i64,
    /// The component consumed by the assembly.
    pub sub_part_id: i64,
    /// Quantity of `sub_part` required per assembly.
    pub quantity: Decimal,
    /// Fixed quantity added once per build, independent of build size.
    pub setup_quantity: Decimal,
    /// Required quantity is rounded up to a multiple of this value.
    pub rounding_multiple: Option<Decimal>,
    /// Stock of a variant of `sub_part` may be allocated against this line.
    pub allow_variants: bool,
    pub optional: bool,
    /// Consumable lines are not tracked by allocation.
    pub consumable: bool,
    /// Line is also part of the BOM of variants of `part`.
    pub inherited: bool,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::PartId",
        to = "super::part::Column::Id"
    )]
    Assembly,
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::SubPartId",
        to = "super::part::Column::Id"
    )]
    SubPart,
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = self.setup_quantity {
                self.setup_quantity = ActiveValue::Set(Decimal::ZERO);
            }

            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
        }

        self.updated_at = ActiveValue::Set(now);

        Ok(self)
    }
}
