use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One BOM requirement of a build. Created with the build and never edited.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "build_line")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub build_id: i64,
    pub bom_item_id: i64,
    /// Total quantity of the BOM item's sub part required for the build.
    pub quantity: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::build::Entity",
        from = "Column::BuildId",
        to = "super::build::Column::Id",
        on_delete = "Cascade"
    )]
    Build,
    #[sea_orm(
        belongs_to = "super::bom_item::Entity",
        from = "Column::BomItemId",
        to = "super::bom_item::Column::Id"
    )]
    BomItem,
    #[sea_orm(has_many = "super::build_item::Entity")]
    BuildItem,
}

impl Related<super::build::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Build.def()
    }
}

impl Related<super::bom_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BomItem.def()
    }
}

impl Related<super::build_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BuildItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
