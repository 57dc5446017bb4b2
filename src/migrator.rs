use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_stock_tables::Migration),
            Box::new(m20240101_000003_create_build_tables::Migration),
        ]
    }
}

#[derive(DeriveIden)]
enum Part {
    Table,
    Id,
    Name,
    Description,
    Trackable,
    IsAssembly,
    IsComponent,
    VariantOf,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BomItem {
    Table,
    Id,
    PartId,
    SubPartId,
    Quantity,
    SetupQuantity,
    RoundingMultiple,
    AllowVariants,
    Optional,
    Consumable,
    Inherited,
    Reference,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum StockLocation {
    Table,
    Id,
    Name,
    ParentId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum StockItem {
    Table,
    Id,
    PartId,
    LocationId,
    Quantity,
    Serial,
    Batch,
    ParentId,
    BuildId,
    BuildOrderId,
    BelongsToId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum StockItemTracking {
    Table,
    Id,
    StockItemId,
    TrackingType,
    Quantity,
    BuildId,
    RelatedItemId,
    User,
    Notes,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Build {
    Table,
    Id,
    Reference,
    Title,
    PartId,
    Quantity,
    Status,
    TakeFromId,
    DestinationId,
    Batch,
    Completed,
    CompletionDate,
    CompletedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BuildLine {
    Table,
    Id,
    BuildId,
    BomItemId,
    Quantity,
}

#[derive(DeriveIden)]
enum BuildItem {
    Table,
    Id,
    BuildLineId,
    StockItemId,
    Quantity,
    InstallInto,
    CreatedAt,
    UpdatedAt,
}

mod m20240101_000001_create_catalog_tables {
    use super::{BomItem, Part};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Part::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Part::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Part::Name).string().not_null())
                        .col(ColumnDef::new(Part::Description).text().null())
                        .col(
                            ColumnDef::new(Part::Trackable)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Part::IsAssembly)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Part::IsComponent)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Part::VariantOf).big_integer().null())
                        .col(
                            ColumnDef::new(Part::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Part::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Part::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_variant_of")
                                .from(Part::Table, Part::VariantOf)
                                .to(Part::Table, Part::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BomItem::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BomItem::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BomItem::PartId).big_integer().not_null())
                        .col(ColumnDef::new(BomItem::SubPartId).big_integer().not_null())
                        .col(ColumnDef::new(BomItem::Quantity).decimal().not_null())
                        .col(
                            ColumnDef::new(BomItem::SetupQuantity)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(BomItem::RoundingMultiple).decimal().null())
                        .col(
                            ColumnDef::new(BomItem::AllowVariants)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(BomItem::Optional)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(BomItem::Consumable)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(BomItem::Inherited)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(BomItem::Reference).string().null())
                        .col(
                            ColumnDef::new(BomItem::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BomItem::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bom_item_part_id")
                                .from(BomItem::Table, BomItem::PartId)
                                .to(Part::Table, Part::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bom_item_sub_part_id")
                                .from(BomItem::Table, BomItem::SubPartId)
                                .to(Part::Table, Part::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // At most one BOM line per (assembly, component)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bom_item_part_sub_part")
                        .table(BomItem::Table)
                        .col(BomItem::PartId)
                        .col(BomItem::SubPartId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BomItem::Table).to_owned())
                .await?;

            manager
                .drop_table(Table::drop().table(Part::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000002_create_stock_tables {
    use super::{Part, StockItem, StockItemTracking, StockLocation};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLocation::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLocation::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLocation::Name).string().not_null())
                        .col(ColumnDef::new(StockLocation::ParentId).big_integer().null())
                        .col(
                            ColumnDef::new(StockLocation::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_location_parent_id")
                                .from(StockLocation::Table, StockLocation::ParentId)
                                .to(StockLocation::Table, StockLocation::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockItem::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockItem::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockItem::PartId).big_integer().not_null())
                        .col(ColumnDef::new(StockItem::LocationId).big_integer().null())
                        .col(ColumnDef::new(StockItem::Quantity).decimal().not_null())
                        .col(ColumnDef::new(StockItem::Serial).string().null())
                        .col(ColumnDef::new(StockItem::Batch).string().null())
                        .col(ColumnDef::new(StockItem::ParentId).big_integer().null())
                        .col(ColumnDef::new(StockItem::BuildId).big_integer().null())
                        .col(ColumnDef::new(StockItem::BuildOrderId).big_integer().null())
                        .col(ColumnDef::new(StockItem::BelongsToId).big_integer().null())
                        .col(
                            ColumnDef::new(StockItem::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockItem::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_item_part_id")
                                .from(StockItem::Table, StockItem::PartId)
                                .to(Part::Table, Part::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_item_location_id")
                                .from(StockItem::Table, StockItem::LocationId)
                                .to(StockLocation::Table, StockLocation::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_item_belongs_to_id")
                                .from(StockItem::Table, StockItem::BelongsToId)
                                .to(StockItem::Table, StockItem::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            // Serial numbers are unique per part; NULL serials do not collide
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_item_part_serial")
                        .table(StockItem::Table)
                        .col(StockItem::PartId)
                        .col(StockItem::Serial)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_item_build_order_id")
                        .table(StockItem::Table)
                        .col(StockItem::BuildOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockItemTracking::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockItemTracking::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockItemTracking::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockItemTracking::TrackingType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockItemTracking::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockItemTracking::BuildId).big_integer().null())
                        .col(
                            ColumnDef::new(StockItemTracking::RelatedItemId)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(StockItemTracking::User).string().null())
                        .col(ColumnDef::new(StockItemTracking::Notes).text().null())
                        .col(
                            ColumnDef::new(StockItemTracking::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_item_tracking_stock_item_id")
                                .from(StockItemTracking::Table, StockItemTracking::StockItemId)
                                .to(StockItem::Table, StockItem::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockItemTracking::Table).to_owned())
                .await?;

            manager
                .drop_table(Table::drop().table(StockItem::Table).to_owned())
                .await?;

            manager
                .drop_table(Table::drop().table(StockLocation::Table).to_owned())
                .await
        }
    }
}

mod m20240101_000003_create_build_tables {
    use super::{BomItem, Build, BuildItem, BuildLine, Part, StockItem};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_build_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Build::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Build::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Build::Reference)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Build::Title).string().null())
                        .col(ColumnDef::new(Build::PartId).big_integer().not_null())
                        .col(ColumnDef::new(Build::Quantity).decimal().not_null())
                        .col(
                            ColumnDef::new(Build::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Build::TakeFromId).big_integer().null())
                        .col(ColumnDef::new(Build::DestinationId).big_integer().null())
                        .col(ColumnDef::new(Build::Batch).string().null())
                        .col(
                            ColumnDef::new(Build::Completed)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Build::CompletionDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Build::CompletedBy).string().null())
                        .col(
                            ColumnDef::new(Build::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Build::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_build_part_id")
                                .from(Build::Table, Build::PartId)
                                .to(Part::Table, Part::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_build_status")
                        .table(Build::Table)
                        .col(Build::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BuildLine::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BuildLine::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BuildLine::BuildId).big_integer().not_null())
                        .col(ColumnDef::new(BuildLine::BomItemId).big_integer().not_null())
                        .col(ColumnDef::new(BuildLine::Quantity).decimal().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_build_line_build_id")
                                .from(BuildLine::Table, BuildLine::BuildId)
                                .to(Build::Table, Build::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_build_line_bom_item_id")
                                .from(BuildLine::Table, BuildLine::BomItemId)
                                .to(BomItem::Table, BomItem::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_build_line_build_bom_item")
                        .table(BuildLine::Table)
                        .col(BuildLine::BuildId)
                        .col(BuildLine::BomItemId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BuildItem::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BuildItem::Id)
                                .big_integer()
                                .primary_key()
                                .auto_increment()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BuildItem::BuildLineId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BuildItem::StockItemId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BuildItem::Quantity).decimal().not_null())
                        .col(ColumnDef::new(BuildItem::InstallInto).string().null())
                        .col(
                            ColumnDef::new(BuildItem::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BuildItem::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_build_item_build_line_id")
                                .from(BuildItem::Table, BuildItem::BuildLineId)
                                .to(BuildLine::Table, BuildLine::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_build_item_stock_item_id")
                                .from(BuildItem::Table, BuildItem::StockItemId)
                                .to(StockItem::Table, StockItem::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_build_item_stock_item_id")
                        .table(BuildItem::Table)
                        .col(BuildItem::StockItemId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BuildItem::Table).to_owned())
                .await?;

            manager
                .drop_table(Table::drop().table(BuildLine::Table).to_owned())
                .await?;

            manager
                .drop_table(Table::drop().table(Build::Table).to_owned())
                .await
        }
    }
}
