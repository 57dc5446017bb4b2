use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    entities::{bom_item, part},
    errors::ServiceError,
};

/// Depth limit when walking `variant_of` chains.
const MAX_VARIANT_DEPTH: usize = 32;

/// How a stock item's part relates to the part a BOM line requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartCompatibility {
    Exact,
    /// The stock part is a (possibly indirect) variant of the required part.
    Variant,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct NewPart {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub trackable: bool,
    #[serde(default)]
    pub is_assembly: bool,
    #[serde(default)]
    pub is_component: bool,
    pub variant_of: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBomItem {
    pub part_id: i64,
    pub sub_part_id: i64,
    pub quantity: Decimal,
    #[serde(default)]
    pub setup_quantity: Decimal,
    pub rounding_multiple: Option<Decimal>,
    #[serde(default)]
    pub allow_variants: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub consumable: bool,
    #[serde(default)]
    pub inherited: bool,
    pub reference: Option<String>,
}

impl NewBomItem {
    pub fn new(part_id: i64, sub_part_id: i64, quantity: Decimal) -> Self {
        Self {
            part_id,
            sub_part_id,
            quantity,
            setup_quantity: Decimal::ZERO,
            rounding_multiple: None,
            allow_variants: false,
            optional: false,
            consumable: false,
            inherited: false,
            reference: None,
        }
    }
}

/// Parts and bills of materials
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_part(&self, input: NewPart) -> Result<part::Model, ServiceError> {
        input.validate()?;

        let db = &*self.db;
        if let Some(template_id) = input.variant_of {
            get_part(db, template_id).await?;
        }

        let part = part::ActiveModel {
            name: Set(input.name),
            description: Set(input.description),
            trackable: Set(input.trackable),
            is_assembly: Set(input.is_assembly),
            is_component: Set(input.is_component),
            variant_of: Set(input.variant_of),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        counter!("build_engine.parts.created", 1);
        info!(part_id = part.id, "Part created");
        Ok(part)
    }

    pub async fn get_part(&self, part_id: i64) -> Result<part::Model, ServiceError> {
        get_part(&*self.db, part_id).await
    }

    /// Adds a line to the BOM of `input.part_id`.
    ///
    /// The assembly must be flagged `is_assembly`, the sub part `is_component`,
    /// and the new edge must not close a cycle in the BOM graph.
    #[instrument(skip(self))]
    pub async fn add_bom_item(&self, input: NewBomItem) -> Result<bom_item::Model, ServiceError> {
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "BOM quantity must be positive, got: {}",
                input.quantity
            )));
        }
        if input.setup_quantity < Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "Setup quantity cannot be negative, got: {}",
                input.setup_quantity
            )));
        }
        if matches!(input.rounding_multiple, Some(m) if m <= Decimal::ZERO) {
            return Err(ServiceError::InvalidQuantity(
                "Rounding multiple must be positive".to_string(),
            ));
        }
        if input.part_id == input.sub_part_id {
            return Err(ServiceError::ValidationError(
                "A part cannot be a component of itself".to_string(),
            ));
        }

        let db = &*self.db;
        let assembly = get_part(db, input.part_id).await?;
        let sub_part = get_part(db, input.sub_part_id).await?;

        if !assembly.is_assembly {
            return Err(ServiceError::ValidationError(format!(
                "Part {} is not an assembly",
                assembly.id
            )));
        }
        if !sub_part.is_component {
            return Err(ServiceError::ValidationError(format!(
                "Part {} is not a component",
                sub_part.id
            )));
        }

        if sub_part.trackable
            && (!input.quantity.fract().is_zero() || !input.setup_quantity.fract().is_zero())
        {
            return Err(ServiceError::InvalidQuantity(format!(
                "Part {} is trackable; BOM quantities must be whole units",
                sub_part.id
            )));
        }

        let existing = bom_item::Entity::find()
            .filter(bom_item::Column::PartId.eq(assembly.id))
            .filter(bom_item::Column::SubPartId.eq(sub_part.id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Part {} is already in the BOM of part {}",
                sub_part.id, assembly.id
            )));
        }

        if bom_contains(db, sub_part.id, assembly.id).await? {
            return Err(ServiceError::ValidationError(format!(
                "Adding part {} to the BOM of part {} would create a cycle",
                sub_part.id, assembly.id
            )));
        }

        let item = bom_item::ActiveModel {
            part_id: Set(assembly.id),
            sub_part_id: Set(sub_part.id),
            quantity: Set(input.quantity),
            setup_quantity: Set(input.setup_quantity),
            rounding_multiple: Set(input.rounding_multiple),
            allow_variants: Set(input.allow_variants),
            optional: Set(input.optional),
            consumable: Set(input.consumable),
            inherited: Set(input.inherited),
            reference: Set(input.reference),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(bom_item_id = item.id, "BOM item added");
        Ok(item)
    }

    /// Effective BOM of an assembly, including lines inherited from templates.
    pub async fn bom_items_for(&self, part_id: i64) -> Result<Vec<bom_item::Model>, ServiceError> {
        bom_items_for(&*self.db, part_id).await
    }

    pub async fn variants_of(&self, part_id: i64) -> Result<Vec<i64>, ServiceError> {
        let mut ids = variant_tree_ids(&*self.db, part_id).await?;
        ids.retain(|id| *id != part_id);
        Ok(ids)
    }
}

pub(crate) async fn get_part<C: ConnectionTrait>(
    conn: &C,
    part_id: i64,
) -> Result<part::Model, ServiceError> {
    part::Entity::find_by_id(part_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Part", part_id))
}

/// Own BOM lines of `part_id` followed by the inherited lines of its
/// templates. A sub part listed directly on the part shadows inherited lines
/// for the same sub part.
pub(crate) async fn bom_items_for<C: ConnectionTrait>(
    conn: &C,
    part_id: i64,
) -> Result<Vec<bom_item::Model>, ServiceError> {
    let mut items = bom_item::Entity::find()
        .filter(bom_item::Column::PartId.eq(part_id))
        .order_by_asc(bom_item::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut seen: HashSet<i64> = items.iter().map(|i| i.sub_part_id).collect();
    let mut current = get_part(conn, part_id).await?;

    for _ in 0..MAX_VARIANT_DEPTH {
        let Some(template_id) = current.variant_of else {
            break;
        };

        let inherited = bom_item::Entity::find()
            .filter(bom_item::Column::PartId.eq(template_id))
            .filter(bom_item::Column::Inherited.eq(true))
            .order_by_asc(bom_item::Column::Id)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        for item in inherited {
            if seen.insert(item.sub_part_id) {
                items.push(item);
            }
        }

        current = get_part(conn, template_id).await?;
    }

    Ok(items)
}

/// Decides whether stock of `stock_part_id` may fill `bom`.
pub(crate) async fn resolve_compatibility<C: ConnectionTrait>(
    conn: &C,
    bom: &bom_item::Model,
    stock_part_id: i64,
) -> Result<Option<PartCompatibility>, ServiceError> {
    if stock_part_id == bom.sub_part_id {
        return Ok(Some(PartCompatibility::Exact));
    }
    if !bom.allow_variants {
        return Ok(None);
    }

    let mut current = get_part(conn, stock_part_id).await?;
    for _ in 0..MAX_VARIANT_DEPTH {
        match current.variant_of {
            Some(template_id) if template_id == bom.sub_part_id => {
                return Ok(Some(PartCompatibility::Variant))
            }
            Some(template_id) => current = get_part(conn, template_id).await?,
            None => break,
        }
    }

    Ok(None)
}

/// Part ids whose stock can fill `bom`: the sub part, plus its variants when
/// the line allows them.
pub(crate) async fn compatible_part_ids<C: ConnectionTrait>(
    conn: &C,
    bom: &bom_item::Model,
) -> Result<Vec<i64>, ServiceError> {
    if bom.allow_variants {
        variant_tree_ids(conn, bom.sub_part_id).await
    } else {
        Ok(vec![bom.sub_part_id])
    }
}

/// `root` and every part transitively declared a variant of it.
pub(crate) async fn variant_tree_ids<C: ConnectionTrait>(
    conn: &C,
    root: i64,
) -> Result<Vec<i64>, ServiceError> {
    let mut ids = vec![root];
    let mut seen = HashSet::from([root]);
    let mut frontier = vec![root];

    for _ in 0..MAX_VARIANT_DEPTH {
        if frontier.is_empty() {
            break;
        }
        let children = part::Entity::find()
            .filter(part::Column::VariantOf.is_in(frontier.clone()))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;

        frontier.clear();
        for child in children {
            if seen.insert(child.id) {
                ids.push(child.id);
                frontier.push(child.id);
            }
        }
    }

    Ok(ids)
}

/// True if `target` appears anywhere in the BOM tree below `root`.
async fn bom_contains<C: ConnectionTrait>(
    conn: &C,
    root: i64,
    target: i64,
) -> Result<bool, ServiceError> {
    let mut queue = VecDeque::from([root]);
    let mut visited = HashSet::new();

    while let Some(part_id) = queue.pop_front() {
        if part_id == target {
            return Ok(true);
        }
        if !visited.insert(part_id) {
            continue;
        }
        let children = bom_item::Entity::find()
            .filter(bom_item::Column::PartId.eq(part_id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        queue.extend(children.into_iter().map(|c| c.sub_part_id));
    }

    Ok(false)
}
