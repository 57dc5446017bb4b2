//! Requirement resolution: how much of each component a build needs and how
//! much of it is already reserved.

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::{
    entities::{bom_item, build_item, build_line},
    errors::ServiceError,
};

/// Quantity of `bom.sub_part` needed to build `build_quantity` assemblies.
///
/// `quantity * build_quantity + setup_quantity`, rounded up to the line's
/// rounding multiple when one is set.
pub fn required_for_build(bom: &bom_item::Model, build_quantity: Decimal) -> Decimal {
    let base = bom.quantity * build_quantity + bom.setup_quantity;
    match bom.rounding_multiple {
        Some(multiple) if multiple > Decimal::ZERO => (base / multiple).ceil() * multiple,
        _ => base,
    }
}

/// Allocation state of one build line.
#[derive(Debug, Clone, Serialize)]
pub struct LineAllocation {
    pub line: build_line::Model,
    pub bom_item: bom_item::Model,
    pub allocated: Decimal,
}

impl LineAllocation {
    pub fn required(&self) -> Decimal {
        self.line.quantity
    }

    pub fn part_id(&self) -> i64 {
        self.bom_item.sub_part_id
    }

    pub fn remaining(&self) -> Decimal {
        (self.line.quantity - self.allocated).max(Decimal::ZERO)
    }

    /// Consumable lines never block completion.
    pub fn is_fully_allocated(&self) -> bool {
        self.bom_item.consumable || self.allocated >= self.line.quantity
    }
}

/// Per-part rollup of a build's requirements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartRequirement {
    pub part_id: i64,
    pub required: Decimal,
    pub allocated: Decimal,
    pub fully_allocated: bool,
}

pub(crate) async fn lines_with_bom<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
) -> Result<Vec<(build_line::Model, bom_item::Model)>, ServiceError> {
    let rows = build_line::Entity::find()
        .filter(build_line::Column::BuildId.eq(build_id))
        .find_also_related(bom_item::Entity)
        .order_by_asc(build_line::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    rows.into_iter()
        .map(|(line, bom)| {
            let bom = bom.ok_or_else(|| ServiceError::not_found("BOM item", line.bom_item_id))?;
            Ok((line, bom))
        })
        .collect()
}

/// All reservations held by a build, oldest first.
pub(crate) async fn allocations_for_build<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
) -> Result<Vec<build_item::Model>, ServiceError> {
    build_item::Entity::find()
        .inner_join(build_line::Entity)
        .filter(build_line::Column::BuildId.eq(build_id))
        .order_by_asc(build_item::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub(crate) async fn line_allocations<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
) -> Result<Vec<LineAllocation>, ServiceError> {
    let lines = lines_with_bom(conn, build_id).await?;
    let allocations = allocations_for_build(conn, build_id).await?;

    let mut per_line: HashMap<i64, Decimal> = HashMap::new();
    for allocation in &allocations {
        *per_line.entry(allocation.build_line_id).or_default() += allocation.quantity;
    }

    Ok(lines
        .into_iter()
        .map(|(line, bom_item)| {
            let allocated = per_line.get(&line.id).copied().unwrap_or_default();
            LineAllocation {
                line,
                bom_item,
                allocated,
            }
        })
        .collect())
}

/// Rolls line allocations up per component part. Consumable lines count
/// towards `required` but not towards the allocation check.
pub fn part_requirements(lines: &[LineAllocation]) -> Vec<PartRequirement> {
    let mut parts: BTreeMap<i64, (Decimal, Decimal, Decimal)> = BTreeMap::new();
    for line in lines {
        let entry = parts.entry(line.part_id()).or_default();
        entry.0 += line.required();
        if !line.bom_item.consumable {
            entry.1 += line.required();
            entry.2 += line.allocated;
        }
    }

    parts
        .into_iter()
        .map(|(part_id, (required, tracked_required, allocated))| PartRequirement {
            part_id,
            required,
            allocated,
            fully_allocated: allocated >= tracked_required,
        })
        .collect()
}

pub(crate) async fn required_quantity<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
    part_id: i64,
) -> Result<Decimal, ServiceError> {
    Ok(lines_with_bom(conn, build_id)
        .await?
        .iter()
        .filter(|(_, bom)| bom.sub_part_id == part_id)
        .map(|(line, _)| line.quantity)
        .sum())
}

pub(crate) async fn is_part_fully_allocated<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
    part_id: i64,
) -> Result<bool, ServiceError> {
    let lines = line_allocations(conn, build_id).await?;
    Ok(part_requirements(&lines)
        .iter()
        .filter(|p| p.part_id == part_id)
        .all(|p| p.fully_allocated))
}

pub(crate) async fn is_fully_allocated<C: ConnectionTrait>(
    conn: &C,
    build_id: i64,
) -> Result<bool, ServiceError> {
    let lines = line_allocations(conn, build_id).await?;
    Ok(part_requirements(&lines).iter().all(|p| p.fully_allocated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn bom(quantity: Decimal, setup: Decimal, multiple: Option<Decimal>) -> bom_item::Model {
        let now = Utc::now();
        bom_item::Model {
            id: 1,
            part_id: 1,
            sub_part_id: 2,
            quantity,
            setup_quantity: setup,
            rounding_multiple: multiple,
            allow_variants: false,
            optional: false,
            consumable: false,
            inherited: false,
            reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn line(id: i64, sub_part_id: i64, required: Decimal, allocated: Decimal, consumable: bool) -> LineAllocation {
        let mut bom_item = bom(dec!(1), dec!(0), None);
        bom_item.id = id;
        bom_item.sub_part_id = sub_part_id;
        bom_item.consumable = consumable;
        LineAllocation {
            line: build_line::Model {
                id,
                build_id: 1,
                bom_item_id: id,
                quantity: required,
            },
            bom_item,
            allocated,
        }
    }

    #[rstest]
    #[case(dec!(10), dec!(0), None, dec!(10), dec!(100))]
    #[case(dec!(2.5), dec!(0), None, dec!(4), dec!(10))]
    #[case(dec!(3), dec!(5), None, dec!(2), dec!(11))]
    #[case(dec!(3), dec!(0), Some(dec!(4)), dec!(3), dec!(12))]
    #[case(dec!(3), dec!(0), Some(dec!(3)), dec!(3), dec!(9))]
    #[case(dec!(1), dec!(1), Some(dec!(10)), dec!(1), dec!(10))]
    fn required_quantity_per_line(
        #[case] quantity: Decimal,
        #[case] setup: Decimal,
        #[case] multiple: Option<Decimal>,
        #[case] build_quantity: Decimal,
        #[case] expected: Decimal,
    ) {
        assert_eq!(
            required_for_build(&bom(quantity, setup, multiple), build_quantity),
            expected
        );
    }

    #[test]
    fn part_rollup_sums_lines_of_the_same_part() {
        let lines = vec![
            line(1, 7, dec!(5), dec!(5), false),
            line(2, 7, dec!(3), dec!(2), false),
            line(3, 8, dec!(4), dec!(4), false),
        ];

        let parts = part_requirements(&lines);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_id, 7);
        assert_eq!(parts[0].required, dec!(8));
        assert_eq!(parts[0].allocated, dec!(7));
        assert!(!parts[0].fully_allocated);
        assert!(parts[1].fully_allocated);
    }

    #[test]
    fn consumable_lines_never_block() {
        let lines = vec![
            line(1, 7, dec!(5), dec!(5), false),
            line(2, 9, dec!(50), dec!(0), true),
        ];

        let parts = part_requirements(&lines);
        assert!(parts.iter().all(|p| p.fully_allocated));
        assert_eq!(parts[1].required, dec!(50));
        assert!(lines[1].is_fully_allocated());
    }

    #[test]
    fn over_allocation_counts_as_full_and_remaining_is_zero() {
        let l = line(1, 7, dec!(5), dec!(6), false);
        assert!(l.is_fully_allocated());
        assert_eq!(l.remaining(), dec!(0));
    }

    proptest! {
        #[test]
        fn required_without_rounding_is_exact_product(per_unit in 1i64..10_000, build_qty in 1i64..1_000, setup in 0i64..100) {
            let per_unit = Decimal::new(per_unit, 2);
            let b = bom(per_unit, Decimal::from(setup), None);
            let required = required_for_build(&b, Decimal::from(build_qty));
            prop_assert_eq!(required, per_unit * Decimal::from(build_qty) + Decimal::from(setup));
        }

        #[test]
        fn rounded_requirement_is_a_covering_multiple(per_unit in 1i64..500, build_qty in 1i64..100, multiple in 1i64..50) {
            let multiple = Decimal::from(multiple);
            let b = bom(Decimal::from(per_unit), Decimal::ZERO, Some(multiple));
            let required = required_for_build(&b, Decimal::from(build_qty));
            let base = Decimal::from(per_unit * build_qty);
            prop_assert!(required >= base);
            prop_assert!(required - base < multiple);
            prop_assert_eq!(required % multiple, Decimal::ZERO);
        }
    }
}
