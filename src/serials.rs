//! Serial number expressions.
//!
//! Output serials may be entered as a compact expression instead of a list:
//!
//! * `7` or `SN-7`: a single serial
//! * `1-10`: an inclusive numeric range
//! * `20+3`: three consecutive serials starting at 20
//! * `20+`: consecutive serials starting at 20, filling up to the expected count
//!
//! Groups are separated by commas or whitespace.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::errors::ServiceError;

/// Upper bound on the number of serials one expression may produce.
pub const MAX_SERIALS: usize = 10_000;

enum Group {
    Fixed(Vec<String>),
    OpenEnded(u64),
}

/// Expands `expr` into an ordered list of serial numbers.
///
/// When `expected` is given the result must contain exactly that many serials.
pub fn parse_serials(expr: &str, expected: Option<usize>) -> Result<Vec<String>, ServiceError> {
    let tokens: Vec<&str> = expr
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err(ServiceError::ValidationError(
            "Serial number expression is empty".to_string(),
        ));
    }

    let mut groups = Vec::with_capacity(tokens.len());
    for token in tokens {
        groups.push(parse_group(token)?);
    }

    let open_ended = groups
        .iter()
        .filter(|g| matches!(g, Group::OpenEnded(_)))
        .count();
    if open_ended > 1 {
        return Err(ServiceError::ValidationError(
            "Only one open-ended group ('N+') is allowed".to_string(),
        ));
    }

    let fixed_count: usize = groups
        .iter()
        .map(|g| match g {
            Group::Fixed(s) => s.len(),
            Group::OpenEnded(_) => 0,
        })
        .sum();

    let mut serials = Vec::with_capacity(fixed_count);
    for group in groups {
        match group {
            Group::Fixed(values) => serials.extend(values),
            Group::OpenEnded(start) => {
                let expected = expected.ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "'{}+' needs an expected quantity",
                        start
                    ))
                })?;
                let fill = expected.saturating_sub(fixed_count);
                serials.extend(consecutive(start, fill as u64)?);
            }
        }
    }

    if serials.len() > MAX_SERIALS {
        return Err(ServiceError::ValidationError(format!(
            "Expression produces more than {} serial numbers",
            MAX_SERIALS
        )));
    }

    let mut seen = HashSet::with_capacity(serials.len());
    for serial in &serials {
        if !seen.insert(serial.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "Serial number '{}' appears more than once",
                serial
            )));
        }
    }

    if let Some(expected) = expected {
        if serials.len() != expected {
            return Err(ServiceError::QuantityMismatch {
                expected: Decimal::from(expected),
                actual: Decimal::from(serials.len()),
            });
        }
    }

    Ok(serials)
}

fn parse_group(token: &str) -> Result<Group, ServiceError> {
    if let Some((start, count)) = token.split_once('+') {
        if let Ok(start) = start.parse::<u64>() {
            if count.is_empty() {
                return Ok(Group::OpenEnded(start));
            }
            let count = count.parse::<u64>().map_err(|_| {
                ServiceError::ValidationError(format!("Invalid serial group '{}'", token))
            })?;
            if count == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid serial group '{}': count must be positive",
                    token
                )));
            }
            return Ok(Group::Fixed(consecutive(start, count)?));
        }
    }

    // Non-numeric bounds such as `AB-12` are literal serials.
    if let Some((a, b)) = token.split_once('-') {
        if let (Ok(a), Ok(b)) = (a.parse::<u64>(), b.parse::<u64>()) {
            if a > b {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid serial range '{}': start is greater than end",
                    token
                )));
            }
            let count = b.checked_sub(a).and_then(|d| d.checked_add(1)).ok_or_else(|| {
                ServiceError::ValidationError(format!("Invalid serial range '{}'", token))
            })?;
            return Ok(Group::Fixed(consecutive(a, count)?));
        }
    }

    Ok(Group::Fixed(vec![token.to_string()]))
}

fn consecutive(start: u64, count: u64) -> Result<Vec<String>, ServiceError> {
    if count > MAX_SERIALS as u64 {
        return Err(ServiceError::ValidationError(format!(
            "Expression produces more than {} serial numbers",
            MAX_SERIALS
        )));
    }
    if count > 0 && start.checked_add(count - 1).is_none() {
        return Err(ServiceError::ValidationError(format!(
            "Serial numbers starting at {} overflow",
            start
        )));
    }
    Ok((0..count).map(|offset| (start + offset).to_string()).collect())
}
