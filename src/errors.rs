use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::Serialize;

/// Stable, machine-readable error categories.
///
/// Hosts exposing the engine over HTTP, RPC or a CLI map these codes to their
/// own status representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidQuantity,
    PartMismatch,
    SerializationViolation,
    InsufficientStock,
    DuplicateSerial,
    QuantityMismatch,
    NotFullyAllocated,
    BuildNotPending,
    NotFound,
    Validation,
    Conflict,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Part mismatch: stock item {stock_item_id} is part {stock_part_id}, BOM line requires part {required_part_id}")]
    PartMismatch {
        stock_item_id: i64,
        stock_part_id: i64,
        required_part_id: i64,
    },

    #[error("Serialization violation: {0}")]
    SerializationViolation(String),

    #[error("Insufficient stock: stock item {stock_item_id} has {available} available, {requested} requested")]
    InsufficientStock {
        stock_item_id: i64,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Duplicate serial: serial '{serial}' already exists for part {part_id}")]
    DuplicateSerial { part_id: i64, serial: String },

    #[error("Quantity mismatch: expected {expected}, got {actual}")]
    QuantityMismatch { expected: Decimal, actual: Decimal },

    #[error("Build {0} is not fully allocated")]
    NotFullyAllocated(i64),

    #[error("Build {build_id} is not pending (status: {status})")]
    BuildNotPending { build_id: i64, status: String },
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Returns the error category for this error.
    /// This is the single source of truth for error-to-code mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) => ErrorKind::Storage,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidQuantity(_) => ErrorKind::InvalidQuantity,
            Self::PartMismatch { .. } => ErrorKind::PartMismatch,
            Self::SerializationViolation(_) => ErrorKind::SerializationViolation,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::DuplicateSerial { .. } => ErrorKind::DuplicateSerial,
            Self::QuantityMismatch { .. } => ErrorKind::QuantityMismatch,
            Self::NotFullyAllocated(_) => ErrorKind::NotFullyAllocated,
            Self::BuildNotPending { .. } => ErrorKind::BuildNotPending,
        }
    }

    /// Returns the error message suitable for end users.
    /// Storage errors return a generic message to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn service_error_kind_mapping() {
        assert_eq!(
            ServiceError::InvalidQuantity("x".into()).kind(),
            ErrorKind::InvalidQuantity
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                stock_item_id: 1,
                requested: dec!(5),
                available: dec!(2),
            }
            .kind(),
            ErrorKind::InsufficientStock
        );
        assert_eq!(
            ServiceError::BuildNotPending {
                build_id: 1,
                status: "COMPLETE".into(),
            }
            .kind(),
            ErrorKind::BuildNotPending
        );
        assert_eq!(
            ServiceError::db_error("connection reset").kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn error_kind_codes_are_screaming_snake_case() {
        assert_eq!(ErrorKind::NotFullyAllocated.to_string(), "NOT_FULLY_ALLOCATED");
        assert_eq!(ErrorKind::DuplicateSerial.as_ref(), "DUPLICATE_SERIAL");
        assert_eq!(
            serde_json::to_string(&ErrorKind::PartMismatch).unwrap(),
            "\"PART_MISMATCH\""
        );
    }

    #[test]
    fn response_message_hides_storage_details() {
        assert_eq!(
            ServiceError::db_error("password=hunter2").response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::NotFullyAllocated(7).response_message(),
            "Build 7 is not fully allocated"
        );
    }

    #[test]
    fn insufficient_stock_message_names_quantities() {
        let err = ServiceError::InsufficientStock {
            stock_item_id: 3,
            requested: dec!(10),
            available: dec!(4.5),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock: stock item 3 has 4.5 available, 10 requested"
        );
    }
}
