/*!
 * Transaction Helper Utilities
 *
 * Every mutating engine operation runs between `begin_transaction` and
 * `commit_transaction`. A transaction dropped without commit rolls back, so
 * an early `?` return leaves no partial writes behind.
 */

use metrics::counter;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, EntityTrait, QuerySelect,
    Select, TransactionTrait,
};
use tracing::debug;

use crate::errors::ServiceError;

/// Begins a transaction on the pool.
pub async fn begin_transaction(
    db: &DatabaseConnection,
    operation: &'static str,
) -> Result<DatabaseTransaction, ServiceError> {
    debug!(operation, "Starting database transaction");
    counter!("build_engine_db.transaction.started", 1);
    db.begin().await.map_err(ServiceError::db_error)
}

/// Commits a transaction started with [`begin_transaction`].
pub async fn commit_transaction(
    txn: DatabaseTransaction,
    operation: &'static str,
) -> Result<(), ServiceError> {
    txn.commit().await.map_err(ServiceError::db_error)?;
    counter!("build_engine_db.transaction.committed", 1);
    debug!(operation, "Transaction committed");
    Ok(())
}

/// Adds a row lock (`SELECT ... FOR UPDATE`) to `select` on backends that
/// support row-level locking.
///
/// SQLite has no row locks; it serialises writers on the whole database, so
/// the select is returned unchanged there.
pub fn for_update<E, C>(select: Select<E>, conn: &C) -> Select<E>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    match conn.get_database_backend() {
        DbBackend::Postgres | DbBackend::MySql => select.lock_exclusive(),
        DbBackend::Sqlite => select,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::stock_item;
    use sea_orm::{DatabaseBackend, QueryTrait};

    #[test]
    fn postgres_selects_are_locked() {
        let conn = sea_orm::MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let sql = for_update(stock_item::Entity::find_by_id(1i64), &conn)
            .build(DatabaseBackend::Postgres)
            .to_string();
        assert!(sql.ends_with("FOR UPDATE"), "unexpected SQL: {sql}");
    }

    #[test]
    fn sqlite_selects_are_unchanged() {
        let conn = sea_orm::MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let sql = for_update(stock_item::Entity::find_by_id(1i64), &conn)
            .build(DatabaseBackend::Sqlite)
            .to_string();
        assert!(!sql.contains("FOR UPDATE"), "unexpected SQL: {sql}");
    }
}
