// sqlx::Error -> AppError
//
// Orphan rules prevent `impl From<sqlx::Error> for AppError` here, so errors
// are mapped explicitly with `.map_err(map_sqlx_error)`.

use jobq_core::error::AppError;

/// SQLite primary-result and extended codes: https://www.sqlite.org/rescode.html
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_CHECK: &str = "275";
const SQLITE_BUSY: &str = "5";
const SQLITE_FULL: &str = "13";

/// Convert sqlx::Error to AppError with structured information
pub fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => {
                let code = code.as_ref();
                match code {
                    SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => AppError::Database(
                        format!("Unique constraint violation: {} ({})", db_err.message(), code),
                    ),
                    SQLITE_CONSTRAINT_FOREIGNKEY => AppError::Database(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code
                    )),
                    SQLITE_CONSTRAINT_CHECK => AppError::Database(format!(
                        "Check constraint violation: {} ({})",
                        db_err.message(),
                        code
                    )),
                    SQLITE_BUSY => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    SQLITE_FULL => {
                        AppError::Database(format!("Database full: {}", db_err.message()))
                    }
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code,
                        db_err.message()
                    )),
                }
            }
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            AppError::Database(format!("Store unavailable: {}", err))
        }
        _ => AppError::Database(err.to_string()),
    }
}

/// True for a duplicate primary key / unique index
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some(SQLITE_CONSTRAINT_UNIQUE) | Some(SQLITE_CONSTRAINT_PRIMARYKEY)
        ),
        _ => false,
    }
}

/// A stored value that no longer decodes
pub fn corrupt(column: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::Database(format!("Corrupt value in column {}: {}", column, detail))
}
