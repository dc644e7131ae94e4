// sqlx::Error -> AppError
//
// Orphan rules forbid `From<sqlx::Error> for AppError` here, hence the helper.

use sluice_core::error::AppError;

/// Map a sqlx error onto `AppError::Database`, naming the SQLite result code
pub fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                Some(code @ ("2067" | "1555")) => AppError::Database(format!(
                    "Unique constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                Some(code @ ("787" | "3850")) => AppError::Database(format!(
                    "Foreign key constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                Some("5") => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                Some("13") => AppError::Database(format!("Database full: {}", db_err.message())),
                Some(code) => {
                    AppError::Database(format!("Database error [{}]: {}", code, db_err.message()))
                }
                None => AppError::Database(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert_eq!(err.to_string(), "Database error: Row not found");

        let err = map_sqlx_error(sqlx::Error::ColumnNotFound("profile".into()));
        assert!(err.to_string().contains("profile"));
    }
}
