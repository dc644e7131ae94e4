// DB Loader - parameterized reads from a registered SQLite database

use sluice_core::current_job;
use sluice_core::domain::{stream_rows, Row, RowStream, Value};
use sluice_core::error::Result;
use sluice_core::facilities::{DatabaseParams, DbRegistry};
use sluice_core::operations::{DbLoader, DbSource, Operation};
use sluice_core::step_with;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, ValueRef};
use tracing::debug;

use crate::connection::SqliteDatabase;
use crate::db_saver::bind_value;
use crate::error::map_sqlx_error;

/// Runs the source query with positional parameters
///
/// Columns come back by storage class: integers, reals and text map to the
/// matching `Value`, NULL to `Value::Null`.
pub struct SqliteDbLoader {
    source: DbSource,
    query: String,
    database: SqliteDatabase,
}

impl SqliteDbLoader {
    pub fn connect(source: DbSource, params: &DatabaseParams) -> Result<Self> {
        let query = source.query.text()?;
        let database = SqliteDatabase::open(&params.url, params.max_connections)?;
        Ok(Self {
            source,
            query,
            database,
        })
    }

    fn fetch(&self, params: &[Value], limit_one: bool) -> Result<Vec<Row>> {
        let rows = self.database.block_on(async {
            let query = params
                .iter()
                .fold(sqlx::query(&self.query), |query, value| bind_value(query, value));
            if limit_one {
                query
                    .fetch_optional(self.database.pool())
                    .await
                    .map(|row| row.into_iter().collect::<Vec<_>>())
            } else {
                query.fetch_all(self.database.pool()).await
            }
        });
        let rows = rows.map_err(map_sqlx_error)?;
        debug!(source = %self.source.describe(), rows = rows.len(), "Query answered");
        rows.iter().map(to_row).collect()
    }
}

fn to_row(row: &SqliteRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_string(), column_value(row, column.ordinal())?)))
        .collect()
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value> {
    if row.try_get_raw(index).map_err(map_sqlx_error)?.is_null() {
        return Ok(Value::Null);
    }
    if let Ok(number) = row.try_get::<i64, _>(index) {
        return Ok(Value::Integer(number));
    }
    if let Ok(number) = row.try_get::<f64, _>(index) {
        return Ok(Value::Decimal(number));
    }
    if let Ok(text) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(text));
    }
    let bytes: Vec<u8> = row.try_get(index).map_err(map_sqlx_error)?;
    Ok(Value::Text(String::from_utf8_lossy(&bytes).into_owned()))
}

impl DbLoader for SqliteDbLoader {
    fn get_single(&self, params: &[Value]) -> Result<Option<Row>> {
        step_with("get_single", self.source.describe(), || {
            Ok(self.fetch(params, true)?.into_iter().next())
        })
    }

    fn get_multiple(&self, params: &[Value]) -> Result<RowStream> {
        step_with("get_multiple", self.source.describe(), || {
            Ok(stream_rows(self.fetch(params, false)?))
        })
    }
}

impl Operation for SqliteDbLoader {
    type Interface = dyn DbLoader;
    type Args = DbSource;

    fn create(source: DbSource) -> Result<Box<dyn DbLoader>> {
        let job = current_job()?;
        let params = job.facility_ref::<DbRegistry>()?.get_database(&source.database)?;
        Ok(Box::new(SqliteDbLoader::connect(source, &params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbSaver;
    use sluice_core::operations::{Destination, Saver};

    fn params(dir: &tempfile::TempDir) -> DatabaseParams {
        DatabaseParams {
            url: format!("sqlite://{}", dir.path().join("warehouse.db").display()),
            max_connections: 1,
            is_disposable: true,
        }
    }

    fn seeded() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        DbSaver::connect(
            Destination::inline(
                "warehouse",
                "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, score REAL);\n\
                 INSERT INTO people VALUES (1, 'ada', 1.5);\n\
                 INSERT INTO people VALUES (2, 'bob', NULL);",
            ),
            &params(&dir),
        )
        .unwrap()
        .save_marker()
        .unwrap();
        dir
    }

    fn loader(dir: &tempfile::TempDir) -> SqliteDbLoader {
        SqliteDbLoader::connect(
            DbSource::inline(
                "warehouse",
                "SELECT id, name, score FROM people WHERE id >= ? ORDER BY id",
            ),
            &params(dir),
        )
        .unwrap()
    }

    #[test]
    fn test_get_multiple_maps_columns_by_name() {
        let dir = seeded();
        let rows: Vec<Row> = loader(&dir)
            .get_multiple(&[Value::Integer(1)])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], Value::Integer(1));
        assert_eq!(rows[0]["name"], Value::text("ada"));
        assert_eq!(rows[0]["score"], Value::Decimal(1.5));
        assert_eq!(rows[1]["score"], Value::Null);
    }

    #[test]
    fn test_get_single() {
        let dir = seeded();
        let loader = loader(&dir);

        let row = loader.get_single(&[Value::Integer(2)]).unwrap().unwrap();
        assert_eq!(row["name"], Value::text("bob"));
        assert_eq!(loader.get_single(&[Value::Integer(9)]).unwrap(), None);
    }

    #[test]
    fn test_bad_query_is_database_error() {
        let dir = seeded();
        let loader = SqliteDbLoader::connect(
            DbSource::inline("warehouse", "SELECT * FROM missing"),
            &params(&dir),
        )
        .unwrap();
        assert_eq!(loader.get_single(&[]).unwrap_err().kind(), "database");
    }

    #[test]
    fn test_create_needs_a_running_job() {
        assert!(SqliteDbLoader::create(DbSource::inline("warehouse", "SELECT 1")).is_err());
    }
}
