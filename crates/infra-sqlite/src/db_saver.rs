// DB Saver - parameterized writes into a registered SQLite database

use sluice_core::current_job;
use sluice_core::domain::{Tuple, TupleStream, Value};
use sluice_core::error::Result;
use sluice_core::facilities::{DatabaseParams, DbRegistry};
use sluice_core::operations::{Destination, Operation, Saver};
use sluice_core::{step, step_with};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use tracing::debug;

use crate::connection::SqliteDatabase;
use crate::error::map_sqlx_error;

/// Rows written per transaction
pub const BATCH_SIZE: usize = 15_000;

/// Runs every statement of the destination query once per tuple
///
/// Tuples are bound positionally. Each batch is one transaction, so a failing
/// row rolls back its own batch only.
pub struct DbSaver {
    destination: Destination,
    database: SqliteDatabase,
    batch_size: usize,
}

impl DbSaver {
    pub fn connect(destination: Destination, params: &DatabaseParams) -> Result<Self> {
        let database = SqliteDatabase::open(&params.url, params.max_connections)?;
        Ok(Self {
            destination,
            database,
            batch_size: BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn write_batch(&self, statements: &[String], batch: &[Tuple]) -> Result<()> {
        self.database.block_on(async {
            let mut tx = self.database.pool().begin().await.map_err(map_sqlx_error)?;
            for tuple in batch {
                for statement in statements {
                    let query = tuple
                        .iter()
                        .fold(sqlx::query(statement), |query, value| bind_value(query, value));
                    query.execute(&mut *tx).await.map_err(map_sqlx_error)?;
                }
            }
            tx.commit().await.map_err(map_sqlx_error)
        })?;
        debug!(destination = %self.destination.describe(), rows = batch.len(), "Batch committed");
        Ok(())
    }
}

pub(crate) fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Text(text) => query.bind(text.clone()),
        Value::Integer(number) => query.bind(*number),
        Value::Decimal(number) => query.bind(*number),
        Value::Boolean(flag) => query.bind(*flag),
        Value::Date(date) => query.bind(*date),
        Value::DateTime(datetime) => query.bind(*datetime),
    }
}

impl Saver for DbSaver {
    fn save(&self, rows: TupleStream) -> Result<usize> {
        step_with("save", self.destination.describe(), || {
            let statements = self.destination.statements()?;
            let mut batch = Vec::with_capacity(self.batch_size.min(1024));
            let mut written = 0;
            for tuple in rows {
                batch.push(tuple?);
                if batch.len() == self.batch_size {
                    self.write_batch(&statements, &batch)?;
                    written += batch.len();
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                self.write_batch(&statements, &batch)?;
                written += batch.len();
            }
            Ok(written)
        })
    }

    fn save_marker(&self) -> Result<()> {
        step("save_marker", || {
            let statements = self.destination.statements()?;
            self.write_batch(&statements, &[Tuple::new()])
        })
    }
}

impl Operation for DbSaver {
    type Interface = dyn Saver;
    type Args = Destination;

    fn create(destination: Destination) -> Result<Box<dyn Saver>> {
        let job = current_job()?;
        let params = job.facility_ref::<DbRegistry>()?.get_database(&destination.database)?;
        Ok(Box::new(DbSaver::connect(destination, &params)?))
    }
}
