// Database Loaders - read rows back out of a registered database

use std::path::PathBuf;

use tracing::debug;

use crate::context::step_with;
use crate::domain::{stream_rows, Row, RowStream, Value};
use crate::error::Result;
use crate::operations::{Mockable, Operation, QuerySource};

/// Database alias plus the read query, with `?` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSource {
    pub database: String,
    pub query: QuerySource,
}

impl DbSource {
    pub fn inline(database: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            query: QuerySource::Inline(sql.into()),
        }
    }

    pub fn file(database: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            query: QuerySource::File(path.into()),
        }
    }

    /// `warehouse -> sql/lookup.sql`
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.database, self.query.label())
    }
}

/// Runs one query with positional parameters, rows as column name -> value
pub trait DbLoader {
    /// First row of the result, `None` when there is none
    fn get_single(&self, params: &[Value]) -> Result<Option<Row>>;

    /// Every row of the result
    fn get_multiple(&self, params: &[Value]) -> Result<RowStream>;
}

impl Mockable for dyn DbLoader {
    fn default_noop() -> Box<Self> {
        Box::new(NoOpDbLoader::default())
    }
}

/// Answers every query with an empty result
#[derive(Debug, Default)]
pub struct NoOpDbLoader {
    source: Option<DbSource>,
}

impl NoOpDbLoader {
    fn label(&self) -> String {
        self.source
            .as_ref()
            .map(DbSource::describe)
            .unwrap_or_else(|| "no-op".to_string())
    }
}

impl DbLoader for NoOpDbLoader {
    fn get_single(&self, params: &[Value]) -> Result<Option<Row>> {
        step_with("get_single", self.label(), || {
            debug!(source = %self.label(), params = ?params, "Query skipped");
            Ok(None)
        })
    }

    fn get_multiple(&self, params: &[Value]) -> Result<RowStream> {
        step_with("get_multiple", self.label(), || {
            debug!(source = %self.label(), params = ?params, "Query skipped");
            Ok(stream_rows(Vec::new()))
        })
    }
}

impl Operation for NoOpDbLoader {
    type Interface = dyn DbLoader;
    type Args = DbSource;

    fn create(source: DbSource) -> Result<Box<dyn DbLoader>> {
        Ok(Box::new(NoOpDbLoader {
            source: Some(source),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_noop_answers_nothing() {
        let loader = <dyn DbLoader as Mockable>::default_noop();
        assert_eq!(loader.get_single(&[Value::Integer(1)]).unwrap(), None);
        assert_eq!(loader.get_multiple(&[]).unwrap().count(), 0);
    }

    #[test]
    fn test_source_reads_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookup.sql");
        std::fs::write(&path, "SELECT name FROM people WHERE id = ?").unwrap();

        let source = DbSource::file("warehouse", &path);
        assert_eq!(
            source.query.text().unwrap(),
            "SELECT name FROM people WHERE id = ?"
        );
        assert_eq!(source.describe(), format!("warehouse -> {}", path.display()));

        let missing = DbSource::file("warehouse", dir.path().join("gone.sql"));
        assert!(matches!(missing.query.text(), Err(AppError::Config(_))));
    }
}
