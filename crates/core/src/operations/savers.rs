// Savers - write tuple streams to a destination

use std::path::PathBuf;

use tracing::debug;

use crate::context::{step, step_with};
use crate::domain::TupleStream;
use crate::error::{AppError, Result};
use crate::operations::{Mockable, Operation};

/// Where the write query comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Inline(String),
    File(PathBuf),
}

impl QuerySource {
    /// The SQL text, read from disk for `File`
    pub fn text(&self) -> Result<String> {
        match self {
            QuerySource::Inline(sql) => Ok(sql.clone()),
            QuerySource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("cannot read query file {}: {}", path.display(), e))
            }),
        }
    }

    pub(crate) fn label(&self) -> String {
        match self {
            QuerySource::Inline(_) => "inline query".to_string(),
            QuerySource::File(path) => path.display().to_string(),
        }
    }
}

/// Database alias plus the parameterized query to run against it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub database: String,
    pub query: QuerySource,
}

impl Destination {
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

    pub fn query_text(&self) -> Result<String> {
        self.query.text()
    }

    /// Statements of the query, split on `";\n"`
    pub fn statements(&self) -> Result<Vec<String>> {
        Ok(split_statements(&self.query_text()?))
    }

    /// Short form for logs: `warehouse <- sql/insert.sql`
    pub fn describe(&self) -> String {
        format!("{} <- {}", self.database, self.query.label())
    }
}

/// Each statement ends with a semicolon and a newline, optional for the last
pub fn split_statements(text: &str) -> Vec<String> {
    text.split(";\n")
        .map(str::trim)
        .map(|s| s.trim_end_matches(';').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub trait Saver {
    /// Write every tuple, returning how many were written
    fn save(&self, rows: TupleStream) -> Result<usize>;

    /// Run each statement once without parameters, e.g. a "job finished" marker
    fn save_marker(&self) -> Result<()>;
}

impl Mockable for dyn Saver {
    fn default_noop() -> Box<Self> {
        Box::new(PrintSaver::new(None))
    }
}

/// Logs tuples instead of writing them
pub struct PrintSaver {
    destination: Option<Destination>,
}

impl PrintSaver {
    pub fn new(destination: Option<Destination>) -> Self {
        Self { destination }
    }

    fn label(&self) -> String {
        self.destination
            .as_ref()
            .map(Destination::describe)
            .unwrap_or_else(|| "print".to_string())
    }
}

impl Saver for PrintSaver {
    fn save(&self, rows: TupleStream) -> Result<usize> {
        step_with("save", self.label(), || {
            let mut count = 0;
            for tuple in rows {
                let tuple = tuple?;
                debug!(destination = %self.label(), row = ?tuple, "Save with data");
                count += 1;
            }
            Ok(count)
        })
    }

    fn save_marker(&self) -> Result<()> {
        step("save_marker", || {
            debug!(destination = %self.label(), "Save with no data");
            Ok(())
        })
    }
}

impl Operation for PrintSaver {
    type Interface = dyn Saver;
    type Args = Destination;

    fn create(destination: Destination) -> Result<Box<dyn Saver>> {
        Ok(Box::new(PrintSaver::new(Some(destination))))
    }
}

pub mod mocks {
    use super::*;
    use crate::domain::Tuple;
    use std::sync::{Arc, Mutex};

    /// Records what was saved; can be told to fail after N rows
    #[derive(Clone, Default)]
    pub struct RecordingSaver {
        pub rows: Arc<Mutex<Vec<Tuple>>>,
        pub markers: Arc<Mutex<usize>>,
        pub fail_after: Option<usize>,
    }

    impl RecordingSaver {
        pub fn failing_after(rows: usize) -> Self {
            Self {
                fail_after: Some(rows),
                ..Self::default()
            }
        }

        pub fn saved(&self) -> Vec<Tuple> {
            self.rows.lock().unwrap().clone()
        }

        pub fn marker_count(&self) -> usize {
            *self.markers.lock().unwrap()
        }
    }

    impl Saver for RecordingSaver {
        fn save(&self, rows: TupleStream) -> Result<usize> {
            let mut count = 0;
            for tuple in rows {
                if self.fail_after == Some(count) {
                    return Err(AppError::Database("disk I/O error".to_string()));
                }
                self.rows.lock().unwrap().push(tuple?);
                count += 1;
            }
            Ok(count)
        }

        fn save_marker(&self) -> Result<()> {
            *self.markers.lock().unwrap() += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;

    #[test]
    fn test_split_statements() {
        let sql = "DELETE FROM staging;\nINSERT INTO log VALUES (1);\n\n  UPDATE x SET y = 1;";
        assert_eq!(
            split_statements(sql),
            vec![
                "DELETE FROM staging",
                "INSERT INTO log VALUES (1)",
                "UPDATE x SET y = 1"
            ]
        );
        assert!(split_statements("  \n").is_empty());
    }

    #[test]
    fn test_query_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insert.sql");
        std::fs::write(&path, "INSERT INTO t VALUES (?);\n").unwrap();

        let destination = Destination::file("warehouse", &path);
        assert_eq!(destination.statements().unwrap(), vec!["INSERT INTO t VALUES (?)"]);

        let missing = Destination::file("warehouse", dir.path().join("nope.sql"));
        assert!(matches!(missing.query_text(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_print_saver_counts() {
        let saver = PrintSaver::new(Some(Destination::inline("db", "INSERT")));
        let rows: TupleStream = Box::new(
            vec![Ok(vec![Value::Integer(1)]), Ok(vec![Value::Integer(2)])].into_iter(),
        );
        assert_eq!(saver.save(rows).unwrap(), 2);
        saver.save_marker().unwrap();
    }
}
