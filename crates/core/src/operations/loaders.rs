// Loaders - parse local files into row streams

use crate::domain::RowStream;
use crate::error::Result;
use crate::operations::{LocalFile, Mockable, Operation};

/// Turns a local file into a lazy, single-pass stream of rows
///
/// Header names and cell values are trimmed. An empty or header-only file
/// gives an empty stream.
pub trait Loader {
    fn load(&self, file: &LocalFile) -> Result<RowStream>;
}

impl Mockable for dyn Loader {
    fn default_noop() -> Box<Self> {
        Box::new(NoOpLoader)
    }
}

/// Yields no rows
pub struct NoOpLoader;

impl Loader for NoOpLoader {
    fn load(&self, _file: &LocalFile) -> Result<RowStream> {
        Ok(Box::new(std::iter::empty()))
    }
}

impl Operation for NoOpLoader {
    type Interface = dyn Loader;
    type Args = ();

    fn create(_args: ()) -> Result<Box<dyn Loader>> {
        Ok(Box::new(NoOpLoader))
    }
}

/// Pairs headers with cells, dropping surplus cells and omitting missing ones
pub fn zip_row<H, C>(headers: &[H], cells: C) -> crate::domain::Row
where
    H: AsRef<str>,
    C: IntoIterator,
    C::Item: AsRef<str>,
{
    headers
        .iter()
        .zip(cells)
        .map(|(header, cell)| {
            (
                header.as_ref().trim().to_string(),
                crate::domain::Value::text(cell.as_ref().trim()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{row, Value};

    #[test]
    fn test_noop_loader_is_empty() {
        let rows = NoOpLoader.load(&LocalFile::from_path("whatever.csv")).unwrap();
        assert_eq!(rows.count(), 0);
    }

    #[test]
    fn test_zip_row_trims_and_handles_ragged_input() {
        let headers = vec![" a ", "b", "c"];
        assert_eq!(
            zip_row(&headers, vec![" 1", "2 "]),
            row([("a", Value::text("1")), ("b", Value::text("2"))])
        );
        assert_eq!(
            zip_row(&headers, vec!["1", "2", "3", "4"]).len(),
            3
        );
    }
}
