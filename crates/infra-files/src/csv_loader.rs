// CSV Loader

use std::fs::File;

use csv::{ReaderBuilder, StringRecord, Trim};
use sluice_core::domain::RowStream;
use sluice_core::error::{AppError, Result};
use sluice_core::operations::loaders::zip_row;
use sluice_core::operations::{LocalFile, Loader, Operation};
use sluice_core::step_with;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvOptions {
    pub fn delimited_by(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

/// Streams the rows of a CSV file with a header line
///
/// Ragged rows are zipped against the header; blank lines are skipped.
pub struct CsvLoader {
    options: CsvOptions,
}

impl CsvLoader {
    pub fn new(options: CsvOptions) -> Self {
        Self { options }
    }
}

impl Loader for CsvLoader {
    fn load(&self, file: &LocalFile) -> Result<RowStream> {
        step_with("load_csv", file.remote(), || {
            let handle = File::open(file.path())?;
            let mut reader = ReaderBuilder::new()
                .delimiter(self.options.delimiter)
                .flexible(true)
                .trim(Trim::All)
                .from_reader(handle);

            let remote = file.remote().to_string();
            let headers: Vec<String> = reader
                .headers()
                .map_err(|e| map_csv_error(&remote, e))?
                .iter()
                .map(str::to_string)
                .collect();
            debug!(file = %remote, columns = headers.len(), "Loading CSV");

            let rows = reader.into_records().filter_map(move |record| match record {
                Ok(record) if is_blank(&record) => None,
                Ok(record) => Some(Ok(zip_row(&headers, record.iter()))),
                Err(e) => Some(Err(map_csv_error(&remote, e))),
            });
            let rows: RowStream = Box::new(rows);
            Ok(rows)
        })
    }
}

impl Operation for CsvLoader {
    type Interface = dyn Loader;
    type Args = CsvOptions;

    fn create(options: CsvOptions) -> Result<Box<dyn Loader>> {
        Ok(Box::new(CsvLoader::new(options)))
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

fn map_csv_error(file: &str, error: csv::Error) -> AppError {
    match error.into_kind() {
        csv::ErrorKind::Io(e) => AppError::Io(e),
        kind => AppError::Data(format!("{}: {:?}", file, kind)),
    }
}
