// Excel Loader (feature "excel")

use calamine::{open_workbook_auto, Reader};
use sluice_core::domain::{stream_rows, Row, RowStream};
use sluice_core::error::{AppError, Result};
use sluice_core::operations::loaders::zip_row;
use sluice_core::operations::{LocalFile, Loader, Operation};
use sluice_core::step_with;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcelOptions {
    /// Sheet to read; the first one when absent
    pub sheet: Option<String>,
}

/// Reads one sheet of a workbook, first row as header, cells as trimmed text
pub struct ExcelLoader {
    options: ExcelOptions,
}

impl ExcelLoader {
    pub fn new(options: ExcelOptions) -> Self {
        Self { options }
    }
}

impl Loader for ExcelLoader {
    fn load(&self, file: &LocalFile) -> Result<RowStream> {
        step_with("load_excel", file.remote(), || {
            let mut workbook = open_workbook_auto(file.path())
                .map_err(|e| AppError::Data(format!("{}: {}", file.remote(), e)))?;

            let sheet = match &self.options.sheet {
                Some(sheet) => sheet.clone(),
                None => workbook.sheet_names().first().cloned().ok_or_else(|| {
                    AppError::Data(format!("{}: workbook has no sheets", file.remote()))
                })?,
            };
            let range = workbook
                .worksheet_range(&sheet)
                .map_err(|e| AppError::Data(format!("{} [{}]: {}", file.remote(), sheet, e)))?;

            let mut lines = range
                .rows()
                .map(|cells| cells.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
            let headers = lines.next().unwrap_or_default();
            let rows: Vec<Row> = lines
                .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
                .map(|cells| zip_row(&headers, cells))
                .collect();
            debug!(file = %file.remote(), sheet = %sheet, rows = rows.len(), "Loaded sheet");
            Ok(stream_rows(rows))
        })
    }
}

impl Operation for ExcelLoader {
    type Interface = dyn Loader;
    type Args = ExcelOptions;

    fn create(options: ExcelOptions) -> Result<Box<dyn Loader>> {
        Ok(Box::new(ExcelLoader::new(options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_workbook_is_data_error() {
        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        std::fs::write(file.path(), b"not a workbook").unwrap();
        let local = LocalFile::new("report.xlsx", file.path().to_path_buf());

        let err = ExcelLoader::new(ExcelOptions::default()).load(&local).err().unwrap();
        assert_eq!(err.kind(), "data");
        assert!(err.to_string().contains("report.xlsx"));
    }
}
