// Terminal output: job reports and run summaries

use colored::Colorize;
use sluice_core::context::ReportSink;
use sluice_core::{ImportSummary, Result};
use tabled::Tabled;

/// Prints end-of-job report sections to stdout
pub struct StdoutReportSink;

impl ReportSink for StdoutReportSink {
    fn publish(&self, job_name: &str, title: &str, body: &str) {
        println!();
        println!("{}", format!("== {} ({}) ==", title, job_name).cyan().bold());
        println!("{}", body);
    }
}

/// One line of the `test --all` table
#[derive(Tabled)]
pub struct TestOutcome {
    pub importer: String,
    pub status: String,
    pub files: usize,
    pub rows: usize,
    pub detail: String,
}

impl TestOutcome {
    pub fn from_result(importer: &str, result: &Result<ImportSummary>) -> Self {
        match result {
            Ok(summary) => Self {
                importer: importer.to_string(),
                status: "OK".to_string(),
                files: summary.files,
                rows: summary.rows,
                detail: skipped(summary),
            },
            Err(e) => Self::failed(importer, e.to_string()),
        }
    }

    pub fn failed(importer: &str, detail: String) -> Self {
        Self {
            importer: importer.to_string(),
            status: "FAILED".to_string(),
            files: 0,
            rows: 0,
            detail,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

fn skipped(summary: &ImportSummary) -> String {
    if summary.unavailable.is_empty() {
        String::new()
    } else {
        format!("skipped: {}", summary.unavailable.join(", "))
    }
}

/// Colored one-line outcome of a single run
pub fn print_outcome(importer: &str, result: &Result<ImportSummary>) {
    match result {
        Ok(summary) => {
            println!(
                "{}",
                format!(
                    "✓ {}: {} rows from {} files",
                    importer, summary.rows, summary.files
                )
                .green()
                .bold()
            );
            let skipped = skipped(summary);
            if !skipped.is_empty() {
                println!("  {}", skipped.yellow());
            }
        }
        Err(e) => println!("{}", format!("✗ {}: {}", importer, e).red().bold()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::AppError;

    #[test]
    fn test_outcome_rows() {
        let ok = TestOutcome::from_result(
            "a",
            &Ok(ImportSummary {
                files: 2,
                rows: 10,
                unavailable: vec!["late.csv".to_string()],
            }),
        );
        assert!(ok.is_ok());
        assert_eq!(ok.detail, "skipped: late.csv");

        let failed = TestOutcome::from_result("b", &Err(AppError::Transport("refused".into())));
        assert!(!failed.is_ok());
        assert_eq!(failed.detail, "Transport error: refused");
    }
}
