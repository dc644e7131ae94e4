// Sluice Infrastructure - File Adapters
// Implements: Loader (CSV, Excel), FileDeleter, FileTransport over FTP

mod csv_loader;
#[cfg(feature = "excel")]
mod excel_loader;
mod ftp;
mod local_deleter;

pub use csv_loader::{CsvLoader, CsvOptions};
#[cfg(feature = "excel")]
pub use excel_loader::{ExcelLoader, ExcelOptions};
pub use ftp::{map_ftp_error, FtpFetcher, FtpSession, FtpTransport};
pub use local_deleter::LocalFileDeleter;

use sluice_core::auto_mock_for_local_testing;

/// Swap the network fetcher and the deleter for no-ops in test-mode jobs
///
/// Test runs then read local fixture files in place and leave them there.
pub fn register_auto_mocks() {
    auto_mock_for_local_testing::<FtpFetcher>();
    auto_mock_for_local_testing::<LocalFileDeleter>();
}
