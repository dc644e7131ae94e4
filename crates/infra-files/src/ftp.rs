// FTP Transport (blocking suppaftp client)

use std::time::Duration;

use sluice_core::current_job;
use sluice_core::error::{AppError, Result};
use sluice_core::facilities::{FtpRegistry, FtpServer};
use sluice_core::operations::{Fetcher, Operation, RemoteFetcher};
use sluice_core::port::{FileSession, FileTransport};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::{debug, warn};

/// Replies meaning "this one file", not "this server": unavailable,
/// not found, not allowed
const FILE_REPLY_CODES: [u32; 3] = [450, 550, 553];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Map a suppaftp error for `path` onto the application taxonomy
pub fn map_ftp_error(path: &str, error: FtpError) -> AppError {
    match error {
        FtpError::UnexpectedResponse(response)
            if FILE_REPLY_CODES.contains(&response.status.code()) =>
        {
            AppError::FileUnavailable {
                path: path.to_string(),
                reason: format!(
                    "{} {}",
                    response.status.code(),
                    String::from_utf8_lossy(&response.body).trim()
                ),
            }
        }
        other => AppError::Transport(format!("{}: {}", path, other)),
    }
}

/// One FTP server from the registry
pub struct FtpTransport {
    server: FtpServer,
}

impl FtpTransport {
    pub fn new(server: FtpServer) -> Self {
        Self { server }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl FileTransport for FtpTransport {
    fn connect(&self) -> Result<Box<dyn FileSession>> {
        let address = self.address();
        debug!(address = %address, user = %self.server.username, "Connecting to FTP server");

        let socket = std::net::ToSocketAddrs::to_socket_addrs(address.as_str())
            .map_err(|e| AppError::Transport(format!("{}: {}", address, e)))?
            .next()
            .ok_or_else(|| AppError::Transport(format!("{}: no address", address)))?;
        let mut stream = FtpStream::connect_timeout(socket, CONNECT_TIMEOUT)
            .map_err(|e| AppError::Transport(format!("{}: {}", address, e)))?;
        stream
            .login(&self.server.username, &self.server.password)
            .map_err(|e| AppError::Transport(format!("{}: login failed: {}", address, e)))?;
        stream.set_mode(if self.server.passive {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| AppError::Transport(format!("{}: {}", address, e)))?;

        Ok(Box::new(FtpSession { stream }))
    }

    fn describe(&self) -> String {
        format!("ftp://{}", self.address())
    }
}

pub struct FtpSession {
    stream: FtpStream,
}

impl FileSession for FtpSession {
    fn list(&mut self, directory: &str) -> Result<Vec<String>> {
        let names = self
            .stream
            .nlst(Some(directory))
            .map_err(|e| map_ftp_error(directory, e))?;
        // some servers answer NLST with full paths
        Ok(names
            .into_iter()
            .map(|name| name.rsplit('/').next().unwrap_or_default().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>> {
        self.stream
            .retr_as_buffer(path)
            .map(|buffer| buffer.into_inner())
            .map_err(|e| map_ftp_error(path, e))
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.quit() {
            warn!(error = %e, "Failed to quit FTP session gracefully");
        }
    }
}

/// Fetcher operation for an `ftp_registry` alias
///
/// # Example
/// ```text
/// let fetcher = construct::<FtpFetcher>("partner_ftp".to_string())?;
/// let files = fetcher.fetch_from_search(&SearchQuery::glob("/out", "*.csv"))?;
/// ```
pub struct FtpFetcher;

impl Operation for FtpFetcher {
    type Interface = dyn Fetcher;
    type Args = String;

    fn create(alias: String) -> Result<Box<dyn Fetcher>> {
        let job = current_job()?;
        let server = job.facility_ref::<FtpRegistry>()?.get_ftp_server(&alias)?;
        Ok(Box::new(RemoteFetcher::new(FtpTransport::new(server))))
    }
}
