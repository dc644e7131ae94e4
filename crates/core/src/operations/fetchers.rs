// Fetchers - bring remote files to local paths
//
// Every public call runs as a step of the current job, so the logger and
// profiler see each search and retrieval.

use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, error, warn};

use crate::context::step_with;
use crate::error::{AppError, Result};
use crate::operations::{Mockable, Operation};
use crate::port::{FileSession, FileTransport};

/// What to look for on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Shell-style pattern with `*`, `?` and `[...]`, matched against entry names
    Glob { directory: String, pattern: String },
    /// Regular expression anchored at the start of the entry name
    Regex { directory: String, pattern: String },
    /// Ordered header criteria, e.g. `("Subject__contains", "Daily report")`
    Mail {
        mailbox: String,
        criteria: Vec<(String, String)>,
    },
    /// Explicit remote names, no lookup
    Files(Vec<String>),
}

impl SearchQuery {
    pub fn glob(directory: impl Into<String>, pattern: impl Into<String>) -> Self {
        SearchQuery::Glob {
            directory: directory.into(),
            pattern: pattern.into(),
        }
    }

    pub fn files<S: AsRef<str>>(files: &[S]) -> Self {
        SearchQuery::Files(files.iter().map(|f| f.as_ref().to_string()).collect())
    }
}

/// A fetched file on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    remote: String,
    path: PathBuf,
}

impl LocalFile {
    pub fn new(remote: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.into(),
            path: path.into(),
        }
    }

    /// A local file that was never remote
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            remote: path.display().to_string(),
            path,
        }
    }

    /// Name the file had on the remote side
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(LocalFile),
    /// The server refused this one file (missing, no permission)
    Unavailable { remote: String, reason: String },
}

impl FetchOutcome {
    pub fn file(self) -> Option<LocalFile> {
        match self {
            FetchOutcome::Fetched(file) => Some(file),
            FetchOutcome::Unavailable { .. } => None,
        }
    }

    fn from_result(remote: &str, result: Result<LocalFile>) -> Result<Self> {
        match result {
            Ok(file) => Ok(FetchOutcome::Fetched(file)),
            Err(AppError::FileUnavailable { reason, .. }) => Ok(FetchOutcome::Unavailable {
                remote: remote.to_string(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }
}

pub trait Fetcher {
    /// Remote names matching `query`
    fn search(&self, query: &SearchQuery) -> Result<Vec<String>>;

    /// Retrieve one file; a missing or forbidden file is an error
    fn fetch_file(&self, remote: &str) -> Result<LocalFile>;

    /// Retrieve one file, reporting a missing or forbidden file as
    /// `Unavailable` instead of failing; connection errors still fail
    fn fetch_file_if_exists(&self, remote: &str) -> Result<FetchOutcome> {
        FetchOutcome::from_result(remote, self.fetch_file(remote))
    }

    fn fetch_files(&self, remotes: &[String]) -> Result<Vec<LocalFile>> {
        remotes.iter().map(|r| self.fetch_file(r)).collect()
    }

    fn fetch_files_if_exist(&self, remotes: &[String]) -> Result<Vec<FetchOutcome>> {
        remotes.iter().map(|r| self.fetch_file_if_exists(r)).collect()
    }

    fn fetch_from_search(&self, query: &SearchQuery) -> Result<Vec<LocalFile>> {
        let found = self.search(query)?;
        self.fetch_files(&found)
    }
}

impl Mockable for dyn Fetcher {
    fn default_noop() -> Box<Self> {
        Box::new(NoOpFetcher::default())
    }
}

/// Treats remote names as local paths
///
/// Searches only answer `SearchQuery::Files`, every other query finds nothing.
#[derive(Debug, Clone, Default)]
pub struct NoOpFetcher {
    root: Option<PathBuf>,
}

impl NoOpFetcher {
    /// Resolve remote names relative to `root`
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl Fetcher for NoOpFetcher {
    fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        step_with("search", format!("{:?}", query), || match query {
            SearchQuery::Files(files) => Ok(files.clone()),
            _ => Ok(Vec::new()),
        })
    }

    fn fetch_file(&self, remote: &str) -> Result<LocalFile> {
        step_with("fetch_file", format!("{:?}", remote), || {
            let path = match &self.root {
                Some(root) => root.join(remote),
                None => PathBuf::from(remote),
            };
            Ok(LocalFile::new(remote, path))
        })
    }

    fn fetch_from_search(&self, query: &SearchQuery) -> Result<Vec<LocalFile>> {
        step_with("fetch_from_search", format!("{:?}", query), || {
            let found = self.search(query)?;
            self.fetch_files(&found)
        })
    }
}

impl Operation for NoOpFetcher {
    type Interface = dyn Fetcher;
    type Args = ();

    fn create(_args: ()) -> Result<Box<dyn Fetcher>> {
        Ok(Box::new(NoOpFetcher::default()))
    }
}

/// Fetcher over any [`FileTransport`]
///
/// One session is opened per call. Directory listings are filtered locally.
/// Each retrieved file lands in a temporary file carrying the remote suffix;
/// deleting it is the job of a `FileDeleter`.
pub struct RemoteFetcher<T: FileTransport> {
    transport: T,
}

impl<T: FileTransport> RemoteFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut dyn FileSession) -> Result<R>) -> Result<R> {
        let mut session = self.transport.connect()?;
        let result = f(session.as_mut());
        session.close();
        result
    }

    fn search_in(&self, session: &mut dyn FileSession, query: &SearchQuery) -> Result<Vec<String>> {
        let (directory, matcher) = match query {
            SearchQuery::Files(files) => return Ok(files.clone()),
            SearchQuery::Glob { directory, pattern } => (directory, glob_to_regex(pattern)?),
            SearchQuery::Regex { directory, pattern } => (directory, anchored_regex(pattern)?),
            SearchQuery::Mail { .. } => {
                return Err(AppError::Config(format!(
                    "{} cannot answer mail searches",
                    self.transport.describe()
                )))
            }
        };

        let mut found: Vec<String> = session
            .list(directory)?
            .into_iter()
            .filter(|name| matcher.is_match(name))
            .map(|name| join_remote(directory, &name))
            .collect();
        found.sort();
        debug!(target_server = %self.transport.describe(), directory = %directory, found = found.len(), "Remote search");
        Ok(found)
    }

    fn retrieve_in(&self, session: &mut dyn FileSession, remote: &str) -> Result<LocalFile> {
        let content = session.retrieve(remote).map_err(|e| {
            if e.is_file_unavailable() {
                error!(target_server = %self.transport.describe(), remote = %remote, error = %e, "Failed to get remote file");
            }
            e
        })?;
        let path = save_temp(&content, &suffix_of(remote))?;
        debug!(remote = %remote, local = %path.display(), bytes = content.len(), "Fetched");
        Ok(LocalFile::new(remote, path))
    }

    /// All of `remotes` or none: files already written are removed on failure
    fn retrieve_all_in(&self, session: &mut dyn FileSession, remotes: &[String]) -> Result<Vec<LocalFile>> {
        let mut batch = TempBatch::default();
        for remote in remotes {
            batch.push(self.retrieve_in(session, remote)?);
        }
        Ok(batch.keep())
    }
}

impl<T: FileTransport> Fetcher for RemoteFetcher<T> {
    fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        step_with("search", format!("{:?}", query), || {
            self.with_session(|session| self.search_in(session, query))
        })
    }

    fn fetch_file(&self, remote: &str) -> Result<LocalFile> {
        step_with("fetch_file", format!("{:?}", remote), || {
            self.with_session(|session| self.retrieve_in(session, remote))
        })
    }

    fn fetch_file_if_exists(&self, remote: &str) -> Result<FetchOutcome> {
        step_with("fetch_file_if_exists", format!("{:?}", remote), || {
            self.with_session(|session| {
                FetchOutcome::from_result(remote, self.retrieve_in(session, remote))
            })
        })
    }

    fn fetch_files(&self, remotes: &[String]) -> Result<Vec<LocalFile>> {
        step_with("fetch_files", format!("{:?}", remotes), || {
            self.with_session(|session| self.retrieve_all_in(session, remotes))
        })
    }

    fn fetch_files_if_exist(&self, remotes: &[String]) -> Result<Vec<FetchOutcome>> {
        step_with("fetch_files_if_exist", format!("{:?}", remotes), || {
            self.with_session(|session| {
                let mut batch = TempBatch::default();
                let mut outcomes = Vec::with_capacity(remotes.len());
                for remote in remotes {
                    let outcome =
                        FetchOutcome::from_result(remote, self.retrieve_in(session, remote))?;
                    match &outcome {
                        FetchOutcome::Fetched(file) => batch.push(file.clone()),
                        FetchOutcome::Unavailable { reason, .. } => {
                            warn!(remote = %remote, reason = %reason, "Skipping unavailable file")
                        }
                    }
                    outcomes.push(outcome);
                }
                batch.keep();
                Ok(outcomes)
            })
        })
    }

    fn fetch_from_search(&self, query: &SearchQuery) -> Result<Vec<LocalFile>> {
        step_with("fetch_from_search", format!("{:?}", query), || {
            self.with_session(|session| {
                let found = self.search_in(session, query)?;
                self.retrieve_all_in(session, &found)
            })
        })
    }
}

/// Temporary files written by one fetch call
///
/// Dropping the batch removes them, so a call that fails halfway leaves
/// nothing behind; `keep` hands them to the caller instead.
#[derive(Default)]
pub(crate) struct TempBatch {
    files: Vec<LocalFile>,
}

impl TempBatch {
    pub(crate) fn push(&mut self, file: LocalFile) {
        self.files.push(file);
    }

    pub(crate) fn keep(mut self) -> Vec<LocalFile> {
        std::mem::take(&mut self.files)
    }
}

impl Drop for TempBatch {
    fn drop(&mut self) {
        for file in &self.files {
            match std::fs::remove_file(file.path()) {
                Ok(()) => debug!(path = %file.path().display(), "Removed partially fetched file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.path().display(), error = %e, "Could not remove partially fetched file")
                }
            }
        }
    }
}

/// Write `content` to a new temporary file that outlives this process
pub fn save_temp(content: &[u8], suffix: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("sluice-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(content)?;
    file.flush()?;
    file.into_temp_path()
        .keep()
        .map_err(|e| AppError::Io(e.error))
}

/// `.csv` for `incoming/report.csv`, empty when there is no extension
fn suffix_of(remote: &str) -> String {
    Path::new(remote)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

fn join_remote(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", directory.trim_end_matches('/'), name)
    }
}

fn anchored_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})", pattern))
        .map_err(|e| AppError::Config(format!("invalid search regex '{}': {}", pattern, e)))
}

/// Translate a shell-style pattern into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed {
                    translated.push('[');
                    translated.push_str(&class);
                    translated.push(']');
                } else {
                    translated.push_str(&regex::escape(&format!("[{}", class)));
                }
            }
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
        .map_err(|e| AppError::Config(format!("invalid search pattern '{}': {}", pattern, e)))
}
