// Email Fetcher - attachments of matching messages as local files

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::context::step_with;
use crate::error::{AppError, Result};
use crate::operations::fetchers::{glob_to_regex, save_temp, TempBatch};
use crate::operations::{FetchOutcome, Fetcher, LocalFile, Operation, SearchQuery};
use crate::port::{MailSession, MailTransport};

const CONTAINS_SUFFIX: &str = "__contains";

/// Header names that the server knows under another search key
const QUERY_FIELD_ALIASES: &[(&str, &str)] = &[("Date", "SentOn")];

/// Only `search` and `fetch_from_search` with a `SearchQuery::Mail` are
/// supported: messages have no stable file names to fetch one by one, so a
/// `FileImport` reads mail through `InputSet::Search`.
///
/// A criterion `("Subject", "Daily")` must match the header exactly, while
/// `("Subject__contains", "Daily")` is left to the server search.
pub struct EmailFetcher<T: MailTransport> {
    transport: T,
    pattern: Regex,
}

/// Construction arguments of [`EmailFetcher`]
#[derive(Clone)]
pub struct EmailFetcherArgs<T> {
    pub transport: T,
    /// Case-insensitive glob on attachment file names
    pub pattern: String,
}

impl<T: MailTransport> EmailFetcher<T> {
    pub fn new(transport: T, pattern: &str) -> Result<Self> {
        Ok(Self {
            transport,
            pattern: glob_to_regex(&pattern.to_lowercase())?,
        })
    }

    fn matching_messages(
        &self,
        session: &mut dyn MailSession,
        criteria: &[(String, String)],
    ) -> Result<Vec<String>> {
        let query = search_query(criteria);
        let candidates = session.search(&query)?;
        debug!(query = %query, candidates = candidates.len(), "Mail search");

        let mut matched = Vec::new();
        for id in candidates {
            let headers = session.headers(&id)?;
            if headers_match(&headers, criteria) {
                matched.push(id);
            }
        }
        Ok(matched)
    }

    fn save_attachments(
        &self,
        session: &mut dyn MailSession,
        id: &str,
        saved: &mut TempBatch,
    ) -> Result<()> {
        for attachment in session.attachments(id)? {
            if !self.pattern.is_match(&attachment.filename.to_lowercase()) {
                continue;
            }
            let path = save_temp(&attachment.content, &format!("-{}", attachment.filename))?;
            debug!(message_id = %id, attachment = %attachment.filename, local = %path.display(), "Saved attachment");
            saved.push(LocalFile::new(attachment.filename, path));
        }
        Ok(())
    }

    fn with_mailbox<R>(
        &self,
        query: &SearchQuery,
        f: impl FnOnce(&mut dyn MailSession, &[(String, String)]) -> Result<R>,
    ) -> Result<R> {
        let SearchQuery::Mail { mailbox, criteria } = query else {
            return Err(AppError::Config(
                "the email fetcher only answers mail searches".to_string(),
            ));
        };
        let mut session = self.transport.open(mailbox)?;
        let result = f(session.as_mut(), criteria);
        session.close();
        result
    }
}

fn unsupported(call: &str) -> AppError {
    AppError::Internal(format!("the email fetcher does not support '{}'", call))
}

impl<T: MailTransport> Fetcher for EmailFetcher<T> {
    fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        step_with("search", format!("{:?}", query), || {
            self.with_mailbox(query, |session, criteria| {
                self.matching_messages(session, criteria)
            })
        })
    }

    fn fetch_file(&self, _remote: &str) -> Result<LocalFile> {
        Err(unsupported("fetch_file"))
    }

    fn fetch_file_if_exists(&self, _remote: &str) -> Result<FetchOutcome> {
        Err(unsupported("fetch_file_if_exists"))
    }

    fn fetch_from_search(&self, query: &SearchQuery) -> Result<Vec<LocalFile>> {
        step_with("fetch_from_search", format!("{:?}", query), || {
            self.with_mailbox(query, |session, criteria| {
                let mut files = TempBatch::default();
                for id in self.matching_messages(session, criteria)? {
                    self.save_attachments(session, &id, &mut files)?;
                }
                Ok(files.keep())
            })
        })
    }
}

impl<T: MailTransport + 'static> Operation for EmailFetcher<T> {
    type Interface = dyn Fetcher;
    type Args = EmailFetcherArgs<T>;

    fn create(args: EmailFetcherArgs<T>) -> Result<Box<dyn Fetcher>> {
        Ok(Box::new(EmailFetcher::new(args.transport, &args.pattern)?))
    }
}

/// `(SUBJECT "Daily" SENTON "01-Mar-2016")`
pub fn search_query(criteria: &[(String, String)]) -> String {
    let terms: Vec<String> = criteria
        .iter()
        .map(|(field, value)| format!("{} \"{}\"", query_field(field), escape(value)))
        .collect();
    format!("({})", terms.join(" "))
}

fn query_field(header: &str) -> String {
    let name = header.strip_suffix(CONTAINS_SUFFIX).unwrap_or(header);
    let name = QUERY_FIELD_ALIASES
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
        .unwrap_or(name);
    name.to_uppercase()
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn headers_match(headers: &BTreeMap<String, String>, criteria: &[(String, String)]) -> bool {
    criteria
        .iter()
        .filter(|(field, _)| !field.ends_with(CONTAINS_SUFFIX))
        .all(|(field, value)| headers.get(field) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mail_transport::mocks::{InMemoryMailbox, StoredMessage};
    use crate::port::Attachment;

    fn criteria(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn message(id: &str, subject: &str, attachments: &[(&str, &str)]) -> StoredMessage {
        StoredMessage {
            id: id.to_string(),
            headers: [("Subject".to_string(), subject.to_string())].into(),
            attachments: attachments
                .iter()
                .map(|(name, content)| Attachment {
                    filename: name.to_string(),
                    content: content.as_bytes().to_vec(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_search_query_rendering() {
        let query = search_query(&criteria(&[
            ("Subject__contains", "say \"hi\""),
            ("Date", "01-Mar-2016"),
        ]));
        assert_eq!(query, r#"(SUBJECT "say \"hi\"" SENTON "01-Mar-2016")"#);
    }

    #[test]
    fn test_fetch_from_search_filters_headers_and_attachments() {
        let mailbox = InMemoryMailbox::default();
        mailbox.add(message("1", "Daily", &[("Report.CSV", "a\n1\n"), ("logo.png", "")]));
        mailbox.add(message("2", "Daily digest", &[("other.csv", "a\n2\n")]));

        let fetcher = EmailFetcher::new(mailbox.clone(), "*.csv").unwrap();
        let files = fetcher
            .fetch_from_search(&SearchQuery::Mail {
                mailbox: "INBOX".to_string(),
                criteria: criteria(&[("Subject", "Daily")]),
            })
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].remote(), "Report.CSV");
        assert!(files[0]
            .path()
            .to_string_lossy()
            .ends_with("-Report.CSV"));
        assert_eq!(std::fs::read_to_string(files[0].path()).unwrap(), "a\n1\n");
        assert_eq!(mailbox.queries.lock().unwrap()[0], r#"(SUBJECT "Daily")"#);
        std::fs::remove_file(files[0].path()).unwrap();
    }

    #[test]
    fn test_failed_attachment_download_removes_saved_files() {
        /// Serves message "1" and fails halfway through message "2"
        #[derive(Clone)]
        struct Interrupted(InMemoryMailbox);

        impl MailTransport for Interrupted {
            fn open(&self, _mailbox: &str) -> Result<Box<dyn MailSession>> {
                Ok(Box::new(self.clone()))
            }
        }

        impl MailSession for Interrupted {
            fn search(&mut self, query: &str) -> Result<Vec<String>> {
                self.0.search(query)
            }

            fn headers(&mut self, message_id: &str) -> Result<BTreeMap<String, String>> {
                self.0.headers(message_id)
            }

            fn attachments(&mut self, message_id: &str) -> Result<Vec<Attachment>> {
                match message_id {
                    "1" => self.0.attachments(message_id),
                    _ => Err(AppError::Transport("connection reset".to_string())),
                }
            }

            fn close(&mut self) {}
        }

        let mailbox = InMemoryMailbox::default();
        mailbox.add(message("1", "Daily", &[("first.mailcut", "a\n1\n")]));
        mailbox.add(message("2", "Daily", &[("second.mailcut", "a\n2\n")]));

        let fetcher = EmailFetcher::new(Interrupted(mailbox), "*.mailcut").unwrap();
        let err = fetcher
            .fetch_from_search(&SearchQuery::Mail {
                mailbox: "INBOX".to_string(),
                criteria: criteria(&[("Subject", "Daily")]),
            })
            .unwrap_err();

        assert!(matches!(err, AppError::Transport(_)));
        let leftovers = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with("-first.mailcut"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_contains_criteria_are_not_matched_locally() {
        let mailbox = InMemoryMailbox::default();
        mailbox.add(message("1", "Daily", &[]));
        mailbox.add(message("2", "Daily digest", &[]));

        let fetcher = EmailFetcher::new(mailbox, "*").unwrap();
        let ids = fetcher
            .search(&SearchQuery::Mail {
                mailbox: "INBOX".to_string(),
                criteria: criteria(&[("Subject__contains", "Daily")]),
            })
            .unwrap();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_unsupported_calls() {
        let fetcher = EmailFetcher::new(InMemoryMailbox::default(), "*").unwrap();
        assert!(matches!(fetcher.fetch_file("x"), Err(AppError::Internal(_))));
        assert!(matches!(
            fetcher.search(&SearchQuery::glob("dir", "*")),
            Err(AppError::Config(_))
        ));
    }
}
