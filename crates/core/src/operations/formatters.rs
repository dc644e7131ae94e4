// Date formatters for file names, search criteria and queries

use chrono::NaiveDate;

/// `01 Mar 2016`
pub const RFC_2822_DATE: &str = "%d %b %Y";

/// `01-Mar-2016`, the date form IMAP searches expect
pub const IMAP_DATE: &str = "%d-%b-%Y";

pub fn date_format(date: NaiveDate, format: &str) -> String {
    date.format(format).to_string()
}

pub fn rfc_2822_date(date: NaiveDate) -> String {
    date_format(date, RFC_2822_DATE)
}

pub fn imap_date(date: NaiveDate) -> String {
    date_format(date, IMAP_DATE)
}
