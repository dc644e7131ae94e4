// Importers shipped with the runner

use sluice_core::domain::{row, JobSettings, KwargValue, Kwargs, Value};
use sluice_core::operations::casters::{cast_if_not_empty, fix_account_number, to_decimal};
use sluice_core::operations::transformers::{cast_values, keep_keys, update_with_static_values};
use sluice_core::operations::{Destination, SearchQuery};
use sluice_core::{
    Catalog, FileImport, ImportRequest, ImportSummary, Importer, InputSet, Result, TransformChain,
};
use sluice_infra_files::{CsvLoader, FtpFetcher, LocalFileDeleter};
use sluice_infra_sqlite::DbSaver;
use uuid::Uuid;

const INSERT_ACCOUNTS: &str =
    "INSERT INTO accounts (account, owner, balance, as_of) VALUES (?, ?, ?, ?)";

const MARK_LOADED: &str = "INSERT INTO import_markers (importer, loaded_at) \
     VALUES ('partners::daily_accounts', CURRENT_TIMESTAMP)";

/// Every importer the `sluice` binary knows about
pub fn build_catalog() -> Result<Catalog> {
    let mut catalog = Catalog::new();
    catalog.register(Box::new(DailyAccounts))?;
    Ok(catalog)
}

/// Partner account balances, one CSV per day on the partner's FTP server
///
/// Arguments: `files[]=...` to import given files, otherwise
/// `date=YYYY-MM-DD` (default today) picks `accounts_YYYYMMDD.csv`.
pub struct DailyAccounts;

impl Importer for DailyAccounts {
    fn name(&self) -> &str {
        "partners::daily_accounts"
    }

    fn uuid(&self) -> Uuid {
        Uuid::from_u128(0x6f1c_2a9e_4b7d_4e0a_9c3f_5d81_a2b4_c6e8)
    }

    fn job_settings(&self) -> JobSettings {
        JobSettings::new().with("LoggerSettings", "level", "info")
    }

    fn test_defaults(&self) -> Kwargs {
        let fixture = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/accounts_20160301.csv");
        Kwargs::from([("files".to_string(), KwargValue::from(vec![fixture]))])
    }

    fn execute(&self, request: &ImportRequest) -> Result<ImportSummary> {
        let date = request.date_or_today("date", "%Y-%m-%d")?;
        let inputs = match request.list("files") {
            [] => InputSet::Search(SearchQuery::glob(
                "/outgoing",
                format!("accounts_{}.csv", date.format("%Y%m%d")),
            )),
            files => InputSet::Explicit(files.to_vec()),
        };

        let chain = TransformChain::new(&["account", "owner", "balance", "as_of"])
            .then(keep_keys(&["account", "owner", "balance"]))
            .then(cast_values(vec![
                ("account", fix_account_number()),
                ("balance", cast_if_not_empty(to_decimal())),
            ]))
            .then(update_with_static_values(row([("as_of", Value::Date(date))])));

        FileImport::<FtpFetcher, CsvLoader, LocalFileDeleter, DbSaver>::new(
            "partner_ftp".to_string(),
            inputs,
            chain,
        )
        .insert_into(Destination::inline("warehouse", INSERT_ACCOUNTS))
        .with_marker(Destination::inline("warehouse", MARK_LOADED))
        .skip_unavailable(true)
        .run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::FacilityOverrides;
    use sluice_core::{register_default_facilities, AppConfig, FacilityAdapters, Launcher};
    use std::rc::Rc;

    #[test]
    fn test_catalog_lists_daily_accounts() {
        let catalog = build_catalog().unwrap();
        let names: Vec<String> = catalog.list().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["partners::daily_accounts"]);
        assert!(catalog.get("partners::unknown").is_err());
    }

    #[test]
    fn test_daily_accounts_runs_against_fixture() {
        register_default_facilities(Rc::new(AppConfig::default()), FacilityAdapters::default());
        sluice_infra_files::register_auto_mocks();
        sluice_infra_sqlite::register_auto_mocks();

        let summary = Launcher::new()
            .test(&DailyAccounts, Kwargs::new(), &FacilityOverrides::default())
            .unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.rows, 3);
        assert!(summary.unavailable.is_empty());
    }

    #[test]
    fn test_bad_date_argument_fails() {
        register_default_facilities(Rc::new(AppConfig::default()), FacilityAdapters::default());
        sluice_infra_files::register_auto_mocks();
        sluice_infra_sqlite::register_auto_mocks();

        let kwargs = Kwargs::from([("date".to_string(), KwargValue::from("01/03/2016"))]);
        let err = Launcher::new()
            .test(&DailyAccounts, kwargs, &FacilityOverrides::default())
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
