// Connection Registries - alias lookup of databases, FTP/mail servers and push targets
//
// Each registry reads its table from the application config the first time it
// is queried. Job settings may add or replace entries through `entries`.

use std::cell::OnceCell;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::context::{Facility, JobHandle};
use crate::domain::{parse_section, SettingsSection};
use crate::error::{AppError, Result};
use crate::facilities::app_config::{AppConfig, ConfigFacility, RegistryTable};

/// Which config table a registry serves
pub trait RegistryKind: 'static {
    /// Config key, also the facility registration name
    const CONFIG_KEY: &'static str;
    const SETTINGS_SECTION: &'static str;
}

pub struct Databases;
pub struct FtpServers;
pub struct EmailServers;
pub struct PushTargets;

impl RegistryKind for Databases {
    const CONFIG_KEY: &'static str = "db_registry";
    const SETTINGS_SECTION: &'static str = "DbRegistrySettings";
}

impl RegistryKind for FtpServers {
    const CONFIG_KEY: &'static str = "ftp_registry";
    const SETTINGS_SECTION: &'static str = "FtpRegistrySettings";
}

impl RegistryKind for EmailServers {
    const CONFIG_KEY: &'static str = "email_registry";
    const SETTINGS_SECTION: &'static str = "EmailRegistrySettings";
}

impl RegistryKind for PushTargets {
    const CONFIG_KEY: &'static str = "push_notification_registry";
    const SETTINGS_SECTION: &'static str = "PushNotificationRegistrySettings";
}

pub type DbRegistry = Registry<Databases>;
pub type FtpRegistry = Registry<FtpServers>;
pub type EmailRegistry = Registry<EmailServers>;
pub type PushNotificationRegistry = Registry<PushTargets>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseParams {
    /// sqlx connection URL, e.g. `sqlite:///var/lib/imports/reporting.db`
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Only disposable databases accept temporary setup/cleanup scripts
    #[serde(default)]
    pub is_disposable: bool,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FtpServer {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default = "anonymous")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub passive: bool,
}

fn default_ftp_port() -> u16 {
    21
}

fn anonymous() -> String {
    "anonymous".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailServer {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "inbox")]
    pub mailbox: String,
}

fn default_imap_port() -> u16 {
    993
}

fn inbox() -> String {
    "INBOX".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushTarget {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub channel: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RegistrySettings {
    entries: RegistryTable,
}

pub struct Registry<K: RegistryKind> {
    config: Option<Rc<AppConfig>>,
    overrides: RegistryTable,
    table: OnceCell<RegistryTable>,
    _kind: PhantomData<K>,
}

impl<K: RegistryKind> Default for Registry<K> {
    fn default() -> Self {
        Self {
            config: None,
            overrides: RegistryTable::new(),
            table: OnceCell::new(),
            _kind: PhantomData,
        }
    }
}

impl<K: RegistryKind> Registry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> &RegistryTable {
        self.table.get_or_init(|| {
            let mut table = self
                .config
                .as_ref()
                .and_then(|config| config.registry(K::CONFIG_KEY))
                .cloned()
                .unwrap_or_default();
            table.extend(self.overrides.clone());
            table
        })
    }

    /// Known aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.table().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Raw entry for `alias`
    ///
    /// Falls back to a case-insensitive match, since config keys may be
    /// lowercased on load.
    pub fn get(&self, alias: &str) -> Result<serde_json::Value> {
        let table = self.table();
        table
            .get(alias)
            .or_else(|| {
                table
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(alias))
                    .map(|(_, value)| value)
            })
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{} has no entry '{}'", K::CONFIG_KEY, alias)))
    }

    /// Entry for `alias` parsed as `T`
    pub fn get_as<T: DeserializeOwned>(&self, alias: &str) -> Result<T> {
        serde_json::from_value(self.get(alias)?).map_err(|e| {
            AppError::Config(format!("invalid {} entry '{}': {}", K::CONFIG_KEY, alias, e))
        })
    }
}

impl Registry<Databases> {
    pub fn get_database(&self, alias: &str) -> Result<DatabaseParams> {
        self.get_as(alias)
    }
}

impl Registry<FtpServers> {
    pub fn get_ftp_server(&self, alias: &str) -> Result<FtpServer> {
        self.get_as(alias)
    }
}

impl Registry<EmailServers> {
    pub fn get_email_server(&self, alias: &str) -> Result<EmailServer> {
        self.get_as(alias)
    }
}

impl Registry<PushTargets> {
    pub fn get_push_notification_config(&self, alias: &str) -> Result<PushTarget> {
        self.get_as(alias)
    }
}

impl<K: RegistryKind> Facility for Registry<K> {
    fn settings_section(&self) -> &'static str {
        K::SETTINGS_SECTION
    }

    fn enter_job(&mut self, job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        let settings: RegistrySettings = parse_section(K::SETTINGS_SECTION, settings)?;
        self.overrides = settings.entries;
        self.table = OnceCell::new();
        self.config = job
            .facility_ref::<ConfigFacility>()
            .ok()
            .map(|facility| facility.app_config());
        Ok(())
    }
}
