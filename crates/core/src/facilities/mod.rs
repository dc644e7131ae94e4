//! Facilities
//!
//! Per-job singletons notified at every stage of a job. The default set is
//! registered by [`register_default_facilities`]; the run history and the
//! temporary database are opt-in and registered by the composition root.

pub mod app_config;
pub mod job_config;
pub mod job_status;
pub mod logger;
pub mod mocking;
pub mod notifier;
pub mod profiler;
pub mod push_notifier;
pub mod registries;
pub mod run_history;
pub mod temporary_db;

use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::context::with_context;
use crate::port::{PushTransport, ResourceProbe};

pub use app_config::{AppConfig, ConfigFacility, RunHistoryConfig};
pub use job_config::JobConfig;
pub use job_status::{error_on_failure, JobError, JobStatus};
pub use logger::{log, LogLevel, LogRecord, Logger};
pub use mocking::{AutoMock, MockRegistry};
pub use notifier::{Notifier, DEV_TEAM};
pub use profiler::{ProfileSection, Profiler};
pub use push_notifier::PushNotifier;
pub use registries::{
    DatabaseParams, DbRegistry, EmailRegistry, EmailServer, FtpRegistry, FtpServer,
    PushNotificationRegistry, PushTarget, Registry,
};
pub use run_history::RunHistory;
pub use temporary_db::TemporaryDb;

/// Adapters the default facilities are built with
pub struct FacilityAdapters {
    pub probe: Arc<dyn ResourceProbe>,
    pub push_transport: Arc<dyn PushTransport>,
}

impl Default for FacilityAdapters {
    fn default() -> Self {
        Self {
            probe: Arc::new(crate::port::NullProbe),
            push_transport: Arc::new(crate::port::InMemoryPushTransport::default()),
        }
    }
}

/// Register the default facilities on the calling thread, in hook order
///
/// The config's `settings` tables become the default layer of every job.
pub fn register_default_facilities(config: Rc<AppConfig>, adapters: FacilityAdapters) {
    with_context(|ctx| {
        let shared = Rc::clone(&config);
        ctx.register_facility("config", move || {
            Box::new(ConfigFacility::new(Rc::clone(&shared)))
        });
        ctx.register_facility("logger", || Box::new(Logger::new()));
        let probe = adapters.probe;
        ctx.register_facility("profiler", move || Box::new(Profiler::new(Arc::clone(&probe))));
        ctx.register_facility("mock_registry", || Box::new(MockRegistry::new()));
        ctx.register_facility("notifier", || Box::new(Notifier::new()));
        ctx.register_facility("job_status", || Box::new(JobStatus::new()));
        ctx.register_facility("db_registry", || Box::new(DbRegistry::new()));
        ctx.register_facility("ftp_registry", || Box::new(FtpRegistry::new()));
        ctx.register_facility("email_registry", || Box::new(EmailRegistry::new()));
        ctx.register_facility("push_notification_registry", || {
            Box::new(PushNotificationRegistry::new())
        });
        ctx.register_facility("job_config", || Box::new(JobConfig::new()));
        let transport = adapters.push_transport;
        ctx.register_facility("push_notifier", move || {
            Box::new(PushNotifier::new(Arc::clone(&transport)))
        });

        let defaults = config.default_settings(|name| ctx.resolve_settings_section(name));
        debug!(sections = defaults.sections().count(), "Default facility settings loaded");
        ctx.set_default_settings(defaults);
    });
}
