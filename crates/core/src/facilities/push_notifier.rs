// Push Notifier Facility
//
// Builds push payloads for targets of the push notification registry and
// hands them to a PushTransport.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::context::{step_with, Facility, Failure, JobHandle};
use crate::domain::{parse_section, SettingsSection};
use crate::error::Result;
use crate::facilities::registries::PushNotificationRegistry;
use crate::port::{InMemoryPushTransport, PushTransport};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushNotifierSettings {
    /// Aliases that receive the completion summary; empty means every target
    pub summary_targets: Vec<String>,
}

pub struct PushNotifier {
    settings: PushNotifierSettings,
    transport: Arc<dyn PushTransport>,
    sent: Vec<serde_json::Value>,
}

impl PushNotifier {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            settings: PushNotifierSettings::default(),
            transport,
            sent: Vec::new(),
        }
    }

    /// Push `title`/`body` to the target registered as `alias`
    pub fn push(&mut self, job: &JobHandle, alias: &str, title: &str, body: &str) -> Result<()> {
        let target = job
            .facility_ref::<PushNotificationRegistry>()?
            .get_push_notification_config(alias)?;
        let payload = json!({
            "channel": target.channel,
            "title": title,
            "body": body,
        });
        step_with("push", alias, || self.transport.deliver(&payload))?;
        self.sent.push(payload);
        Ok(())
    }

    /// Push the job's completion summary to the configured targets
    pub fn push_summary(&mut self, job: &JobHandle, error_count: usize) -> Result<()> {
        let targets = if self.settings.summary_targets.is_empty() {
            match job.facility_ref::<PushNotificationRegistry>() {
                Ok(registry) => registry.aliases(),
                Err(_) => return Ok(()),
            }
        } else {
            self.settings.summary_targets.clone()
        };

        let title = format!("Import {}", job.name());
        let body = format!("Job '{}' completed with {} errors", job.name(), error_count);
        for alias in targets {
            self.push(job, &alias, &title, &body)?;
        }
        Ok(())
    }

    /// Payloads pushed during this job
    pub fn sent(&self) -> &[serde_json::Value] {
        &self.sent
    }

    fn render(&self) -> String {
        self.sent
            .iter()
            .map(|payload| format!("data: {}", payload))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for PushNotifier {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryPushTransport::default()))
    }
}

impl Facility for PushNotifier {
    fn settings_section(&self) -> &'static str {
        "PushNotifierSettings"
    }

    fn enter_job(&mut self, _job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        self.settings = parse_section(self.settings_section(), settings)?;
        self.sent.clear();
        Ok(())
    }

    fn exit_job(&mut self, job: &JobHandle, _failure: Option<&Failure<'_>>) -> Result<()> {
        if job.is_test() {
            job.publish_report("PUSH NOTIFICATIONS", &self.render());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::job::mocks::RecordingReportSink;
    use crate::context::{register_facility, run_job, JobSpec};
    use crate::error::AppError;
    use crate::facilities::app_config::{AppConfig, ConfigFacility};
    use crate::facilities::job_status::JobStatus;
    use std::rc::Rc;
    use uuid::Uuid;

    const SAMPLE: &str = r#"
[push_notification_registry.ops]
endpoint = "https://push.example.com"
channel = "imports"
"#;

    fn install(transport: InMemoryPushTransport) {
        let config = Rc::new(AppConfig::from_toml(SAMPLE).unwrap());
        register_facility("config", move || Box::new(ConfigFacility::new(Rc::clone(&config))));
        register_facility("job_status", || Box::new(JobStatus::new()));
        register_facility("push_notification_registry", || {
            Box::new(PushNotificationRegistry::new())
        });
        register_facility("push_notifier", move || {
            Box::new(PushNotifier::new(Arc::new(transport.clone())))
        });
    }

    #[test]
    fn test_push_builds_payload() {
        let transport = InMemoryPushTransport::default();
        install(transport.clone());

        run_job(JobSpec::new("pushing", Uuid::new_v4()), |job| {
            job.facility::<PushNotifier>()?.push(job, "ops", "Hello", "World")
        })
        .unwrap();

        let delivered = transport.delivered();
        assert_eq!(
            delivered[0],
            json!({"channel": "imports", "title": "Hello", "body": "World"})
        );
    }

    #[test]
    fn test_summary_pushed_to_every_target() {
        let transport = InMemoryPushTransport::default();
        install(transport.clone());
        let sink = Rc::new(RecordingReportSink::default());

        let _ = run_job(
            JobSpec::new("summary", Uuid::new_v4())
                .test_run(true)
                .with_report_sink(sink.clone()),
            |_| -> Result<()> { Err(AppError::Data("bad".into())) },
        );

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["body"], "Job 'summary' completed with 1 errors");
        assert!(sink.section("PUSH NOTIFICATIONS").unwrap().starts_with("data: "));
    }

    #[test]
    fn test_unknown_target_fails() {
        install(InMemoryPushTransport::default());
        let err = run_job(JobSpec::new("pushing", Uuid::new_v4()), |job| {
            job.facility::<PushNotifier>()?.push(job, "nobody", "t", "b")
        })
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
