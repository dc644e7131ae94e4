// Notifier Facility - in-memory notifications grouped by recipient

use std::collections::BTreeMap;

use crate::context::{Facility, Failure, JobHandle};
use crate::domain::SettingsSection;
use crate::error::Result;

/// Recipient of job summaries
pub const DEV_TEAM: &str = "dev_team";

#[derive(Default)]
pub struct Notifier {
    notifications: BTreeMap<String, Vec<String>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, recipients: &[&str], message: &str) {
        for recipient in recipients {
            self.notifications
                .entry(recipient.to_string())
                .or_default()
                .push(message.to_string());
        }
    }

    pub fn notifications_for(&self, recipient: &str) -> Vec<String> {
        self.notifications.get(recipient).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    fn render(&self) -> String {
        self.notifications
            .iter()
            .map(|(recipient, messages)| {
                let mut lines = vec![format!("To {}:", recipient)];
                lines.extend(messages.iter().map(|m| format!(" * {}", m)));
                lines.join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Facility for Notifier {
    fn settings_section(&self) -> &'static str {
        "NotifierSettings"
    }

    fn enter_job(&mut self, _job: &JobHandle, _settings: &SettingsSection) -> Result<()> {
        self.notifications.clear();
        Ok(())
    }

    fn exit_job(&mut self, job: &JobHandle, _failure: Option<&Failure<'_>>) -> Result<()> {
        if job.is_test() {
            job.publish_report("NOTIFICATIONS", &self.render());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_groups_by_recipient() {
        let mut notifier = Notifier::new();
        notifier.notify(&[DEV_TEAM, "ops"], "first");
        notifier.notify(&[DEV_TEAM], &"x".repeat(120));

        let dev = notifier.notifications_for(DEV_TEAM);
        assert_eq!(dev.len(), 2);
        assert_eq!(dev[1].len(), 120);
        assert_eq!(notifier.notifications_for("ops"), vec!["first"]);
        assert!(notifier.notifications_for("nobody").is_empty());
    }

    #[test]
    fn test_render() {
        let mut notifier = Notifier::new();
        notifier.notify(&[DEV_TEAM], "Job 'a' completed successfully");
        assert_eq!(notifier.render(), "To dev_team:\n * Job 'a' completed successfully");
    }
}
