// Profiler Facility
//
// Times every step and samples resident memory around it. Sections mirror
// the step tree, with the root step as the top section.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::context::{Facility, Failure, JobHandle, Step, StepCall};
use crate::domain::{parse_section, SettingsSection};
use crate::error::Result;
use crate::port::{NullProbe, ResourceProbe};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfilerSettings {
    pub enabled: bool,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A finished profiling section
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSection {
    pub name: String,
    pub duration_ms: f64,
    /// Resident memory growth in bytes, absent when the probe cannot tell
    pub memory_delta: Option<i64>,
    pub children: Vec<ProfileSection>,
}

impl ProfileSection {
    fn render(&self, depth: usize, out: &mut Vec<String>) {
        let memory = match self.memory_delta {
            Some(delta) => format!(" ({:+} B)", delta),
            None => String::new(),
        };
        out.push(format!(
            "{}{}: {:.3} ms{}",
            "  ".repeat(depth),
            self.name,
            self.duration_ms,
            memory
        ));
        for child in &self.children {
            child.render(depth + 1, out);
        }
    }
}

struct OpenSection {
    name: String,
    started: Instant,
    memory_before: Option<u64>,
    children: Vec<ProfileSection>,
}

#[derive(Default)]
struct Sections {
    open: Vec<OpenSection>,
    root: Option<ProfileSection>,
}

impl Sections {
    fn open(&mut self, name: &str, memory: Option<u64>) {
        self.open.push(OpenSection {
            name: name.to_string(),
            started: Instant::now(),
            memory_before: memory,
            children: Vec::new(),
        });
    }

    fn close(&mut self, memory: Option<u64>) {
        let Some(section) = self.open.pop() else {
            return;
        };
        let finished = ProfileSection {
            name: section.name,
            duration_ms: section.started.elapsed().as_secs_f64() * 1000.0,
            memory_delta: match (section.memory_before, memory) {
                (Some(before), Some(after)) => Some(after as i64 - before as i64),
                _ => None,
            },
            children: section.children,
        };
        match self.open.last_mut() {
            Some(parent) => parent.children.push(finished),
            None => self.root = Some(finished),
        }
    }
}

pub struct Profiler {
    settings: ProfilerSettings,
    probe: Arc<dyn ResourceProbe>,
    sections: Rc<RefCell<Sections>>,
}

impl Profiler {
    pub fn new(probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            settings: ProfilerSettings::default(),
            probe,
            sections: Rc::new(RefCell::new(Sections::default())),
        }
    }

    /// Root section once the root step has closed
    pub fn root_section(&self) -> Option<ProfileSection> {
        self.sections.borrow().root.clone()
    }

    /// Nested section tree as JSON, `null` before the root step closed
    pub fn as_json(&self) -> serde_json::Value {
        match self.root_section() {
            Some(root) => serde_json::to_value(root).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        }
    }

    fn render(&self) -> String {
        let mut lines = Vec::new();
        if let Some(root) = self.root_section() {
            root.render(0, &mut lines);
        }
        lines.join("\n")
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(Arc::new(NullProbe))
    }
}

impl Facility for Profiler {
    fn settings_section(&self) -> &'static str {
        "ProfilerSettings"
    }

    fn enter_job(&mut self, _job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        self.settings = parse_section(self.settings_section(), settings)?;
        *self.sections.borrow_mut() = Sections::default();
        Ok(())
    }

    fn first_step(&mut self, _job: &JobHandle, step: &Rc<Step>) -> Result<()> {
        if self.settings.enabled {
            let memory = self.probe.resident_memory();
            self.sections.borrow_mut().open(step.name(), memory);
        }
        Ok(())
    }

    fn wrap_step<'a>(&self, _job: &JobHandle, step: &Rc<Step>, call: StepCall<'a>) -> StepCall<'a> {
        if !self.settings.enabled {
            return call;
        }
        let sections = Rc::clone(&self.sections);
        let probe = Arc::clone(&self.probe);
        let name = step.name().to_string();
        Box::new(move || {
            sections.borrow_mut().open(&name, probe.resident_memory());
            let result = call();
            sections.borrow_mut().close(probe.resident_memory());
            result
        })
    }

    fn last_step(
        &mut self,
        _job: &JobHandle,
        _step: &Rc<Step>,
        _failure: Option<&Failure<'_>>,
    ) -> Result<()> {
        if self.settings.enabled {
            let memory = self.probe.resident_memory();
            self.sections.borrow_mut().close(memory);
        }
        Ok(())
    }

    fn exit_job(&mut self, job: &JobHandle, _failure: Option<&Failure<'_>>) -> Result<()> {
        if job.is_test() && self.settings.enabled {
            job.publish_report("PROFILER", &self.render());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::job::mocks::RecordingReportSink;
    use crate::context::{register_facility, run_job, step, JobSpec};
    use crate::domain::JobSettings;
    use crate::error::AppError;
    use crate::port::resource_probe::mocks::ScriptedProbe;
    use uuid::Uuid;

    fn profile_of(
        spec: JobSpec,
        body: impl FnOnce(&JobHandle) -> Result<()>,
    ) -> (Result<()>, Option<ProfileSection>) {
        let captured = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&captured);
        let result = run_job(spec, |job| {
            let outcome = body(job);
            // the root section only closes after the body returns
            let profiler = job.facility_ref::<Profiler>()?;
            *sink.borrow_mut() = Some(Rc::clone(&profiler.sections));
            outcome
        });
        let tree = captured
            .borrow()
            .as_ref()
            .and_then(|sections: &Rc<RefCell<Sections>>| sections.borrow().root.clone());
        (result, tree)
    }

    #[test]
    fn test_sections_mirror_step_tree() {
        register_facility("profiler", || {
            Box::new(Profiler::new(Arc::new(ScriptedProbe::new(vec![100, 150, 200, 450]))))
        });

        let (result, root) = profile_of(JobSpec::new("profiled", Uuid::new_v4()), |_| {
            step("fetch", || step("fetch_file", || Ok(())))?;
            step("load", || Ok(()))
        });
        result.unwrap();

        let root = root.unwrap();
        assert_eq!(root.name, "<root>");
        let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["fetch", "load"]);
        assert_eq!(root.children[0].children[0].name, "fetch_file");
        assert_eq!(root.children[0].children[0].memory_delta, Some(250));
    }

    #[test]
    fn test_failed_step_still_closes_its_section() {
        register_facility("profiler", || Box::new(Profiler::default()));

        let (result, root) = profile_of(JobSpec::new("failing", Uuid::new_v4()), |_| {
            step("load", || -> Result<()> { Err(AppError::Data("bad row".into())) })
        });
        assert!(result.is_err());

        let root = root.unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].memory_delta, None);
    }

    #[test]
    fn test_disabled_profiler_reports_nothing() {
        register_facility("profiler", || Box::new(Profiler::default()));
        let sink = Rc::new(RecordingReportSink::default());
        let settings = JobSettings::new().with("ProfilerSettings", "enabled", false);

        let (_, root) = profile_of(
            JobSpec::new("off", Uuid::new_v4())
                .with_settings(settings)
                .test_run(true)
                .with_report_sink(sink.clone()),
            |_| step("work", || Ok(())),
        );
        assert!(root.is_none());
        assert!(sink.section("PROFILER").is_none());
    }

    #[test]
    fn test_profiler_report_in_test_runs() {
        register_facility("profiler", || Box::new(Profiler::default()));
        let sink = Rc::new(RecordingReportSink::default());

        run_job(
            JobSpec::new("reported", Uuid::new_v4())
                .test_run(true)
                .with_report_sink(sink.clone()),
            |job| {
                step("work", || Ok(()))?;
                assert!(job.facility_ref::<Profiler>()?.as_json().is_null());
                Ok(())
            },
        )
        .unwrap();

        let body = sink.section("PROFILER").unwrap();
        assert!(body.starts_with("<root>: "));
        assert!(body.contains("\n  work: "));
    }
}
