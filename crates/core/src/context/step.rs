// Steps - named, nestable scopes inside a job

use std::rc::{Rc, Weak};

use crate::context::current_job;
use crate::error::Result;

/// Name of the implicit step opened for the whole job body
pub const ROOT_STEP_NAME: &str = "<root>";

/// Separator used when rendering a step path
pub const PATH_SEPARATOR: &str = " > ";

#[derive(Debug)]
pub struct Step {
    name: String,
    depth: usize,
    detail: Option<String>,
    parent: Option<Weak<Step>>,
}

impl Step {
    pub(crate) fn root() -> Rc<Self> {
        Rc::new(Self {
            name: ROOT_STEP_NAME.to_string(),
            depth: 0,
            detail: None,
            parent: None,
        })
    }

    pub(crate) fn child_of(parent: &Rc<Step>, name: &str, detail: Option<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            depth: parent.depth + 1,
            detail,
            parent: Some(Rc::downgrade(parent)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distance from the root step
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Rendered arguments of the wrapped call, if the caller gave any
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn parent(&self) -> Option<Rc<Step>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Names from the root down to this step
    pub fn full_path(&self) -> Vec<String> {
        let mut path = vec![self.name.clone()];
        let mut current = self.parent();
        while let Some(step) = current {
            path.push(step.name.clone());
            current = step.parent();
        }
        path.reverse();
        path
    }

    pub fn path_label(&self) -> String {
        self.full_path().join(PATH_SEPARATOR)
    }
}

/// Run `f` as a step of the current job
///
/// Outside of any job the call runs unwrapped.
pub fn step<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match current_job() {
        Ok(job) => job.run_step(name, None, f),
        Err(_) => f(),
    }
}

/// Like [`step`], recording a rendering of the call's arguments
pub fn step_with<T>(
    name: &str,
    detail: impl Into<String>,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match current_job() {
        Ok(job) => job.run_step(name, Some(detail.into()), f),
        Err(_) => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path() {
        let root = Step::root();
        let fetch = Step::child_of(&root, "fetch", None);
        let file = Step::child_of(&fetch, "fetch_file", Some("\"a.csv\"".to_string()));

        assert_eq!(file.depth(), 2);
        assert_eq!(file.full_path(), vec!["<root>", "fetch", "fetch_file"]);
        assert_eq!(file.path_label(), "<root> > fetch > fetch_file");
        assert_eq!(file.detail(), Some("\"a.csv\""));
        assert!(root.is_root());
        assert!(!file.is_root());
    }

    #[test]
    fn test_parent_is_not_owned() {
        let root = Step::root();
        let child = Step::child_of(&root, "child", None);
        drop(root);
        assert!(child.parent().is_none());
        assert_eq!(child.full_path(), vec!["child"]);
    }

    #[test]
    fn test_step_outside_job_runs_unwrapped() {
        let value = step("standalone", || Ok(41 + 1)).unwrap();
        assert_eq!(value, 42);
    }
}
