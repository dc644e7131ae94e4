// Mock Registry Facility
//
// Per-job table of replacement constructors keyed by operation type.
// `construct::<T>()` consults it before falling back to `T::create`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use serde::Deserialize;
use tracing::debug;

use crate::context::{Facility, JobHandle};
use crate::domain::{parse_section, SettingsSection};
use crate::error::{AppError, Result};
use crate::operations::{Mockable, Operation};

/// Constructor stored for a mocked operation type
pub type Constructor<T> =
    Rc<dyn Fn(<T as Operation>::Args) -> Result<Box<<T as Operation>::Interface>>>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MockRegistrySettings {
    /// Operation type names substituted with their no-op even outside test runs
    pub mock: Vec<String>,
    /// Operation type names never auto-mocked; wins over `mock`
    pub no_mock: Vec<String>,
}

/// Operation type marked for no-op substitution in test runs
#[derive(Clone)]
pub struct AutoMock {
    pub type_id: TypeId,
    pub type_name: String,
    install: fn(&mut MockRegistry),
}

impl AutoMock {
    pub fn of<T: Operation>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name::<T>(),
            install: install_default_noop::<T>,
        }
    }
}

impl std::fmt::Debug for AutoMock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AutoMock").field(&self.type_name).finish()
    }
}

fn install_default_noop<T: Operation>(registry: &mut MockRegistry) {
    registry.register_default_noop::<T>();
}

/// `sluice_infra_files::ftp::FtpFetcher` -> `FtpFetcher`
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

struct Replacement {
    type_name: String,
    constructor: Box<dyn Any>,
}

#[derive(Default)]
pub struct MockRegistry {
    replacements: HashMap<TypeId, Replacement>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct `R` wherever `T` is constructed
    pub fn register_mock<T, R>(&mut self)
    where
        T: Operation,
        R: Operation<Interface = T::Interface, Args = T::Args>,
    {
        let constructor: Constructor<T> = Rc::new(R::create);
        self.insert::<T>(constructor);
    }

    /// Construct `T` through an arbitrary closure, typically returning a fake
    pub fn register_mock_fn<T, F>(&mut self, constructor: F)
    where
        T: Operation,
        F: Fn(T::Args) -> Result<Box<T::Interface>> + 'static,
    {
        let constructor: Constructor<T> = Rc::new(constructor);
        self.insert::<T>(constructor);
    }

    /// Construct the interface's default no-op wherever `T` is constructed
    pub fn register_default_noop<T: Operation>(&mut self) {
        let constructor: Constructor<T> =
            Rc::new(|_args: T::Args| -> Result<Box<T::Interface>> {
                Ok(<T::Interface as Mockable>::default_noop())
            });
        self.insert::<T>(constructor);
    }

    pub fn unregister<T: Operation>(&mut self) -> bool {
        self.replacements.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn is_mocked<T: Operation>(&self) -> bool {
        self.replacements.contains_key(&TypeId::of::<T>())
    }

    /// Short names of the substituted types, sorted
    pub fn mocked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .replacements
            .values()
            .map(|r| r.type_name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn constructor_for<T: Operation>(&self) -> Option<Constructor<T>> {
        self.replacements
            .get(&TypeId::of::<T>())
            .and_then(|r| r.constructor.downcast_ref::<Constructor<T>>())
            .cloned()
    }

    fn insert<T: Operation>(&mut self, constructor: Constructor<T>) {
        self.replacements.insert(
            TypeId::of::<T>(),
            Replacement {
                type_name: short_type_name::<T>(),
                constructor: Box::new(constructor),
            },
        );
    }
}

impl Facility for MockRegistry {
    fn settings_section(&self) -> &'static str {
        "MockRegistrySettings"
    }

    fn enter_job(&mut self, job: &JobHandle, settings: &SettingsSection) -> Result<()> {
        let settings: MockRegistrySettings = parse_section(self.settings_section(), settings)?;

        for name in settings.mock.iter().chain(settings.no_mock.iter()) {
            if !job.auto_mocks().iter().any(|m| &m.type_name == name) {
                return Err(AppError::Config(format!(
                    "'{}' is not an auto-mockable operation",
                    name
                )));
            }
        }

        for auto in job.auto_mocks() {
            let forced = settings.mock.contains(&auto.type_name);
            let excluded = settings.no_mock.contains(&auto.type_name);
            if (job.is_test() || forced) && !excluded {
                (auto.install)(self);
                debug!(job = %job.name(), operation = %auto.type_name, "Auto-mocked");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{run_job, JobSpec};
    use crate::operations::construct;
    use uuid::Uuid;

    trait Greeter {
        fn greet(&self) -> String;
    }

    impl Mockable for dyn Greeter {
        fn default_noop() -> Box<Self> {
            Box::new(Silent)
        }
    }

    struct Silent;
    impl Greeter for Silent {
        fn greet(&self) -> String {
            String::new()
        }
    }

    struct English(String);
    impl Greeter for English {
        fn greet(&self) -> String {
            format!("hello {}", self.0)
        }
    }
    impl Operation for English {
        type Interface = dyn Greeter;
        type Args = String;
        fn create(args: String) -> Result<Box<dyn Greeter>> {
            Ok(Box::new(English(args)))
        }
    }

    struct French(String);
    impl Greeter for French {
        fn greet(&self) -> String {
            format!("bonjour {}", self.0)
        }
    }
    impl Operation for French {
        type Interface = dyn Greeter;
        type Args = String;
        fn create(args: String) -> Result<Box<dyn Greeter>> {
            Ok(Box::new(French(args)))
        }
    }

    fn register() {
        crate::context::register_facility("mock_registry", || Box::new(MockRegistry::new()));
    }

    fn greet_in_job(spec: JobSpec) -> String {
        run_job(spec, |_| Ok(construct::<English>("ada".to_string())?.greet())).unwrap()
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<English>(), "English");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }

    #[test]
    fn test_register_mock_substitutes_within_job_only() {
        register();

        let greeting = run_job(JobSpec::new("mocked", Uuid::new_v4()), |job| {
            job.facility::<MockRegistry>()?.register_mock::<English, French>();
            Ok(construct::<English>("ada".to_string())?.greet())
        })
        .unwrap();
        assert_eq!(greeting, "bonjour ada");

        assert_eq!(greet_in_job(JobSpec::new("plain", Uuid::new_v4())), "hello ada");
    }

    #[test]
    fn test_auto_mock_applies_in_test_runs_only() {
        register();
        crate::context::with_context(|ctx| ctx.auto_mock_for_local_testing(AutoMock::of::<English>()));

        assert_eq!(greet_in_job(JobSpec::new("real", Uuid::new_v4())), "hello ada");
        assert_eq!(greet_in_job(JobSpec::new("test", Uuid::new_v4()).test_run(true)), "");
    }

    #[test]
    fn test_mock_and_no_mock_settings() {
        register();
        crate::context::with_context(|ctx| ctx.auto_mock_for_local_testing(AutoMock::of::<English>()));

        let forced = crate::domain::JobSettings::new().with(
            "MockRegistrySettings",
            "mock",
            serde_json::json!(["English"]),
        );
        assert_eq!(
            greet_in_job(JobSpec::new("forced", Uuid::new_v4()).with_settings(forced)),
            ""
        );

        let excluded = crate::domain::JobSettings::new()
            .with("MockRegistrySettings", "mock", serde_json::json!(["English"]))
            .with("MockRegistrySettings", "no_mock", serde_json::json!(["English"]));
        assert_eq!(
            greet_in_job(
                JobSpec::new("excluded", Uuid::new_v4())
                    .test_run(true)
                    .with_settings(excluded)
            ),
            "hello ada"
        );
    }

    #[test]
    fn test_unknown_mock_name_is_config_error() {
        register();
        let settings = crate::domain::JobSettings::new().with(
            "MockRegistrySettings",
            "mock",
            serde_json::json!(["Nope"]),
        );

        let result = run_job(
            JobSpec::new("unknown", Uuid::new_v4()).with_settings(settings),
            |_| Ok(()),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_mock_fn_and_unregister() {
        let mut registry = MockRegistry::new();
        registry.register_mock_fn::<English, _>(|name: String| -> Result<Box<dyn Greeter>> {
            Ok(Box::new(French(name.to_uppercase())))
        });
        assert!(registry.is_mocked::<English>());
        assert_eq!(registry.mocked_names(), vec!["English"]);

        let constructor = registry.constructor_for::<English>().unwrap();
        assert_eq!(constructor("ada".to_string()).unwrap().greet(), "bonjour ADA");

        assert!(registry.unregister::<English>());
        assert!(!registry.is_mocked::<English>());
        assert!(registry.constructor_for::<French>().is_none());
    }
}
