// Domain Layer - values, settings, kwargs and run records

pub mod kwargs;
pub mod run;
pub mod settings;
pub mod value;

// Re-exports
pub use kwargs::{
    compose_kwargs_from_command_line, render_kwargs_to_command_line, CommandLine,
    FacilityOverrides, KwargValue, Kwargs,
};
pub use run::{JobRun, RunState};
pub use settings::{parse_section, JobSettings, SettingsSection};
pub use value::{row, stream_rows, Row, RowStream, Tuple, TupleStream, Value};
