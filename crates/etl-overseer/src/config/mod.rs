pub mod loader;
pub mod merge;
pub mod schema;
pub mod variables;

pub use loader::{load_config, load_config_from_str, ConfigLoader, DEFAULT_JOURNAL_ENDPOINT};
pub use schema::{
    ActionKind, ActionSpec, EndpointConfig, EtlConfig, FileFormat, OptionOverride, PipelineConfig,
};
pub use variables::VariableStore;
