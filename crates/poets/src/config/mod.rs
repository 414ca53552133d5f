pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, resolve_paths};
pub use schema::{
    Config, DatabaseConfig, GeneratorConfig, MediaConfig, PipelineConfig, QueueConfig,
};
