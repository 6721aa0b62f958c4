pub mod config;
pub mod render;
pub mod run;
pub mod tracing_setup;

pub use config::{CliConfig, RunOptions};
pub use render::render_snapshot;
pub use run::run;
pub use tracing_setup::init_tracing;
