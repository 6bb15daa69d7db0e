mod config;
mod diff;
mod script;
mod synth;

pub use config::cmd_config;
pub use diff::cmd_diff;
pub use script::cmd_script;
pub use synth::cmd_synth;
