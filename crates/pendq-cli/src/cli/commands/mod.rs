//! CLI command handlers, one file per subcommand.

mod add;
mod completions;
mod endpoint;
mod kick;
mod man;
mod run;
mod status;

pub use add::run_add;
pub use completions::run_completions;
pub use endpoint::run_endpoint;
pub use kick::run_kick;
pub use man::run_man;
pub use run::run_daemon;
pub use status::run_status;
