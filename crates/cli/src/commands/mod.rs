pub mod call;
pub mod config;
pub mod utils;
pub mod watch;

pub use call::run_call;
pub use config::{handle_config_command, ConfigCommands};
pub use watch::{run_watch, WatchKind, WatchOptions};
