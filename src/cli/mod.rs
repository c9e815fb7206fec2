pub mod args;
pub mod devices;
pub mod record;
pub mod sessions;

pub use args::{Cli, CliCommand, RecordArgs, SessionsArgs, SessionsCommand};
pub use devices::handle_devices_command;
pub use record::handle_record_command;
pub use sessions::handle_sessions_command;
