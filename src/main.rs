use anyhow::Result;
use clap::Parser;
use confab::{
    cli::{
        handle_devices_command, handle_record_command, handle_sessions_command, Cli, CliCommand,
        RecordArgs,
    },
    config::Settings,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let settings = Settings::from_env();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("confab {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Devices) => handle_devices_command(settings),
        Some(CliCommand::Sessions(args)) => handle_sessions_command(args, settings),
        Some(CliCommand::Record(args)) => handle_record_command(args, settings).await,
        None => handle_record_command(RecordArgs::default(), settings).await,
    }
}
