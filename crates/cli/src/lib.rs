pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use steamguard_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "steamguard",
    about = "SteamGuard operator CLI",
    long_about = "Inspect SteamGuard configuration and check that the dashboard collector is reachable.",
    after_help = "Examples:\n  steamguard config\n  steamguard doctor --json\n  steamguard --config ./steamguard.toml doctor"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of the default search paths")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and probe the dashboard collector with one handshake")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Config => commands::config::run(&options),
        Command::Doctor { json } => commands::doctor::run(&options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
