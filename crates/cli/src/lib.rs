pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::commands::verify::{VerifyArgs, VerifyTarget};

#[derive(Debug, Parser)]
#[command(
    name = "treejar",
    about = "Treejar integration operator CLI",
    long_about = "Check Redis and provider readiness, inspect configuration, and run live provider calls through the retry and token layer.",
    after_help = "Examples:\n  treejar doctor --json\n  treejar config\n  treejar verify crm --phone +971500000000\n  treejar verify wazzup --chat-id 79990000000"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Redis connectivity, and provider credential readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Make one live call to a provider and report the outcome as JSON")]
    Verify {
        #[arg(value_enum)]
        target: VerifyTarget,
        #[arg(long, help = "Phone number to look up (crm)")]
        phone: Option<String>,
        #[arg(long, help = "Chat id to message (wazzup)")]
        chat_id: Option<String>,
        #[arg(long, default_value = "Treejar connectivity check", help = "Message text (wazzup)")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::CommandResult::text(commands::config::run()),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Verify { target, phone, chat_id, text } => {
            commands::verify::run(VerifyArgs { target, phone, chat_id, text })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
