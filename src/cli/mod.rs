//! CLI argument surface; subcommands live here.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use crate::logging::{LogFormat, LogSink, LoggingConfig};
use crate::Result;

pub mod backup;
pub mod checkdb;
pub mod restore;
pub mod validate;

#[derive(Debug, Clone)]
pub enum Command {
    Backup(backup::BackupArgs),
    Restore(restore::RestoreArgs),
    Checkdb(checkdb::CheckdbArgs),
    Validate(validate::ValidateArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
    pub logging: LoggingConfig,
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Backup(b) => backup::execute(b),
        Command::Restore(r) => restore::execute(r),
        Command::Checkdb(c) => checkdb::execute(c),
        Command::Validate(v) => validate::execute(v),
        Command::None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(name = "pgbak", version, about = "Block-level backup tool for PostgreSQL data files")]
struct Cli {
    /// Log format: human or json.
    #[arg(long, global = true, default_value = "human")]
    log_format: String,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Take a backup of a database instance into the store.
    Backup(backup::BackupArgs),
    /// Restore a backup chain into a target directory.
    Restore(restore::RestoreArgs),
    /// Verify checksums of live data files in an instance directory.
    Checkdb(checkdb::CheckdbArgs),
    /// Re-read a stored backup and verify frames, pages and file CRCs.
    Validate(validate::ValidateArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);

    let logging = LoggingConfig {
        format: match cli.log_format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Human,
        },
        sink: match cli.log_file {
            Some(path) => LogSink::File(path),
            None => LogSink::Console,
        },
        debug: cli.debug,
    };

    let command = match cli.command {
        Some(Subcommands::Backup(args)) => Command::Backup(args),
        Some(Subcommands::Restore(args)) => Command::Restore(args),
        Some(Subcommands::Checkdb(args)) => Command::Checkdb(args),
        Some(Subcommands::Validate(args)) => Command::Validate(args),
        None => Command::None,
    };

    Ok(CliArgs { command, logging })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
