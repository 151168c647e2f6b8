//! Developer CLI over the SampleDB object history core.
//!
//! # Responsibility
//! - Run the diff engine on JSON files.
//! - Print the stored history of one object.
//!
//! Exit codes: 0 on success, 1 when a diff does not apply, 2 on any other
//! failure.

use clap::{Parser, Subcommand};
use log::info;
use sampledb_core::{
    apply_diff, calculate_value_diff, core_version, default_log_level, init_logging, invert_diff,
    open_db, Diff, DiffFormatError, DiffMismatchError, LoggingError, ObjectId, ObjectService,
    ServiceError, Slot, SqliteVersionRepository, TypeRegistry,
};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// SampleDB object history tools
#[derive(Parser, Debug)]
#[command(name = "sampledb")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for log files; logging stays off without it
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the diff between two JSON values
    Diff { before: PathBuf, after: PathBuf },

    /// Apply a diff to a JSON value under its schema
    Apply {
        before: PathBuf,
        diff: PathBuf,
        schema: PathBuf,
    },

    /// Print the inverse of a diff
    Invert { diff: PathBuf },

    /// Print every stored version of an object
    History {
        /// Path to the SQLite database
        #[arg(long)]
        db: PathBuf,
        object_id: ObjectId,
    },
}

#[derive(Debug)]
enum CliError {
    Io { path: PathBuf, message: String },
    Json { path: PathBuf, message: String },
    DiffFormat(DiffFormatError),
    DiffMismatch(DiffMismatchError),
    Logging(LoggingError),
    Service(ServiceError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read `{}`: {message}", path.display()),
            Self::Json { path, message } => {
                write!(f, "invalid json in `{}`: {message}", path.display())
            }
            Self::DiffFormat(err) => write!(f, "{err}"),
            Self::DiffMismatch(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Service(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CliError {}

impl From<DiffFormatError> for CliError {
    fn from(value: DiffFormatError) -> Self {
        Self::DiffFormat(value)
    }
}

impl From<DiffMismatchError> for CliError {
    fn from(value: DiffMismatchError) -> Self {
        Self::DiffMismatch(value)
    }
}

impl From<LoggingError> for CliError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<ServiceError> for CliError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err {
                CliError::DiffMismatch(_) => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    let Some(command) = cli.command else {
        println!("sampledb_core version={}", core_version());
        return Ok(());
    };

    match command {
        Command::Diff { before, after } => {
            let diff = calculate_value_diff(&read_json(&before)?, &read_json(&after)?);
            print_json(&diff.map_or(Value::Null, |diff| diff.to_json()));
        }
        Command::Apply {
            before,
            diff,
            schema,
        } => {
            let diff = read_diff(&diff)?;
            let result = apply_diff(
                &Slot::Set(read_json(&before)?),
                diff.as_ref(),
                &read_json(&schema)?,
                true,
                &TypeRegistry::with_builtin_types(),
            )?;
            // An unset result means the diff deleted the whole value.
            print_json(&result.into_value().unwrap_or(Value::Null));
        }
        Command::Invert { diff } => {
            let inverted = read_diff(&diff)?
                .map(|diff| invert_diff(&diff))
                .transpose()?;
            print_json(&inverted.map_or(Value::Null, |diff| diff.to_json()));
        }
        Command::History { db, object_id } => {
            let mut conn = open_db(&db).map_err(|err| ServiceError::Repo(err.into()))?;
            let repo = SqliteVersionRepository::try_new(&mut conn).map_err(ServiceError::from)?;
            let service = ObjectService::new(repo);
            let versions = service.get_object_versions(object_id)?;
            info!(
                "event=cli_history module=cli status=ok object_id={object_id} versions={}",
                versions.len()
            );
            let versions = serde_json::to_value(&versions).map_err(|err| CliError::Json {
                path: db.clone(),
                message: err.to_string(),
            })?;
            print_json(&versions);
        }
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, CliError> {
    let text = std::fs::read_to_string(path).map_err(|err| CliError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|err| CliError::Json {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Reads a diff file; a JSON `null` stands for "no diff".
fn read_diff(path: &Path) -> Result<Option<Diff>, CliError> {
    match read_json(path)? {
        Value::Null => Ok(None),
        value => Ok(Some(Diff::from_json(&value)?)),
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
