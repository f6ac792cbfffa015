//! revdb - revision-addressed sessions over a Git-backed store
//!
//! This is the main entry point for the revdb command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use revdb::config::EngineConfig;
use revdb::db::{render_result_set, DbResult, Engine, Repl};
use revdb::migrate::VerifyMode;
use revdb::sql::QueryResult;
use revdb::session::SessionError;
use revdb::storage::{BranchName, FormatVersion};

#[derive(Parser)]
#[command(name = "revdb", version, about = "Revision-addressed sessions over a Git-backed store")]
struct Cli {
    /// directory holding the databases
    #[arg(long, global = true, default_value = ".revdb")]
    root: PathBuf,

    /// log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new database
    Init {
        database: String,
        /// storage format: v1 or v2
        #[arg(long, value_parser = parse_format)]
        format: Option<FormatVersion>,
    },
    /// List branches
    Branches { database: String },
    /// List tags
    Tags { database: String },
    /// Create a branch
    Branch {
        database: String,
        name: String,
        /// start revision (defaults to the default branch head)
        #[arg(long)]
        from: Option<String>,
    },
    /// Delete a branch
    DeleteBranch { database: String, name: String },
    /// Create a tag
    Tag {
        database: String,
        name: String,
        #[arg(long)]
        rev: Option<String>,
    },
    /// Change the default branch
    SetDefault { database: String, branch: String },
    /// Show commit history of <db> or <db>/<rev>
    Log {
        identifier: String,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Translate a database to another storage format
    Migrate {
        database: String,
        #[arg(long, value_parser = parse_format, default_value = "v2")]
        to: FormatVersion,
        /// verify only n sampled commits instead of all
        #[arg(long)]
        sample: Option<usize>,
    },
    /// Execute statements against <db> or <db>/<rev>
    Exec {
        identifier: String,
        #[arg(short = 'e', long)]
        execute: String,
    },
    /// Start an interactive session on <db> or <db>/<rev>
    Repl { identifier: String },
}

fn parse_format(raw: &str) -> Result<FormatVersion, String> {
    FormatVersion::parse(raw).map_err(|_| format!("unknown format '{}', expected v1 or v2", raw))
}

/// `<db>` or `<db>/<rev>`
fn identifier(database: &str, revision: Option<&str>) -> String {
    match revision {
        Some(rev) => format!("{}/{}", database, rev),
        None => database.to_string(),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "revdb=debug" } else { "revdb=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> DbResult<()> {
    let mut config = EngineConfig::new(&cli.root);
    if let Command::Init {
        format: Some(format), ..
    } = &cli.command
    {
        config = config.format(*format);
    }
    let engine = Engine::open(config);

    match cli.command {
        Command::Init { database, .. } => {
            std::fs::create_dir_all(&cli.root)?;
            let store = engine.create_database(&database)?;
            println!("Initialized database '{}' ({})", database, store.format()?);
        }
        Command::Branches { database } => {
            let store = engine.database(&database)?;
            let default = store.default_branch()?;
            for (name, commit) in store.list_branches()? {
                let marker = if name == default { "*" } else { " " };
                println!("{} {:<30} {}", marker, name, commit.short());
            }
        }
        Command::Tags { database } => {
            for (name, commit) in engine.database(&database)?.list_tags()? {
                println!("{:<30} {}", name, commit.short());
            }
        }
        Command::Branch { database, name, from } => {
            let mut conn = engine.connect(&identifier(&database, from.as_deref()))?;
            let commit = conn.session_mut().create_branch(&name, None)?;
            println!("Created branch '{}' at {}", name, commit.short());
        }
        Command::DeleteBranch { database, name } => {
            let branch = BranchName::new(name.as_str()).map_err(SessionError::from)?;
            let commit = engine.database(&database)?.delete_branch(&branch)?;
            println!("Deleted branch '{}' (was {})", name, commit.short());
        }
        Command::Tag { database, name, rev } => {
            let mut conn = engine.connect(&identifier(&database, rev.as_deref()))?;
            let commit = conn.session_mut().create_tag(&name, None)?;
            println!("Created tag '{}' at {}", name, commit.short());
        }
        Command::SetDefault { database, branch } => {
            let mut conn = engine.connect(&format!("{}/{}", database, branch))?;
            conn.session_mut().set_default_branch(&branch)?;
            println!("Default branch of '{}' is now '{}'", database, branch);
        }
        Command::Log { identifier, limit } => {
            let mut conn = engine.connect(&identifier)?;
            for info in conn.session_mut().history(Some(limit))? {
                let meta = &info.commit.meta;
                println!("commit {}", info.id);
                println!("Author: {} <{}>", meta.author_name, meta.author_email);
                println!("Date:   {}", meta.timestamp.to_rfc2822());
                println!();
                for line in meta.message.lines() {
                    println!("    {}", line);
                }
                println!();
            }
        }
        Command::Migrate { database, to, sample } => {
            let verify = sample.map(VerifyMode::Sample).unwrap_or(VerifyMode::All);
            let report = engine.migrate(&database, to, verify)?;
            println!(
                "Migrated '{}' from {} to {}: {} commits, {} roots, {} tables, {} refs ({} commits verified)",
                database,
                report.from,
                report.to,
                report.commits,
                report.roots,
                report.tables,
                report.refs,
                report.verified_commits
            );
        }
        Command::Exec { identifier, execute } => {
            let mut conn = engine.connect(&identifier)?;
            for result in conn.execute_batch(&execute)? {
                print_result(&result);
            }
        }
        Command::Repl { identifier } => {
            let conn = engine.connect(&identifier)?;
            Repl::new(conn).run()?;
        }
    }
    Ok(())
}

fn print_result(result: &QueryResult) {
    match result {
        QueryResult::Success { message } => println!("{}", message),
        QueryResult::Select(rs) => println!("{}", render_result_set(rs, usize::MAX)),
    }
}
