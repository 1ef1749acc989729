//! Command-line front end: runs exactly one statement against the storage root.
//!
//! ```bash
//! multidb --sql-create "CREATE TABLE t (id serial, name text);"
//! multidb --sql-insert "INSERT INTO t (id, name) VALUES (0, 'a');"
//! multidb --sql-select "SELECT * FROM t;"
//! MULTIDB_PREFIX=/var/lib multidb --format json --sql-select "SELECT name FROM t WHERE id = 1;"
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use multidb::parser::{parse_create, parse_delete, parse_insert, parse_select, parse_update};
use multidb::{Config, Database, ParsedStatement, QueryResult};

#[derive(Parser, Debug)]
#[command(
    name = "multidb",
    version,
    about = "Filesystem-backed SQL engine that runs one statement per invocation"
)]
#[command(group(
    ArgGroup::new("statement")
        .required(true)
        .args(["sql_create", "sql_insert", "sql_select", "sql_delete", "sql_update"])
))]
struct Args {
    /// CREATE TABLE statement
    #[arg(long, value_name = "SQL")]
    sql_create: Option<String>,

    /// INSERT statement
    #[arg(long, value_name = "SQL")]
    sql_insert: Option<String>,

    /// SELECT statement; rows are written to stdout
    #[arg(long, value_name = "SQL")]
    sql_select: Option<String>,

    /// DELETE statement
    #[arg(long, value_name = "SQL")]
    sql_delete: Option<String>,

    /// UPDATE statement
    #[arg(long, value_name = "SQL")]
    sql_update: Option<String>,

    /// Storage root; defaults to $MULTIDB_PREFIX/multidb
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "tsv")]
    format: Format,

    /// Log at debug level
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Tab-separated header and rows
    Tsv,
    /// The full result as JSON
    Json,
}

/// Which `--sql-*` flag carried the statement. Each flag only accepts its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementFlag {
    Create,
    Insert,
    Select,
    Delete,
    Update,
}

impl StatementFlag {
    fn parse(self, sql: &str) -> multidb::Result<ParsedStatement> {
        match self {
            StatementFlag::Create => parse_create(sql),
            StatementFlag::Insert => parse_insert(sql),
            StatementFlag::Select => parse_select(sql),
            StatementFlag::Delete => parse_delete(sql),
            StatementFlag::Update => parse_update(sql),
        }
    }
}

impl Args {
    fn statement(&self) -> Option<(StatementFlag, &str)> {
        [
            (StatementFlag::Create, &self.sql_create),
            (StatementFlag::Insert, &self.sql_insert),
            (StatementFlag::Select, &self.sql_select),
            (StatementFlag::Delete, &self.sql_delete),
            (StatementFlag::Update, &self.sql_update),
        ]
        .into_iter()
        .find_map(|(flag, sql)| sql.as_deref().map(|sql| (flag, sql)))
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("multidb=debug")
    } else {
        EnvFilter::try_from_env("MULTIDB_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("multidb=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn load_config(args: &Args) -> multidb::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn run(args: &Args) -> multidb::Result<()> {
    let (flag, sql) = args
        .statement()
        .ok_or_else(|| multidb::Error::Config("no statement given".to_string()))?;
    let statement = flag.parse(sql)?;

    let config = load_config(args)?;
    debug!(root = %config.root.display(), ?flag, "opening database");
    let db = Database::open(config)?;
    let result = db.execute(statement)?;
    write_result(&result, args.format)
}

fn write_result(result: &QueryResult, format: Format) -> multidb::Result<()> {
    let mut stdout = io::stdout().lock();
    match format {
        Format::Tsv => stdout.write_all(result.to_tsv().as_bytes())?,
        Format::Json => {
            serde_json::to_writer_pretty(&mut stdout, result)?;
            stdout.write_all(b"\n")?;
        }
    }
    stdout.flush()?;
    Ok(())
}
