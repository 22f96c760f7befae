//! Purpose: `rowshape` CLI entry point: map one SQLite query into JSON on stdout.
//! Role: Binary crate root; parses args, builds a mapper, writes rows to stdout.
//! Invariants: Nothing is written to stdout when the query itself fails.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, error::ErrorKind as ClapErrorKind};
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use rowshape::api::{
    AllowedProperties, Context, Error, ErrorKind, MapOption, Mapper, Mapping, Mappings, SubQuery,
    Value, bool_column, to_exit_code,
};
use rowshape::core::scan::scan_json;

#[derive(Parser, Debug)]
#[command(
    name = "rowshape",
    version,
    about = "Run a query against a SQLite database and print the rows as JSON",
    after_help = r#"EXAMPLES
  $ rowshape --db app.db --columns id,name --from "FROM people"
  $ rowshape --db app.db --columns id,street --from "FROM people" --path street=address
  $ rowshape --db app.db --columns id,name --from "FROM people WHERE id = ?" --arg 7 --exactly-one
  $ rowshape --db app.db --columns id,name --from "FROM people" \
      --sub-query "array:pets:id:SELECT name FROM pets WHERE owner = ?"

SUB-QUERIES
  KIND:PROPERTY:ARG_COLUMNS:QUERY where KIND is array, object, one or merge.
  ARG_COLUMNS is a comma-separated list of output properties bound as arguments.
  merge ignores PROPERTY and copies the sub-query row into the parent row.

NOTES
  - --arg and --null-default values are parsed as JSON, falling back to text.
  - RUST_LOG controls diagnostics on stderr (default: warn)."#
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "SQLite database file (opened read-only)")]
    db: PathBuf,
    #[arg(long, value_name = "LIST", help = "Comma-separated select list")]
    columns: String,
    #[arg(long, value_name = "CLAUSE", help = "Query text after the select list, e.g. \"FROM t\"")]
    from: String,
    #[arg(long = "arg", value_name = "VALUE", help = "Bind argument (repeatable, in order)")]
    args: Vec<String>,
    #[arg(long, value_name = "COLUMN=A.B", help = "Nest a column under a dotted path")]
    path: Vec<String>,
    #[arg(long, value_name = "COLUMN=NAME", help = "Rename a column's output property")]
    rename: Vec<String>,
    #[arg(long, value_name = "COLUMN", help = "Drop the property when the column is null")]
    omit_null: Vec<String>,
    #[arg(long, value_name = "COLUMN=VALUE", help = "Replacement value for a null column")]
    null_default: Vec<String>,
    #[arg(long, value_name = "COLUMN", help = "Decode a text column as JSON")]
    json: Vec<String>,
    #[arg(long = "bool", value_name = "COLUMN", help = "Convert a column to a boolean")]
    bool_columns: Vec<String>,
    #[arg(long, value_name = "PROPERTY", help = "Keep only listed properties (repeatable)")]
    allow: Vec<String>,
    #[arg(long, value_name = "N", help = "Stop after N rows")]
    limit: Option<usize>,
    #[arg(long, value_name = "SPEC", help = "Attach a sub-query (see SUB-QUERIES)")]
    sub_query: Vec<String>,
    #[arg(long, conflicts_with = "exactly_one", help = "Print only the first row, if any")]
    first: bool,
    #[arg(long, help = "Print the single row; no rows is a not-found error")]
    exactly_one: bool,
    #[arg(long, help = "Keep DECIMAL columns as driver values instead of decimals")]
    no_decimals: bool,
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                return Err(Error::new(ErrorKind::Argument)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `rowshape --help`."));
            }
        },
    };

    let mapper = build_mapper(&cli)?;
    let call_options = call_options(&cli);
    let args: Vec<Value> = cli.args.iter().map(|raw| parse_value(raw)).collect();
    let conn = open_database(&cli.db)?;
    let ctx = Context::new();

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    if cli.exactly_one {
        mapper.write_exactly_one_row(&mut out, &ctx, &conn, &args, &call_options)?;
    } else if cli.first {
        mapper.write_first_row(&mut out, &ctx, &conn, &args, &call_options)?;
    } else {
        mapper.write_rows(&mut out, &ctx, &conn, &args, &call_options)?;
        out.write_all(b"\n").map_err(stdout_error)?;
    }
    out.flush().map_err(stdout_error)?;
    Ok(0)
}

fn build_mapper(cli: &Cli) -> Result<Mapper, Error> {
    let mut options = vec![MapOption::query(cli.from.as_str())];
    let mappings = column_mappings(cli)?;
    if !mappings.is_empty() {
        options.push(MapOption::Mappings(mappings));
    }
    for raw in &cli.sub_query {
        options.push(MapOption::sub_query(
            parse_sub_query(raw)?.use_decimals(!cli.no_decimals),
        ));
    }
    if cli.no_decimals {
        options.push(MapOption::UseDecimals(false));
    }
    Mapper::new(cli.columns.as_str(), options)
}

fn call_options(cli: &Cli) -> Vec<MapOption> {
    let mut options = Vec::new();
    if !cli.allow.is_empty() {
        options.push(MapOption::Allowed(
            cli.allow.iter().cloned().collect::<AllowedProperties>(),
        ));
    }
    if let Some(max_rows) = cli.limit {
        options.push(MapOption::limit(max_rows));
    }
    options
}

fn column_mappings(cli: &Cli) -> Result<Mappings, Error> {
    let mut mappings = Mappings::new();
    for raw in &cli.path {
        let (column, path) = split_pair("--path", raw)?;
        let entry = mappings.entry(column).or_insert_with(Mapping::new);
        entry.path = path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
    }
    for raw in &cli.rename {
        let (column, property) = split_pair("--rename", raw)?;
        mappings.entry(column).or_insert_with(Mapping::new).property_name = Some(property);
    }
    for column in &cli.omit_null {
        mappings.entry(column.clone()).or_insert_with(Mapping::new).omit_null = true;
    }
    for raw in &cli.null_default {
        let (column, value) = split_pair("--null-default", raw)?;
        mappings.entry(column).or_insert_with(Mapping::new).null_default = Some(parse_value(&value));
    }
    for column in &cli.json {
        let entry = mappings.entry(column.clone()).or_insert_with(Mapping::new);
        *entry = std::mem::take(entry).scanner(scan_json);
    }
    for column in &cli.bool_columns {
        let entry = mappings.entry(column.clone()).or_insert_with(Mapping::new);
        *entry = std::mem::take(entry).scanner(bool_column);
    }
    Ok(mappings)
}

fn parse_sub_query(raw: &str) -> Result<SubQuery, Error> {
    let mut parts = raw.splitn(4, ':');
    let (Some(kind), Some(property), Some(arg_columns), Some(query)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::new(ErrorKind::Argument)
            .with_message(format!("invalid --sub-query: {raw}"))
            .with_hint("Use KIND:PROPERTY:ARG_COLUMNS:QUERY, e.g. array:pets:id:SELECT ..."));
    };
    let arg_columns: Vec<String> = arg_columns
        .split(',')
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(str::to_string)
        .collect();
    match kind {
        "array" => Ok(SubQuery::array(property, query, arg_columns)),
        "object" => Ok(SubQuery::object(property, query, arg_columns)),
        "one" => Ok(SubQuery::exactly_one(property, query, arg_columns)),
        "merge" => Ok(SubQuery::merge(query, arg_columns)),
        other => Err(Error::new(ErrorKind::Argument)
            .with_message(format!("unknown sub-query kind: {other}"))
            .with_hint("Expected one of: array, object, one, merge.")),
    }
}

fn split_pair(flag: &str, raw: &str) -> Result<(String, String), Error> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::new(ErrorKind::Argument)
            .with_message(format!("{flag} expects COLUMN=VALUE, got: {raw}"))),
    }
}

// JSON literal when it parses, otherwise the raw text.
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => Value::from_json(value),
        Err(_) => Value::from(raw),
    }
}

fn open_database(path: &Path) -> Result<Connection, Error> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| {
        Error::new(ErrorKind::Database)
            .with_message(format!("failed to open database {}", path.display()))
            .with_hint("Check the --db path.")
            .with_source(err)
    })
}

fn stdout_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write rows")
        .with_source(err)
}

fn emit_error(err: &Error) {
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Config => "invalid mapper configuration".to_string(),
        ErrorKind::Argument => "invalid argument".to_string(),
        ErrorKind::Decode => "failed to decode value".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Database => "database error".to_string(),
        ErrorKind::Cancelled => "cancelled".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> serde_json::Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), serde_json::Value::Object(inner));
    serde_json::Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
