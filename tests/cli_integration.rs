// CLI integration tests: run the binary against temporary SQLite databases.
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_rowshape");
    Command::new(exe)
}

fn fixture(dir: &Path) -> PathBuf {
    let path = dir.join("app.db");
    let conn = Connection::open(&path).expect("open");
    conn.execute_batch(
        "CREATE TABLE people (
             id INTEGER PRIMARY KEY,
             name TEXT,
             street TEXT,
             nickname TEXT,
             balance DECIMAL(10,2),
             meta JSON,
             active INTEGER
         );
         CREATE TABLE pets (owner INTEGER, name TEXT);
         INSERT INTO people VALUES
             (1, 'Ann', 'Main St', NULL, 16.16, '{\"vip\":true}', 1),
             (2, 'Bob', 'Elm St', 'bobby', 3, NULL, 0);
         INSERT INTO pets VALUES (1, 'Rex'), (1, 'Tom');",
    )
    .expect("schema");
    path
}

fn run(db: &Path, extra: &[&str]) -> Output {
    cmd()
        .arg("--db")
        .arg(db)
        .args(extra)
        .output()
        .expect("run rowshape")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

fn stderr_json(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    serde_json::from_str(line).expect("stderr json")
}

#[test]
fn rows_print_as_json_array() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = run(
        &db,
        &["--columns", "id,name,street", "--from", "FROM people ORDER BY id", "--path", "street=address"],
    );
    assert_eq!(
        stdout_json(&output),
        json!([
            {"id": 1, "name": "Ann", "address": {"street": "Main St"}},
            {"id": 2, "name": "Bob", "address": {"street": "Elm St"}}
        ])
    );
}

#[test]
fn column_flags_shape_values() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = run(
        &db,
        &[
            "--columns", "id,name,nickname,balance,meta,active",
            "--from", "FROM people WHERE id = ?",
            "--arg", "1",
            "--rename", "name=full_name",
            "--null-default", "nickname=\"none\"",
            "--bool", "active",
            "--exactly-one",
        ],
    );
    assert_eq!(
        stdout_json(&output),
        json!({
            "id": 1,
            "full_name": "Ann",
            "nickname": "none",
            "balance": "16.16",
            "meta": {"vip": true},
            "active": true
        })
    );

    let output = run(
        &db,
        &[
            "--columns", "id,nickname",
            "--from", "FROM people ORDER BY id",
            "--omit-null", "nickname",
            "--limit", "1",
        ],
    );
    assert_eq!(stdout_json(&output), json!([{"id": 1}]));
}

#[test]
fn sub_query_and_allow_list() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());
    let sub_query = "array:pets:id:SELECT name FROM pets WHERE owner = ? ORDER BY name";

    let output = run(
        &db,
        &["--columns", "id,name", "--from", "FROM people WHERE id = 1", "--sub-query", sub_query, "--first"],
    );
    assert_eq!(
        stdout_json(&output),
        json!({"id": 1, "name": "Ann", "pets": [{"name": "Rex"}, {"name": "Tom"}]})
    );

    let output = run(
        &db,
        &[
            "--columns", "id,name",
            "--from", "FROM people WHERE id = 1",
            "--sub-query", sub_query,
            "--allow", "id",
            "--allow", "name",
            "--first",
        ],
    );
    assert_eq!(stdout_json(&output), json!({"id": 1, "name": "Ann"}));
}

#[test]
fn first_row_prints_nothing_when_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = run(
        &db,
        &["--columns", "id", "--from", "FROM people WHERE id > 100", "--first"],
    );
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn exactly_one_reports_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = run(
        &db,
        &["--columns", "id", "--from", "FROM people WHERE id > 100", "--exactly-one"],
    );
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "NotFound");
}

#[test]
fn query_errors_write_no_rows() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = run(&db, &["--columns", "id", "--from", "FROM missing_table"]);
    assert_eq!(output.status.code(), Some(6));
    assert!(output.stdout.is_empty());
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Database");
}

#[test]
fn invalid_flags_are_argument_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());

    let output = run(&db, &["--columns", "id", "--from", "FROM people", "--rename", "oops"]);
    assert_eq!(output.status.code(), Some(4));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Argument");

    let output = run(&db, &["--columns", "id", "--from", ", name FROM people"]);
    assert_eq!(output.status.code(), Some(2));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["kind"], "Config");
    assert!(err["error"]["hint"].is_string());

    let output = cmd().args(["--columns", "id"]).output().expect("run");
    assert_eq!(output.status.code(), Some(4));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["hint"], "Try `rowshape --help`.");
}

#[test]
fn no_decimals_reaches_sub_query_rows() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = fixture(temp.path());
    let base = [
        "--columns", "id,balance",
        "--from", "FROM people WHERE id = 2",
        "--sub-query", "object:again:id:SELECT balance FROM people WHERE id = ?",
        "--first",
    ];

    let output = run(&db, &base);
    assert_eq!(
        stdout_json(&output),
        json!({"id": 2, "balance": "3", "again": {"balance": "3"}})
    );

    let mut flags = base.to_vec();
    flags.push("--no-decimals");
    let output = run(&db, &flags);
    assert_eq!(
        stdout_json(&output),
        json!({"id": 2, "balance": 3, "again": {"balance": 3}})
    );
}
