//! Integration tests for the recalc-worker binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

fn store_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write_sheet(
        dir.path(),
        "S1",
        json!([
            {"sheet_id": "S1", "row": 0, "col": 0, "value": 10},
            {"sheet_id": "S1", "row": 1, "col": 0, "value": 20},
            {"sheet_id": "S1", "row": 2, "col": 0, "value": 30}
        ]),
    );
    write_sheet(
        dir.path(),
        "S2",
        json!([
            {"sheet_id": "S2", "row": 0, "col": 0, "value": null, "formula": "=B1"},
            {"sheet_id": "S2", "row": 0, "col": 1, "value": null, "formula": "=A1"}
        ]),
    );
    dir
}

fn write_sheet(dir: &Path, sheet_id: &str, records: Value) {
    fs::write(dir.join(format!("{}.json", sheet_id)), records.to_string()).expect("Failed to write sheet");
}

fn worker(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("recalc-worker").unwrap();
    cmd.arg("--store-dir").arg(dir.path());
    cmd
}

fn lines(requests: &[Value]) -> String {
    requests.iter().map(|r| format!("{}\n", r)).collect()
}

/// Parse stdout into response envelopes.
fn responses(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line is not JSON"))
        .collect()
}

fn by_id<'a>(responses: &'a [Value], id: &str) -> &'a Value {
    &responses
        .iter()
        .find(|r| r["id"] == id)
        .unwrap_or_else(|| panic!("no response for {}", id))["response"]
}

#[test]
fn test_help() {
    Command::cargo_bin("recalc-worker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--store-dir"))
        .stdout(predicate::str::contains("--queue-capacity"));
}

#[test]
fn test_calculate_over_stdio() {
    let dir = store_dir();
    let input = lines(&[
        json!({"id": "1", "request": {"type": "calculate", "sheet_id": "S1", "formula": "=SUM(A1:A3)", "cell_ref": "B1"}}),
        json!({"id": "2", "request": {"type": "get_dependencies", "sheet_id": "S1", "cell_ref": "B1"}}),
        json!({"id": "3", "request": {"type": "check_circular_refs", "sheet_id": "S2"}}),
        json!({"id": "4", "request": {"type": "load_sheet", "sheet_id": "S2"}}),
        json!({"id": "5", "request": {"type": "check_circular_refs", "sheet_id": "S2"}}),
        json!({"id": "6", "request": {"type": "batch_calculate", "sheet_id": "S1", "items": [
            {"cell_ref": "C1", "formula": "=1/0"},
            {"cell_ref": "C2", "formula": "=2+2"}
        ]}}),
        json!({"id": "7", "request": {"type": "cache_stats"}}),
    ]);

    let output = worker(&dir).write_stdin(input).assert().success().get_output().clone();
    let responses = responses(&output.stdout);
    assert_eq!(responses.len(), 7);

    let calculated = by_id(&responses, "1");
    assert_eq!(calculated["type"], "calculated");
    assert_eq!(calculated["result"], 60.0);
    assert!(calculated["duration_ms"].is_number());

    assert_eq!(by_id(&responses, "2")["precedents"], json!(["A1", "A2", "A3"]));

    let unloaded = by_id(&responses, "3");
    assert_eq!(unloaded["has_circular_refs"], false);
    assert_eq!(unloaded["circular_cells"], json!([]));

    let cycles = by_id(&responses, "5");
    assert_eq!(cycles["has_circular_refs"], true);
    assert_eq!(cycles["circular_cells"], json!(["A1", "B1"]));

    assert_eq!(
        by_id(&responses, "6")["results"],
        json!([
            {"cell_ref": "C1", "result": "#ERROR!"},
            {"cell_ref": "C2", "result": 4.0}
        ])
    );

    let stats = by_id(&responses, "7");
    assert_eq!(stats["type"], "cache_stats");
    assert_eq!(stats["cache_size"], 3);
    assert_eq!(stats["loaded_sheets"], 2);
}

#[test]
fn test_bad_input_is_ignored() {
    let dir = store_dir();
    let mut input = String::from("this is not json\n\n");
    input.push_str(&lines(&[
        json!({"id": "a", "request": {"type": "reticulate_splines"}}),
        json!({"id": "b", "request": {"type": "load_sheet", "sheet_id": "nope"}}),
        json!({"id": "c", "request": {"type": "clear_cache"}}),
    ]));

    let output = worker(&dir)
        .write_stdin(input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Ignoring malformed message"))
        .get_output()
        .clone();
    let responses = responses(&output.stdout);

    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r["id"] != "a"));
    assert_eq!(by_id(&responses, "b")["type"], "error");
    assert_eq!(by_id(&responses, "c")["type"], "cache_cleared");
}

#[test]
fn test_update_cell_over_stdio() {
    let dir = store_dir();
    let input = lines(&[
        json!({"id": "1", "request": {"type": "calculate", "sheet_id": "S1", "formula": "=A1*2", "cell_ref": "B1"}}),
        json!({"id": "2", "request": {"type": "update_cell", "sheet_id": "S1", "row": 0, "col": 0, "value": 21}}),
        json!({"id": "3", "request": {"type": "calculate", "sheet_id": "S1", "formula": "=A1*2", "cell_ref": "B1"}}),
    ]);

    let output = worker(&dir)
        .args(["--min-rows", "5", "--min-cols", "5"])
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .clone();
    let responses = responses(&output.stdout);

    assert_eq!(by_id(&responses, "1")["result"], 20.0);
    assert_eq!(by_id(&responses, "2"), &json!({"type": "cell_updated", "count": 2}));
    assert_eq!(by_id(&responses, "3")["result"], 42.0);
}
