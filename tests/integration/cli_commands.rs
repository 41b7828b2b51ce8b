#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn stdout_json(output: std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn explain_prints_the_rewritten_query() {
    let output = cargo_bin_cmd!("querygate")
        .args([
            "--table",
            "projects=id,user_id,name",
            "explain",
            "SELECT * FROM projects WHERE user_id = ?",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("rewritten: SELECT id, user_id, name FROM projects WHERE user_id = ?"));
    assert!(text.contains("suggested indexes: idx_projects_user_id"));
}

#[test]
fn explain_json_reports_plan_fields() {
    let output = cargo_bin_cmd!("querygate")
        .args([
            "--format",
            "json",
            "--table",
            "projects=id,user_id,name",
            "--index",
            "projects=user_id",
            "explain",
            "SELECT * FROM projects WHERE user_id = ?",
            "--params",
            "[\"u1\"]",
        ])
        .assert()
        .success()
        .get_output()
        .clone();
    let plan = stdout_json(output);
    assert_eq!(plan["kind"], "select");
    assert_eq!(plan["tables"], serde_json::json!(["projects"]));
    assert_eq!(plan["parameters"], serde_json::json!(["u1"]));
    assert_eq!(plan["suggested_indexes"], serde_json::json!([]));
    assert_eq!(
        plan["rewritten_query"],
        "SELECT id, user_id, name FROM projects WHERE user_id = ?"
    );
}

#[test]
fn suggest_reads_queries_from_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("workload.sql");
    fs::write(
        &path,
        "-- captured workload\n\
         SELECT * FROM projects WHERE user_id = ?\n\
         \n\
         SELECT * FROM users WHERE email = ?\n",
    )
    .expect("write workload");

    let output = cargo_bin_cmd!("querygate")
        .args(["--format", "json", "--index", "users=email", "suggest"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .clone();
    let suggestions = stdout_json(output);
    let suggestions = suggestions.as_array().expect("array");
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["kind"], "index");
    assert_eq!(
        suggestions[0]["recommendation"],
        "CREATE INDEX idx_projects_user_id ON projects (user_id)"
    );
}

#[test]
fn simulate_reports_every_query() {
    let output = cargo_bin_cmd!("querygate")
        .args([
            "--format",
            "json",
            "simulate",
            "--queries",
            "30",
            "--concurrency",
            "4",
            "--latency-ms",
            "1",
        ])
        .assert()
        .success()
        .get_output()
        .clone();
    let report = stdout_json(output);
    assert_eq!(report["metrics"]["total_queries"], 30);
    assert_eq!(report["metrics"]["rejections"], 0);
    let served = report["metrics"]["cached_queries"].as_u64().unwrap_or(0)
        + report["metrics"]["executed_queries"].as_u64().unwrap_or(0);
    assert_eq!(served, 30);
    assert!(report["suggestions"].is_array());
}

#[test]
fn malformed_table_flag_fails() {
    let output = cargo_bin_cmd!("querygate")
        .args(["--table", "projects", "explain", "SELECT 1"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("expected TABLE=col1,col2"));
}
