//! End-to-end tests driving the `catsync` binary through the full pipeline:
//! init, load, reconcile, status, clear.

use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

fn catsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // test binary name
    path.pop(); // deps/
    path.push("catsync");
    path
}

/// Create an isolated environment: a temp dir holding the config file and
/// the database path it points at.
fn setup_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    let config_path = tmp.path().join("catsync.toml");
    let db_path = tmp.path().join("catsync.sqlite");
    std::fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}\"\n\n[log]\nlevel = \"warn\"\n",
            db_path.display()
        ),
    )
    .expect("write config");
    (tmp, config_path)
}

fn run(config: &PathBuf, args: &[&str]) -> Output {
    Command::new(catsync_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run catsync")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// A minimal catalog API search response: one hit per (naid, title) pair,
/// each with one digital object.
fn snapshot_json(records: &[(&str, &str)]) -> String {
    let hits: Vec<serde_json::Value> = records
        .iter()
        .map(|(naid, title)| {
            serde_json::json!({
                "_source": {
                    "record": {
                        "naId": naid,
                        "title": title,
                        "levelOfDescription": "fileUnit",
                        "digitalObjects": [
                            {
                                "objectId": format!("obj-{}", naid),
                                "objectUrl": format!("https://example.org/{}.pdf", naid)
                            }
                        ]
                    }
                }
            })
        })
        .collect();
    serde_json::json!({"body": {"hits": {"hits": hits}}}).to_string()
}

fn write_snapshot(tmp: &TempDir, name: &str, records: &[(&str, &str)]) -> PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, snapshot_json(records)).expect("write snapshot");
    path
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_env();

    let first = run(&config, &["init"]);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    assert!(stdout(&first).contains("Database initialized successfully."));

    let second = run(&config, &["init"]);
    assert!(second.status.success(), "stderr: {}", stderr(&second));
}

#[test]
fn test_load_stages_snapshot() {
    let (tmp, config) = setup_env();
    let snapshot = write_snapshot(&tmp, "snapshot.json", &[("1", "Alpha"), ("2", "Beta")]);
    run(&config, &["init"]);

    let output = run(&config, &["load", snapshot.to_str().expect("utf8 path")]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("records staged: 2"), "stdout: {out}");
    assert!(out.contains("digital objects staged: 2"), "stdout: {out}");
    assert!(out.contains("snapshot sha256: "), "stdout: {out}");
    assert!(out.contains("ok"), "stdout: {out}");
}

#[test]
fn test_load_dry_run_writes_nothing() {
    let (tmp, config) = setup_env();
    let snapshot = write_snapshot(&tmp, "snapshot.json", &[("1", "Alpha"), ("2", "Beta")]);
    run(&config, &["init"]);

    let dry = run(
        &config,
        &["load", snapshot.to_str().expect("utf8 path"), "--dry-run"],
    );
    assert!(dry.status.success(), "stderr: {}", stderr(&dry));
    assert!(stdout(&dry).contains("records found: 2"));

    // Staging stayed empty, so a reconcile finds nothing to insert
    let reconcile = run(&config, &["reconcile"]);
    assert!(reconcile.status.success());
    let out = stdout(&reconcile);
    assert!(out.contains("inserted: 0"), "stdout: {out}");
    assert!(!out.contains("inserted: 2"), "stdout: {out}");
}

#[test]
fn test_full_pipeline_flow() {
    let (tmp, config) = setup_env();
    let snapshot = write_snapshot(&tmp, "snapshot.json", &[("1", "Alpha"), ("2", "Beta")]);
    run(&config, &["init"]);

    let load = run(&config, &["load", snapshot.to_str().expect("utf8 path")]);
    assert!(load.status.success(), "stderr: {}", stderr(&load));

    let first = run(&config, &["reconcile"]);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let out = stdout(&first);
    assert!(out.contains("inserted: 2"), "stdout: {out}");
    assert!(out.contains("ok"), "stdout: {out}");

    // Same staging set again: a no-op
    let second = run(&config, &["reconcile"]);
    assert!(second.status.success());
    let out = stdout(&second);
    assert!(out.contains("inserted: 0"), "stdout: {out}");
    assert!(out.contains("unchanged: 2"), "stdout: {out}");

    let status = run(&config, &["status"]);
    assert!(status.status.success());
    let out = stdout(&status);
    assert!(out.contains("catalog"), "stdout: {out}");
    assert!(out.contains("object_url"), "stdout: {out}");
    assert!(out.contains("Last load:"), "stdout: {out}");
    assert!(out.contains("staged 2 record(s), 2 object(s)"), "stdout: {out}");

    let clear = run(&config, &["clear"]);
    assert!(clear.status.success());
    let out = stdout(&clear);
    assert!(out.contains("cleared catalog_temp (2 rows)"), "stdout: {out}");
    assert!(out.contains("cleared object_url_temp (2 rows)"), "stdout: {out}");

    // Empty staging archives everything as removed
    let third = run(&config, &["reconcile"]);
    assert!(third.status.success());
    assert!(stdout(&third).contains("removed: 2"), "stdout: {}", stdout(&third));
}

#[test]
fn test_changed_record_is_replaced_on_next_run() {
    let (tmp, config) = setup_env();
    let v1 = write_snapshot(&tmp, "v1.json", &[("1", "Alpha")]);
    let v2 = write_snapshot(&tmp, "v2.json", &[("1", "Alpha (revised)")]);
    run(&config, &["init"]);

    run(&config, &["load", v1.to_str().expect("utf8 path")]);
    run(&config, &["reconcile"]);
    run(&config, &["clear"]);
    run(&config, &["load", v2.to_str().expect("utf8 path")]);

    let output = run(&config, &["reconcile"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("replaced: 1"), "stdout: {out}");
    // The digital object did not change
    assert!(out.contains("unchanged: 1"), "stdout: {out}");
}

#[test]
fn test_reconcile_dry_run_reports_without_writing() {
    let (tmp, config) = setup_env();
    let snapshot = write_snapshot(&tmp, "snapshot.json", &[("1", "Alpha")]);
    run(&config, &["init"]);
    run(&config, &["load", snapshot.to_str().expect("utf8 path")]);

    let dry = run(&config, &["reconcile", "--dry-run"]);
    assert!(dry.status.success());
    let out = stdout(&dry);
    assert!(out.contains("reconcile (dry-run)"), "stdout: {out}");
    assert!(out.contains("inserted: 1"), "stdout: {out}");

    // Nothing was written, so a real run still inserts
    let real = run(&config, &["reconcile"]);
    assert!(real.status.success());
    assert!(stdout(&real).contains("inserted: 1"), "stdout: {}", stdout(&real));
}

#[test]
fn test_load_missing_snapshot_fails() {
    let (tmp, config) = setup_env();
    run(&config, &["init"]);

    let missing = tmp.path().join("nope.json");
    let output = run(&config, &["load", missing.to_str().expect("utf8 path")]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("reading snapshot file"),
        "stderr: {}",
        stderr(&output)
    );
}

#[test]
fn test_load_rejects_malformed_payload() {
    let (tmp, config) = setup_env();
    run(&config, &["init"]);

    let path = tmp.path().join("bad.json");
    std::fs::write(&path, r#"{"rows": []}"#).expect("write file");
    let output = run(&config, &["load", path.to_str().expect("utf8 path")]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("body.hits.hits"),
        "stderr: {}",
        stderr(&output)
    );
}

#[test]
fn test_missing_config_fails() {
    let bogus = PathBuf::from("/nonexistent/catsync.toml");
    let output = run(&bogus, &["status"]);
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("Failed to read config file"),
        "stderr: {}",
        stderr(&output)
    );
}
