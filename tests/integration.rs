use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn axs_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_axs"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // One worker keeps outcome counts deterministic when a file carries
    // several revisions of the same paper.
    let config_content = format!(
        r#"[db]
path = "{}/data/axs.sqlite"

[feed]
base_url = "http://127.0.0.1:9/oai"

[sync]
concurrency = 1

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("axs.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn record(id: &str, date: Option<&str>, categories: serde_json::Value, title: &str) -> String {
    serde_json::json!({
        "identifier": id,
        "datestamp": date,
        "categories": categories,
        "metadata": {"metadata": {"arXivRaw": {"id": id, "title": title}}}
    })
    .to_string()
}

fn write_jsonl(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

fn run_axs(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = axs_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run axs binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn first_batch(dir: &Path) -> PathBuf {
    write_jsonl(
        dir,
        "first.jsonl",
        &[
            record("2401.00001", Some("2024-01-01"), serde_json::json!("cs:cs:AI"), "One"),
            record("2401.00002", None, serde_json::json!("cs:cs:AI"), "Two"),
            record(
                "2401.00003",
                Some("2024-01-01"),
                serde_json::json!(["cs:cs:LG", "math:math:CO"]),
                "Three",
            ),
        ],
    )
}

fn sync_file(config_path: &Path, file: &Path, extra: &[&str]) -> (String, String, bool) {
    let mut args = vec!["sync", "--file", file.to_str().unwrap(), "--progress", "off"];
    args.extend_from_slice(extra);
    run_axs(config_path, &args)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_axs(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_axs(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_axs(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_watermark_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);

    let (stdout, stderr, success) = run_axs(&config_path, &["watermark"]);
    assert!(success, "watermark failed: {}", stderr);
    assert!(stdout.contains("beginning"));
}

#[test]
fn test_sync_replay_counts_and_failures() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    let file = first_batch(tmp.path());

    let (stdout, stderr, success) = sync_file(&config_path, &file, &[]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted: 2"), "stdout={}", stdout);
    assert!(stdout.contains("failed: 1"));
    assert!(stdout.contains("failed ids: 2401.00002"));
    assert!(stdout.contains("next from: 2023-12-31"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_sync_idempotent_no_duplicates() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    let file = first_batch(tmp.path());

    sync_file(&config_path, &file, &[]);
    let (stdout, _, success) = sync_file(&config_path, &file, &[]);
    assert!(success);
    assert!(stdout.contains("inserted: 0"));
    assert!(stdout.contains("updated: 0"));
    assert!(stdout.contains("skipped: 2"));
}

#[test]
fn test_sync_newer_revision_wins() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    sync_file(&config_path, &first_batch(tmp.path()), &[]);

    let second = write_jsonl(
        tmp.path(),
        "second.jsonl",
        &[
            record("2401.00001", Some("2024-01-03"), serde_json::json!("cs:cs:CL"), "One v3"),
            record("2401.00001", Some("2024-01-02"), serde_json::json!("cs:cs:AI"), "One v2"),
            record("2401.00003", Some("2024-01-01"), serde_json::json!("cs:cs:LG"), "Three again"),
        ],
    );
    let (stdout, stderr, success) = sync_file(&config_path, &second, &[]);
    assert!(success, "sync failed: {}", stderr);
    assert!(stdout.contains("updated: 1"), "stdout={}", stdout);
    assert!(stdout.contains("skipped: 2"));

    let (stdout, _, success) = run_axs(&config_path, &["get", "2401.00001", "--json"]);
    assert!(success);
    let paper: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(paper["update_date"], "2024-01-03");
    assert_eq!(paper["categories"], serde_json::json!(["cs:cs:CL"]));
    assert_eq!(
        paper["document"]["metadata"]["arXivRaw"]["title"],
        "One v3"
    );

    // An equal-date record changes nothing.
    let (stdout, _, _) = run_axs(&config_path, &["get", "2401.00003", "--json"]);
    let paper: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        paper["categories"],
        serde_json::json!(["cs:cs:LG", "math:math:CO"])
    );

    let (stdout, _, _) = run_axs(&config_path, &["watermark"]);
    assert_eq!(stdout.trim(), "2024-01-02");
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    let file = first_batch(tmp.path());

    let (stdout, stderr, success) = sync_file(&config_path, &file, &["--dry-run"]);
    assert!(success, "dry-run failed: {}", stderr);
    assert!(stdout.contains("would insert: 2"));
    assert!(stdout.contains("malformed: 1"));

    let (_, _, found) = run_axs(&config_path, &["get", "2401.00001"]);
    assert!(!found, "dry run must not write");
}

#[test]
fn test_sync_limit() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    let file = first_batch(tmp.path());

    let (stdout, _, success) = sync_file(&config_path, &file, &["--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("inserted: 1"));
    assert!(stdout.contains("failed: 0"));
}

#[test]
fn test_bad_replay_line_fails_run_but_keeps_progress() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    let file = write_jsonl(
        tmp.path(),
        "broken.jsonl",
        &[
            record("2401.00001", Some("2024-01-01"), serde_json::json!("cs:cs:AI"), "One"),
            "{not json".to_string(),
            record("2401.00004", Some("2024-01-01"), serde_json::json!("cs:cs:AI"), "Four"),
        ],
    );

    let (stdout, _, success) = sync_file(&config_path, &file, &[]);
    assert!(!success, "a broken feed must fail the run");
    assert!(stdout.contains("(failed)"));

    let (_, _, found) = run_axs(&config_path, &["get", "2401.00001"]);
    assert!(found, "records before the failure stay committed");
    let (_, _, found) = run_axs(&config_path, &["get", "2401.00004"]);
    assert!(!found, "records after the failure are not processed");
}

#[test]
fn test_malformed_replay_record_is_reported_not_fatal() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    let file = write_jsonl(
        tmp.path(),
        "typed.jsonl",
        &[
            record("2401.00001", Some("2024-01-01"), serde_json::json!("cs:cs:AI"), "One"),
            r#"{"identifier":12345,"datestamp":"2024-01-01","categories":"cs:cs:AI","metadata":{}}"#
                .to_string(),
            r#"{"identifier":"2401.00005","datestamp":20240101,"categories":"cs:cs:AI"}"#
                .to_string(),
            record("2401.00003", Some("2024-01-01"), serde_json::json!("cs:cs:LG"), "Three"),
        ],
    );

    let (stdout, stderr, success) = sync_file(&config_path, &file, &[]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted: 2"), "stdout={}", stdout);
    assert!(stdout.contains("failed: 2"));
    assert!(stdout.contains("failed ids: 2401.00005"));
    assert!(stdout.contains("(completed)"));

    let (_, _, found) = run_axs(&config_path, &["get", "2401.00003"]);
    assert!(found, "records after a malformed one are still applied");
    let (_, _, found) = run_axs(&config_path, &["get", "2401.00005"]);
    assert!(!found);
}

#[test]
fn test_get_missing_paper_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);

    let (_, stderr, success) = run_axs(&config_path, &["get", "9999.99999"]);
    assert!(!success);
    assert!(stderr.contains("paper not found"));
}

#[test]
fn test_stats_after_sync() {
    let (tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);
    sync_file(&config_path, &first_batch(tmp.path()), &[]);

    let (stdout, stderr, success) = run_axs(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Papers:      2"));
    assert!(stdout.contains("cs:cs:AI"));
    assert!(stdout.contains("completed"));
}

#[test]
fn test_embed_pending_requires_provider() {
    let (_tmp, config_path) = setup_test_env();
    run_axs(&config_path, &["init"]);

    let (_, stderr, success) = run_axs(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_completions_without_config() {
    let output = Command::new(axs_binary())
        .args(["--config", "/nonexistent/axs.toml", "completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("axs"));
}
