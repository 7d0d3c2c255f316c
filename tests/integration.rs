use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use asset_loader::models::RowKey;
use asset_loader::store::{SqliteStore, Store};
use serde_json::json;
use tempfile::TempDir;

fn loader_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("asset-loader");
    path
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

impl TestEnv {
    fn input_dir(&self) -> PathBuf {
        self.root.join("export")
    }

    fn db_url(&self) -> String {
        format!("sqlite:{}", self.root.join("data/assets.sqlite").display())
    }
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Input files: one public unit, one private unit with a single object,
    // one corrupt unit.
    let export = root.join("export");
    fs::create_dir_all(&export).unwrap();
    fs::write(
        export.join("42.json"),
        r#"[
            {"id": "mesh-1", "type": "Mesh", "insertedAtRevision": 3, "name": "teapot"},
            {"id": "attr-1", "type": "ColorAttribute", "deletedAtRevision": 9}
        ]"#,
    )
    .unwrap();
    fs::write(
        export.join("assets.json"),
        r#"{"id": "fmt-1", "format": "obj", "insertedAtRevision": 1}"#,
    )
    .unwrap();
    fs::write(export.join("broken.json"), "[{\"id\": ").unwrap();
    fs::write(export.join("notes.txt"), "not an input").unwrap();

    let config_content = format!(
        r#"[db]
url = "sqlite:{}/data/assets.sqlite"
table = "assets"

[ingest]
concurrency = 4
"#,
        root.display()
    );

    let config_path = config_dir.join("loader.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        root,
        config_path,
    }
}

fn run_loader(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = loader_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run loader binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn load(env: &TestEnv, extra: &[&str]) -> (String, String, bool) {
    let input = env.input_dir();
    let mut args = vec!["load", input.to_str().unwrap()];
    args.extend_from_slice(extra);
    run_loader(&env.config_path, &args)
}

async fn open_store(env: &TestEnv) -> SqliteStore {
    SqliteStore::connect(&env.db_url(), "assets", 1).await.unwrap()
}

#[test]
fn test_init_creates_table() {
    let env = setup_test_env();

    let (stdout, stderr, success) = run_loader(&env.config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Table 'assets' ready"));
    assert!(env.root.join("data/assets.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let env = setup_test_env();

    let (_, _, success1) = run_loader(&env.config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_loader(&env.config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_load_reports_counts() {
    let env = setup_test_env();

    run_loader(&env.config_path, &["init"]);
    let (stdout, stderr, success) = load(&env, &[]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("units: 3 (1 unreadable)"), "{}", stdout);
    assert!(stdout.contains("records attempted: 3"));
    assert!(stdout.contains("records succeeded: 3"));
    assert!(stdout.contains("records failed: 0"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[tokio::test]
async fn test_load_idempotent_no_duplicates() {
    let env = setup_test_env();

    run_loader(&env.config_path, &["init"]);
    let (_, _, success1) = load(&env, &[]);
    assert!(success1);
    let (stdout, _, success2) = load(&env, &[]);
    assert!(success2);
    assert!(stdout.contains("records succeeded: 3"));

    let store = open_store(&env).await;
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_load_stores_visibility_and_classification() {
    let env = setup_test_env();

    run_loader(&env.config_path, &["init"]);
    let (_, stderr, success) = load(&env, &[]);
    assert!(success, "load failed: {}", stderr);

    let store = open_store(&env).await;

    let mesh = store.fetch(&RowKey::new("mesh-1", 3)).await.unwrap().unwrap();
    assert_eq!(mesh.category, "Mesh");
    assert!(mesh.visibility);
    assert_eq!(
        mesh.payload,
        json!({"id": "mesh-1", "type": "Mesh", "insertedAtRevision": 3, "name": "teapot"})
    );

    let attr = store.fetch(&RowKey::new("attr-1", 0)).await.unwrap().unwrap();
    assert_eq!(attr.category, "Attribute");
    assert_eq!(attr.retracted_revision, Some(9));
    assert!(attr.visibility);

    let fmt = store.fetch(&RowKey::new("fmt-1", 1)).await.unwrap().unwrap();
    assert_eq!(fmt.category, "FormatType");
    assert!(!fmt.visibility);
}

#[test]
fn test_load_isolates_record_failures() {
    let env = setup_test_env();
    fs::write(
        env.input_dir().join("7.json"),
        r#"[
            {"id": "ok-1", "type": "Mesh"},
            {"type": "Mesh"},
            {"id": "odd-1", "name": "no type or format"}
        ]"#,
    )
    .unwrap();

    run_loader(&env.config_path, &["init"]);
    let (stdout, stderr, success) = load(&env, &[]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records attempted: 6"), "{}", stdout);
    assert!(stdout.contains("records succeeded: 4"));
    assert!(stdout.contains("records failed: 2"));
    assert!(stdout.contains("missing_key: 1"));
    assert!(stdout.contains("classification: 1"));
}

#[test]
fn test_load_missing_directory_fails() {
    let env = setup_test_env();
    let missing = env.root.join("nowhere");

    let (_, stderr, success) =
        run_loader(&env.config_path, &["load", missing.to_str().unwrap()]);
    assert!(!success, "load of a missing directory should fail");
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn test_load_dry_run_writes_nothing() {
    let env = setup_test_env();

    let (stdout, stderr, success) = load(&env, &["--dry-run"]);
    assert!(success, "dry-run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("units found: 3"));
    assert!(stdout.contains("unreadable units: 1"));
    assert!(stdout.contains("records: 3"));
    assert!(!env.root.join("data/assets.sqlite").exists());
}

#[test]
fn test_load_dry_run_ignores_concurrency() {
    let env = setup_test_env();

    let (plain, _, success1) = load(&env, &["--dry-run"]);
    let (tuned, stderr, success2) = load(&env, &["--dry-run", "--concurrency", "2"]);
    assert!(success1);
    assert!(success2, "dry-run with --concurrency failed: {}", stderr);
    assert_eq!(plain, tuned);
}

#[test]
fn test_load_json_progress() {
    let env = setup_test_env();

    run_loader(&env.config_path, &["init"]);
    let (_, stderr, success) = load(&env, &["--progress", "json"]);
    assert!(success);

    let events: Vec<serde_json::Value> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .filter(|v: &serde_json::Value| v.get("event").is_some())
        .collect();
    let count = |tag: &str| events.iter().filter(|e| e["event"] == tag).count();
    assert_eq!(count("unit_started"), 2);
    assert_eq!(count("unit_completed"), 2);
    assert_eq!(count("record_processed"), 3);
    assert_eq!(count("failure"), 1);
}

#[test]
fn test_load_rejects_zero_concurrency() {
    let env = setup_test_env();

    let (_, _, success) = load(&env, &["--concurrency", "0"]);
    assert!(!success);
}

#[test]
fn test_invalid_config_fails() {
    let env = setup_test_env();
    fs::write(&env.config_path, "[db]\nurl = \"mysql://localhost/x\"\n").unwrap();

    let (_, stderr, success) = run_loader(&env.config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("db.url"), "{}", stderr);
}
