use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docsync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let source_dir = root.join("source");
    fs::create_dir_all(source_dir.join("guides")).unwrap();
    fs::write(
        source_dir.join("alpha.md"),
        "# Alpha\n\nThe alpha service deploys every Tuesday.",
    )
    .unwrap();
    fs::write(
        source_dir.join("guides/beta.txt"),
        "Beta notes about Kubernetes and Docker.",
    )
    .unwrap();

    let upload = root.join("upload");
    fs::create_dir_all(&upload).unwrap();
    fs::write(upload.join("gamma.txt"), "Gamma runbook, first draft.").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/db/docsync.sqlite"

[storage]
data_dir = "{root}/data"

[bootstrap]
source_dir = "{root}/source"

[sync]
call_timeout_secs = 30
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Pulls the id out of "added x (document_id <id>)".
fn document_id_from(stdout: &str) -> String {
    let start = stdout.find("document_id ").expect("no document_id in output") + 12;
    let end = stdout[start..].find(')').expect("unterminated document_id") + start;
    stdout[start..end].to_string()
}

#[test]
fn test_init_creates_database_and_data_dir() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_docsync(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("db/docsync.sqlite").exists());
    assert!(tmp.path().join("data").is_dir());

    let (_, stderr, success) = run_docsync(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_bootstrap_then_attach() {
    let (_tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);

    let (stdout, stderr, success) = run_docsync(&config, &["bootstrap"]);
    assert!(success, "bootstrap failed: {}", stderr);
    assert!(stdout.contains("Bootstrap complete"), "stdout: {}", stdout);
    assert!(stdout.contains("indexed:   2"), "stdout: {}", stdout);

    let (stdout, _, success) = run_docsync(&config, &["bootstrap"]);
    assert!(success);
    assert!(
        stdout.contains("Attached to existing index (2 documents)."),
        "stdout: {}",
        stdout
    );

    let (stdout, _, success) = run_docsync(&config, &["files"]);
    assert!(success);
    assert!(stdout.contains("alpha.md"));
    assert!(stdout.contains("beta.txt"));
}

#[test]
fn test_add_update_delete_cycle() {
    let (tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);
    let gamma = tmp.path().join("upload/gamma.txt");
    let gamma = gamma.to_str().unwrap();

    let (stdout, stderr, success) = run_docsync(&config, &["add", gamma]);
    assert!(success, "add failed: {}", stderr);
    assert!(stdout.contains("added gamma.txt"), "stdout: {}", stdout);
    let id = document_id_from(&stdout);
    assert!(tmp.path().join("data/gamma.txt").exists());

    let (_, stderr, success) = run_docsync(&config, &["add", gamma]);
    assert!(!success, "duplicate add should fail");
    assert!(stderr.contains("already exists"), "stderr: {}", stderr);

    fs::write(tmp.path().join("upload/gamma.txt"), "Gamma runbook, final.").unwrap();
    let (stdout, stderr, success) = run_docsync(&config, &["update", gamma]);
    assert!(success, "update failed: {}", stderr);
    assert_eq!(document_id_from(&stdout), id);
    assert_eq!(
        fs::read_to_string(tmp.path().join("data/gamma.txt")).unwrap(),
        "Gamma runbook, final."
    );

    let (stdout, _, success) = run_docsync(&config, &["files"]);
    assert!(success);
    assert!(stdout.contains(&id));

    let (stdout, stderr, success) = run_docsync(&config, &["delete", "gamma.txt"]);
    assert!(success, "delete failed: {}", stderr);
    assert!(stdout.contains("deleted gamma.txt"));
    assert!(!tmp.path().join("data/gamma.txt").exists());

    let (_, stderr, success) = run_docsync(&config, &["delete", "gamma.txt"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_add_with_explicit_name() {
    let (tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);
    let gamma = tmp.path().join("upload/gamma.txt");

    let (stdout, stderr, success) = run_docsync(
        &config,
        &["add", gamma.to_str().unwrap(), "--name", "runbook.md"],
    );
    assert!(success, "add failed: {}", stderr);
    assert!(stdout.contains("added runbook.md"));
    assert!(tmp.path().join("data/runbook.md").exists());

    let (_, stderr, success) = run_docsync(
        &config,
        &["add", gamma.to_str().unwrap(), "--name", "../escape.txt"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid filename"), "stderr: {}", stderr);
}

#[test]
fn test_update_unknown_file_fails() {
    let (tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);
    let gamma = tmp.path().join("upload/gamma.txt");

    let (_, stderr, success) = run_docsync(&config, &["update", gamma.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_reconcile_unknown_id_fails() {
    let (_tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);

    let (_, stderr, success) = run_docsync(&config, &["reconcile", "ghost.txt", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_calc_needs_no_config() {
    let missing = Path::new("/nonexistent/docsync.toml");
    let (stdout, stderr, success) = run_docsync(missing, &["calc", "2 * (3 + 4)"]);
    assert!(success, "calc failed: {}", stderr);
    assert_eq!(stdout.trim(), "14");

    let (stdout, _, success) = run_docsync(missing, &["calc", "7 / 2"]);
    assert!(success);
    assert_eq!(stdout.trim(), "3.5");

    let (_, stderr, success) = run_docsync(missing, &["calc", "1 / 0"]);
    assert!(!success);
    assert!(stderr.contains("division by zero"));
}

#[test]
fn test_ask_errors_when_completion_disabled() {
    let (_tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);

    let (_, stderr, success) = run_docsync(&config, &["ask", "When does alpha deploy?"]);
    assert!(!success, "ask should fail with completion disabled");
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_ask_rejects_unknown_task_type() {
    let (_tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);

    let (_, stderr, success) = run_docsync(&config, &["ask", "hi", "--task-type", "poetry"]);
    assert!(!success);
    assert!(stderr.contains("invalid task_type"), "stderr: {}", stderr);
}
