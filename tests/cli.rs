use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn recall_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_recall"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let notes_dir = root.join("notes");
    fs::create_dir_all(notes_dir.join("dev")).unwrap();
    fs::write(
        notes_dir.join("dev/alpha.md"),
        "# Alpha Note\n\nThis is the alpha note about Rust programming.\n\nIt mentions cargo and crates.",
    )
    .unwrap();
    fs::write(
        notes_dir.join("beta.md"),
        "# Beta Note\n\nThis note discusses Python and machine learning.\n\nPyTorch is covered.",
    )
    .unwrap();
    fs::write(
        notes_dir.join("gamma.txt"),
        "Gamma plain text.\n\nNotes about deployment and infrastructure.\n\nKubernetes and Docker.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/recall.sqlite"

[embedding]
provider = "hashing"
dims = 64

[logging]
level = "warn"

[server]
bind = "127.0.0.1:7399"

[connectors.notes]
root = "{root}/notes"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_recall(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = recall_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run recall binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn init_and_sync(config_path: &Path) -> String {
    let (_, stderr, success) = run_recall(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_recall(config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success1) = run_recall(&config_path, &["init"]);
    assert!(success1, "First init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_recall(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_then_resync_is_unchanged() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = init_and_sync(&config_path);
    assert!(stdout.contains("scanned: 3 notes"), "got: {}", stdout);
    assert!(stdout.contains("new: 3"));
    assert!(stdout.contains("status: completed"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_recall(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("new: 0"));
    assert!(stdout.contains("unchanged: 3"));
    assert!(stdout.contains("embedded: 0"));
}

#[test]
fn test_sync_detects_edits_and_deletions() {
    let (tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let notes_dir = tmp.path().join("notes");
    fs::write(
        notes_dir.join("dev/alpha.md"),
        "# Alpha Note\n\nRewritten entirely.",
    )
    .unwrap();
    fs::remove_file(notes_dir.join("gamma.txt")).unwrap();

    let (stdout, stderr, success) = run_recall(&config_path, &["sync"]);
    assert!(success, "sync failed: {}", stderr);
    assert!(stdout.contains("updated: 1"), "got: {}", stdout);
    assert!(stdout.contains("deleted: 1"), "got: {}", stdout);

    let (stdout, _, _) = run_recall(&config_path, &["search", "kubernetes", "--mode", "keyword"]);
    assert!(stdout.contains("No results"), "trashed note still searchable: {}", stdout);

    let (stdout, _, success) = run_recall(&config_path, &["runs"]);
    assert!(success);
    assert_eq!(stdout.lines().count(), 2);
    assert!(stdout.contains("completed"));
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    run_recall(&config_path, &["init"]);
    let (stdout, _, success) = run_recall(&config_path, &["sync", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("notes found: 3"));
    assert!(stdout.contains("new: 3"));

    let (stdout, _, _) = run_recall(&config_path, &["sync"]);
    assert!(stdout.contains("new: 3"));
}

#[test]
fn test_search_hybrid() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let (stdout, stderr, success) = run_recall(&config_path, &["search", "Rust programming"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.contains("Alpha Note"), "got: {}", stdout);
    assert!(!stderr.contains("degraded"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let (stdout1, _, _) = run_recall(&config_path, &["search", "note"]);
    let (stdout2, _, _) = run_recall(&config_path, &["search", "note"]);
    assert_eq!(stdout1, stdout2, "Search results should be deterministic");
}

#[test]
fn test_search_filters() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let (stdout, _, success) = run_recall(&config_path, &["search", "note", "--tag", "dev"]);
    assert!(success);
    assert!(stdout.contains("Alpha Note"));
    assert!(!stdout.contains("Beta Note"));

    let (stdout, _, success) =
        run_recall(&config_path, &["search", "note", "--since", "2999-01-01"]);
    assert!(success);
    assert!(stdout.contains("No results"));

    let (_, stderr, success) = run_recall(&config_path, &["search", "note", "--since", "soon"]);
    assert!(!success);
    assert!(stderr.contains("YYYY-MM-DD"));
}

#[test]
fn test_search_rejects_empty_query() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let (_, stderr, success) = run_recall(&config_path, &["search", "  "]);
    assert!(!success, "Empty query should be rejected");
    assert!(stderr.contains("must not be empty"));
}

#[test]
fn test_search_unknown_mode() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let (_, stderr, success) = run_recall(&config_path, &["search", "rust", "--mode", "fuzzy"]);
    assert!(!success);
    assert!(stderr.contains("unknown search mode"));
}

#[test]
fn test_search_before_init_reports_schema() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_recall(&config_path, &["search", "rust", "--mode", "keyword"]);
    assert!(!success);
    assert!(stderr.contains("recall init"), "got: {}", stderr);
}

#[test]
fn test_context_output() {
    let (_tmp, config_path) = setup_test_env();
    init_and_sync(&config_path);

    let (stdout, stderr, success) = run_recall(&config_path, &["context", "machine learning"]);
    assert!(success, "context failed: {}", stderr);
    assert!(stdout.starts_with("[1] "));
    assert!(stdout.contains("--- Sources ---"));

    let (stdout, _, success) = run_recall(
        &config_path,
        &["context", "machine learning", "--json", "--max-tokens", "40"],
    );
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["metadata"]["has_results"], true);
    assert!(value["metadata"]["estimated_tokens"].as_u64().unwrap() > 0);
    assert_eq!(
        value["sources"].as_array().unwrap().len() as u64,
        value["metadata"]["chunks_used"].as_u64().unwrap()
    );
}

#[test]
fn test_doc_shows_chunks() {
    let (tmp, config_path) = setup_test_env();

    let words: Vec<String> = (0..900).map(|i| format!("orchard{}", i % 40)).collect();
    fs::write(
        tmp.path().join("notes/orchard.md"),
        format!("# Orchard journal\n\n{}", words.join(" ")),
    )
    .unwrap();
    init_and_sync(&config_path);

    let (stdout, _, _) = run_recall(&config_path, &["search", "orchard7", "--mode", "keyword"]);
    let doc_id = stdout
        .lines()
        .find(|l| l.trim().starts_with("document:"))
        .and_then(|l| l.split("document:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("chunked result with a document id");

    let (stdout, _, success) = run_recall(&config_path, &["doc", &doc_id]);
    assert!(success);
    assert!(stdout.contains("Orchard journal"));
    assert!(stdout.contains("[chunk 0]"));
    assert!(stdout.contains("[chunk 1]"));

    let (_, stderr, success) = run_recall(&config_path, &["doc", "nonexistent-id"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}
