use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tap_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_gsc-tap"))
}

fn setup_test_env(with_state: bool) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let mut config_content = String::from(
        r#"[auth]
client_id = "client"
client_secret = "secret"
refresh_token = "refresh"

[sync]
site_urls = "https://example.com/, sc-domain:example.com"
start_date = "2024-01-01T00:00:00Z"
"#,
    );
    if with_state {
        config_content.push_str(&format!(
            "\n[state]\ndb_path = \"{}/data/gsc.sqlite\"\n",
            root.display()
        ));
    }

    let config_path = config_dir.join("gsc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tap(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tap_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run gsc-tap binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(true);

    let (stdout, stderr, success) = run_tap(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("gsc.sqlite").exists());

    let (_, _, again) = run_tap(&config_path, &["init"]);
    assert!(again, "second init failed (not idempotent)");
}

#[test]
fn test_init_requires_state_section() {
    let (_tmp, config_path) = setup_test_env(false);

    let (_, stderr, success) = run_tap(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("[state]"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_tap(&missing, &["check"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("gsc.toml");
    fs::write(
        &config_path,
        "[sync]\nsite_urls = \"https://example.com\"\nstart_date = \"2024-01-01\"\ndate_window_size = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_tap(&config_path, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("date_window_size"), "stderr={}", stderr);
}
