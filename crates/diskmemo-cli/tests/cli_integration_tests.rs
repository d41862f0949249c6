//! Run the `diskmemo` binary against a temporary cache root

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn diskmemo(root: &Path, args: &[&str]) -> Output {
    let bin = env!("CARGO_BIN_EXE_diskmemo");
    Command::new(bin)
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run diskmemo")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn make_instance(root: &Path, id: &str, committed: bool) {
    let dir = root.join(id);
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("single-cache.bin"), [0_u8; 64]).unwrap();
    if committed {
        std::fs::write(dir.join("config.yaml"), "n: 1\n").unwrap();
    }
}

#[test]
fn test_stats_on_empty_root() {
    let tmp = TempDir::new().unwrap();
    let output = diskmemo(tmp.path(), &["--format", "json", "stats"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value["instance_count"], 0);
    assert_eq!(value["total_size_bytes"], 0);
}

#[test]
fn test_list_sweep_and_clear() {
    let tmp = TempDir::new().unwrap();
    make_instance(tmp.path(), "a__cache", true);
    make_instance(tmp.path(), "b__cache", false);

    let output = diskmemo(tmp.path(), &["list"]);
    assert!(output.status.success());
    let listing = stdout(&output);
    assert!(listing.contains("a__cache"));
    assert!(listing.contains("pending"));

    let output = diskmemo(tmp.path(), &["sweep", "--older-than-secs", "0"]);
    assert_eq!(stdout(&output), "Removed 1 uncommitted instances");
    assert!(!tmp.path().join("b__cache").exists());

    let output = diskmemo(tmp.path(), &["clear"]);
    assert_eq!(stdout(&output), "Removed 1 cache instances");
    assert!(!tmp.path().join("a__cache").exists());
}

#[test]
fn test_evict_without_limits_fails() {
    let tmp = TempDir::new().unwrap();
    let output = diskmemo(tmp.path(), &["evict"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No eviction limits configured"));
}

#[test]
fn test_missing_root_parent_is_reported() {
    let tmp = TempDir::new().unwrap();
    let output = diskmemo(&tmp.path().join("no").join("such"), &["stats"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Parent"));
}
