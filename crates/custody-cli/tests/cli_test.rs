//! End-to-end runs of the `custody` binary against an isolated home directory.
//!
//! No gateway credentials and no ledger are configured, so every store lands
//! in the local fallback cache without touching the network.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn custody(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_custody"))
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env("CUSTODY_CACHE_ROOT", home.join("cache"))
        .env("CUSTODY_METADATA_ROOT", home.join("records"))
        .env_remove("CUSTODY_GATEWAY_API_KEY")
        .env_remove("CUSTODY_GATEWAY_SECRET_KEY")
        .env_remove("CUSTODY_LEDGER_RPC_URL")
        .env_remove("CUSTODY_LEDGER_FROM")
        .env_remove("CUSTODY_LEDGER_CONTRACT")
        .env_remove("CUSTODY_LOG")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute custody")
}

fn store(home: &Path, contents: &[u8]) -> serde_json::Value {
    let file = home.join("input.txt");
    std::fs::write(&file, contents).unwrap();
    let output = custody(home, &["store", file.to_str().unwrap(), "--owner", "alice"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_config_prints_parseable_defaults() {
    let home = TempDir::new().unwrap();
    let output = custody(home.path(), &["config"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: custody_config::Config = toml::from_str(&stdout).unwrap();
    assert_eq!(parsed.engine, custody_config::EngineConfig::default());
    assert!(stdout.contains("[storage]"));
    assert!(stdout.contains("[engine]"));
}

#[test]
fn test_store_then_retrieve_offline() {
    let home = TempDir::new().unwrap();
    let record = store(home.path(), b"cli round trip");

    assert_eq!(record["storageMode"], "local_fallback");
    assert_eq!(record["schemeVersion"], "current");
    assert_eq!(record["contentHash"].as_str().unwrap().len(), 64);

    let id = record["id"].as_str().unwrap();
    let out_file = home.path().join("out.txt");
    let output = custody(home.path(), &["retrieve", id, "-o", out_file.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read(&out_file).unwrap(), b"cli round trip");

    let output = custody(home.path(), &["show", id]);
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["verified"], true);
}

#[test]
fn test_store_reports_degradation_warnings() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("input.txt");
    std::fs::write(&file, b"warn me").unwrap();

    let output = custody(home.path(), &["store", file.to_str().unwrap(), "--owner", "alice"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("local fallback"));
    assert!(stderr.contains("no ledger anchor"));
}

#[test]
fn test_verify_matches_and_mismatches() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("doc.txt");
    std::fs::write(&file, b"abc").unwrap();
    let hash = custody_cipher::hash_hex(b"abc");

    let ok = custody(home.path(), &["verify", file.to_str().unwrap(), "--hash", &hash]);
    assert!(ok.status.success());

    let bad = custody(home.path(), &["verify", file.to_str().unwrap(), "--hash", &"0".repeat(64)]);
    assert!(!bad.status.success());
    assert!(String::from_utf8_lossy(&bad.stderr).contains("hash mismatch"));
}

#[test]
fn test_delete_then_retrieve_fails() {
    let home = TempDir::new().unwrap();
    let record = store(home.path(), b"short lived");
    let id = record["id"].as_str().unwrap();

    assert!(custody(home.path(), &["delete", id]).status.success());
    assert!(!custody(home.path(), &["retrieve", id]).status.success());
    assert!(!custody(home.path(), &["show", id]).status.success());
}

#[test]
fn test_store_rejects_empty_owner() {
    let home = TempDir::new().unwrap();
    let file = home.path().join("input.txt");
    std::fs::write(&file, b"x").unwrap();

    let output = custody(home.path(), &["store", file.to_str().unwrap(), "--owner", ""]);
    assert!(!output.status.success());
}

#[test]
fn test_list_shows_only_the_owners_records() {
    let home = TempDir::new().unwrap();
    let first = store(home.path(), b"first for alice");
    let second = store(home.path(), b"second for alice");

    let other_file = home.path().join("other.txt");
    std::fs::write(&other_file, b"for bob").unwrap();
    let output = custody(home.path(), &["store", other_file.to_str().unwrap(), "--owner", "bob"]);
    assert!(output.status.success());

    let output = custody(home.path(), &["list", "--owner", "alice", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let listed: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = listed.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first["id"].as_str().unwrap()));
    assert!(ids.contains(&second["id"].as_str().unwrap()));

    let output = custody(home.path(), &["list", "--owner", "alice"]);
    let text = String::from_utf8_lossy(&output.stdout);
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains(first["contentHash"].as_str().unwrap()));
}
