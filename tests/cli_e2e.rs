//! End-to-end CLI tests for the ipums-extract binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Points both remote endpoints at a closed local port so a test that
/// unexpectedly reaches the network fails fast instead of hitting IPUMS.
fn offline_cmd() -> Command {
    let mut cmd = Command::cargo_bin("ipums-extract").unwrap();
    cmd.args([
        "--catalog-url",
        "http://127.0.0.1:9/sample_ids",
        "--api-url",
        "http://127.0.0.1:9",
    ]);
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("ipums-extract").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("IPUMS CPS"))
        .stdout(predicate::str::contains("--years"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("ipums-extract").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ipums-extract"));
}

/// Test that missing required arguments cause non-zero exit.
#[test]
fn test_binary_missing_years_returns_error() {
    let mut cmd = Command::cargo_bin("ipums-extract").unwrap();
    cmd.args(["--name", "t1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--years"));
}

#[test]
fn test_binary_invalid_year_range_returns_error() {
    let mut cmd = Command::cargo_bin("ipums-extract").unwrap();
    cmd.args(["--years", "2024-2020", "--name", "t1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_missing_api_key_fails_with_auth_error() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    offline_cmd()
        .env_remove("IPUMS_API_KEY")
        .args(["--years", "2023", "--name", "t1", "--output-dir"])
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("[AUTH]"))
        .stderr(predicate::str::contains("IPUMS_API_KEY"));
}

#[test]
fn test_binary_existing_target_fails_without_overwrite() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let existing = temp_dir.path().join("t1.dat.gz");
    std::fs::write(&existing, b"keep me").unwrap();

    offline_cmd()
        .env("IPUMS_API_KEY", "dummy")
        .args(["--years", "2023", "--name", "t1", "--output-dir"])
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to overwrite"));

    assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_full_run_prints_final_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sample_ids"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<td>cps2023_01s</td><td>cps2023_02b</td>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/extracts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"number": 5, "status": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/extracts/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 5,
            "status": "completed",
            "downloadLinks": {
                "data": {"url": format!("{}/files/cps_00005.dat.gz", server.uri())},
                "ddiCodebook": {"url": format!("{}/files/cps_00005.xml", server.uri())},
            },
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/cps_00005.dat.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/cps_00005.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<codeBook/>".to_vec()))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let dest = temp_dir.path().to_path_buf();
    let uri = server.uri();

    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("ipums-extract")
            .unwrap()
            .env("IPUMS_API_KEY", "dummy")
            .args(["--years", "2023", "--name", "neet", "-q", "--catalog-url"])
            .arg(format!("{uri}/sample_ids"))
            .arg("--api-url")
            .arg(&uri)
            .arg("--output-dir")
            .arg(&dest)
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("neet.dat.gz"))
        .stdout(predicate::str::contains("neet.xml"));
    assert_eq!(
        std::fs::read(temp_dir.path().join("neet.dat.gz")).unwrap(),
        b"data"
    );
    assert!(temp_dir.path().join("neet.xml").exists());
    assert!(!temp_dir.path().join("cps_00005.dat.gz").exists());
}
