use assert_cmd::Command;
use httpmock::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

fn command(temp: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("luma"));
    cmd.env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path().join(".config"))
        .env_remove("LUMA_API_KEY")
        .env_remove("LUMA_API_URL")
        .env_remove("RUST_LOG")
        .env_remove("APPDATA");
    cmd
}

fn api_url(server: &MockServer) -> String {
    server.url("/api/v2/")
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
}

fn stderr_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stderr.clone()).expect("utf8 stderr")
}

fn mock_credits(server: &MockServer, key: &str) {
    let header = format!("luma-api-key={key}");
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/v2/capture/credits")
            .header("authorization", header.as_str());
        then.status(200)
            .json_body(json!({ "remaining": 4, "used": 6, "total": 10 }));
    });
}

#[test]
fn submit_missing_path_fails_without_network() {
    let temp = TempDir::new().expect("temp dir");
    let assert = command(&temp)
        .args(["submit", "--api-key", "k", "--base-url", "http://127.0.0.1:9/api/v2/"])
        .arg(temp.path().join("missing.mp4"))
        .arg("Test Scene")
        .assert()
        .failure()
        .code(1);
    assert!(stderr_of(&assert).contains("does not exist"));
}

#[test]
fn missing_key_with_empty_stdin_is_an_auth_error() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    let assert = command(&temp)
        .args(["credits", "--base-url", &api_url(&server)])
        .write_stdin("")
        .assert()
        .failure();
    let stderr = stderr_of(&assert);
    assert!(stderr.contains("error:"));
    assert!(stderr.contains("no API key configured"));
}

#[test]
fn auth_saves_key_used_by_later_commands() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    mock_credits(&server, "cli-key");

    let assert = command(&temp)
        .args(["auth", "cli-key", "--base-url", &api_url(&server)])
        .assert()
        .success();
    assert!(stdout_of(&assert).contains("Authenticated"));

    let saved = temp.path().join(".config").join("luma").join("auth.json");
    let contents: Value =
        serde_json::from_str(&std::fs::read_to_string(&saved).expect("auth file")).expect("json");
    assert_eq!(contents["Authorization"], "luma-api-key=cli-key");

    let assert = command(&temp)
        .args(["credits", "--output", "json", "--base-url", &api_url(&server)])
        .assert()
        .success();
    let credits: Value = serde_json::from_str(&stdout_of(&assert)).expect("credits json");
    assert_eq!(credits["remaining"], 4);
    assert_eq!(credits["total"], 10);

    let assert = command(&temp).args(["clear-auth"]).assert().success();
    assert!(stdout_of(&assert).contains("Removed saved API key"));
    assert!(!saved.exists());
}

#[test]
fn piped_key_is_verified_and_saved() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    mock_credits(&server, "piped-key");

    let assert = command(&temp)
        .args(["credits", "--base-url", &api_url(&server)])
        .write_stdin("piped-key\n")
        .assert()
        .success();
    assert!(stdout_of(&assert).contains("Remaining: 4"));
    assert!(temp.path().join(".config").join("luma").join("auth.json").exists());
}

#[test]
fn status_of_unknown_slug_exits_non_zero() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/capture/nope");
        then.status(404).body("Not Found");
    });

    let assert = command(&temp)
        .args(["status", "nope", "--api-key", "k", "--base-url", &api_url(&server)])
        .assert()
        .failure()
        .code(1);
    assert!(stderr_of(&assert).contains("capture not found: nope"));
}

#[test]
fn get_lists_matching_captures() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/v2/capture")
            .query_param("search", "garden");
        then.status(200).json_body(json!({
            "captures": [
                { "slug": "g-1", "title": "Garden", "status": "complete",
                  "latestRun": { "status": "finished", "progress": 100 } }
            ]
        }));
    });

    let assert = command(&temp)
        .args(["get", "garden", "--api-key", "k", "--base-url", &api_url(&server)])
        .assert()
        .success();
    let stdout = stdout_of(&assert);
    assert!(stdout.contains("g-1"));
    assert!(stdout.contains("finished 100%"));
}

#[test]
fn get_without_matches_prints_notice() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/capture");
        then.status(200).json_body(json!({ "captures": [] }));
    });

    let assert = command(&temp)
        .args(["get", "zzz", "--api-key", "k", "--base-url", &api_url(&server)])
        .assert()
        .success();
    assert!(stdout_of(&assert).contains("No captures found."));
}

#[test]
fn clear_auth_also_forgets_legacy_key() {
    let temp = TempDir::new().expect("temp dir");
    let server = MockServer::start();
    let legacy_dir = temp.path().join(".lumaapi");
    std::fs::create_dir_all(&legacy_dir).expect("mkdir");
    std::fs::write(
        legacy_dir.join("auth.json"),
        r#"{"Authorization": "luma-api-key=legacy-key"}"#,
    )
    .expect("write legacy");

    let assert = command(&temp).args(["clear-auth"]).assert().success();
    assert!(stdout_of(&assert).contains("Removed saved API key"));

    let assert = command(&temp)
        .args(["credits", "--base-url", &api_url(&server)])
        .write_stdin("")
        .assert()
        .failure();
    assert!(stderr_of(&assert).contains("no API key configured"));
}
