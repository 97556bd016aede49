//! CLI integration tests using assert_cmd.
//!
//! These tests verify that the CLI interface works correctly. None of them
//! reach the key-management service: they only touch plain files.

mod common;

use assert_cmd::cargo_bin_cmd;
use common::TestContext;
use predicates::prelude::*;
use std::fs;

const TEMPLATE: &str = r#"{
    "ECS": {
        "TaskDefinition": {
            "Family": "web",
            "ContainerDefinitions": [
                {"Name": "app", "Image": "web:$tag", "Memory": "$memory"}
            ]
        }
    }
}"#;

#[test]
fn test_cli_help_flag() {
    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("encrypt"))
        .stdout(predicate::str::contains("decrypt"))
        .stdout(predicate::str::contains("render"));
}

#[test]
fn test_cli_version_flag() {
    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.arg("--version").assert().success();
}

#[test]
fn test_cli_invalid_command() {
    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.arg("nonexistent-command").assert().failure();
}

#[test]
fn test_decrypt_plain_file_fails_without_modifying_it() {
    let ctx = TestContext::new().unwrap();
    let path = ctx.create_file("plain.json", r#"{"Foo": "Bar"}"#).unwrap();

    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.current_dir(&ctx.temp_path)
        .env_remove("KMS_KEY_ID")
        .args(["decrypt", "-f"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not encrypted"));

    assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"Foo": "Bar"}"#);
}

#[test]
fn test_encrypt_requires_key_id() {
    let ctx = TestContext::new().unwrap();
    let path = ctx.create_file("plain.json", r#"{"Foo": "Bar"}"#).unwrap();

    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.current_dir(&ctx.temp_path)
        .env_remove("KMS_KEY_ID")
        .arg("encrypt")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("key ID is required"));

    assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"Foo": "Bar"}"#);
}

#[test]
fn test_render_with_plain_fragments() {
    let ctx = TestContext::new().unwrap();
    let template = ctx.create_file("deploy.json", TEMPLATE).unwrap();
    ctx.create_file("vars/memory.json", r#"{"memory": 512}"#).unwrap();

    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.current_dir(&ctx.temp_path)
        .env_remove("DECKHAND_VARS_PATH")
        .env_remove("DOCKER_DEFAULT_DEPLOY_TAG")
        .args(["render", "-f"])
        .arg(&template)
        .arg("--vars-path")
        .arg(ctx.path("vars"))
        .args(["-t", "v2.0.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"web:v2.0.1\""))
        .stdout(predicate::str::contains("\"Memory\": 512"));
}

#[test]
fn test_render_accepts_positional_template() {
    let ctx = TestContext::new().unwrap();
    let template = ctx.create_file("deploy.json", TEMPLATE).unwrap();

    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.current_dir(&ctx.temp_path)
        .env_remove("DECKHAND_VARS_PATH")
        .env_remove("DOCKER_DEFAULT_DEPLOY_TAG")
        .arg("render")
        .arg(&template)
        .args(["-V", r#"{"memory": 128}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"web:latest\""))
        .stdout(predicate::str::contains("\"Memory\": 128"));
}

#[test]
fn test_render_without_template_fails() {
    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.arg("render")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No target file given"));
}

#[test]
fn test_render_with_outer_values_and_config_defaults() {
    let ctx = TestContext::new().unwrap();
    let template = ctx.create_file("deploy.json", TEMPLATE).unwrap();
    ctx.create_file("deckhand.yaml", "tag: from-config\n").unwrap();

    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.current_dir(&ctx.temp_path)
        .env_remove("DECKHAND_VARS_PATH")
        .env_remove("DOCKER_DEFAULT_DEPLOY_TAG")
        .args(["render", "-f"])
        .arg(&template)
        .args(["-V", r#"{"memory": 256}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"web:from-config\""))
        .stdout(predicate::str::contains("\"Memory\": 256"));
}

#[test]
fn test_render_unresolved_placeholder_fails() {
    let ctx = TestContext::new().unwrap();
    let template = ctx.create_file("deploy.json", TEMPLATE).unwrap();
    ctx.create_file("vars/other.json", r#"{"other": 1}"#).unwrap();

    let mut cmd = cargo_bin_cmd!("deckhand");
    cmd.current_dir(&ctx.temp_path)
        .env_remove("DECKHAND_VARS_PATH")
        .args(["render", "-f"])
        .arg(&template)
        .arg("--vars-path")
        .arg(ctx.path("vars"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unresolved placeholders"))
        .stderr(predicate::str::contains("memory"));
}
