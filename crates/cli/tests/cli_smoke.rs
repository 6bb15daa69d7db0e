//! CLI smoke tests for shiplane.
//!
//! These tests run each command against a clean environment and check exit
//! codes and the key parts of their output.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const OVERRIDES: [&str; 4] = ["EKS_CLUSTER_NAME", "DEPLOY_ENVIRONMENT", "DEPLOY_NAMESPACE", "APPLICATION_NAME"];

/// Get a Command for the shiplane binary with no configuration overrides set.
fn shiplane_cmd() -> Command {
  let mut cmd = cargo_bin_cmd!("shiplane");
  for var in OVERRIDES {
    cmd.env_remove(var);
  }
  cmd.env_remove("RUST_LOG");
  cmd
}

fn synth_into(temp: &TempDir) {
  shiplane_cmd()
    .arg("synth")
    .arg("--out")
    .arg(temp.path())
    .assert()
    .success();
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  shiplane_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  shiplane_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("shiplane"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["synth", "diff", "config", "script"] {
    shiplane_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// synth
// =============================================================================

#[test]
fn synth_writes_assembly_directory() {
  let temp = TempDir::new().unwrap();

  shiplane_cmd()
    .arg("synth")
    .arg("--out")
    .arg(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Synthesized AppInfrastructureStack"))
    .stdout(predicate::str::contains("manifest.json"));

  assert!(temp.path().join("manifest.json").exists());
  assert!(temp.path().join("DeployProject.buildspec.yml").exists());
}

#[test]
fn synth_json_reports_counts() {
  let temp = TempDir::new().unwrap();

  let output = shiplane_cmd()
    .args(["synth", "--json", "--out"])
    .arg(temp.path())
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["submission"]["resources"], 6);
  assert_eq!(json["counts"]["project"], 2);
  assert_eq!(json["diff"]["to_create"].as_array().unwrap().len(), 6);
}

#[test]
fn synth_into_unwritable_path_fails() {
  let temp = TempDir::new().unwrap();
  let blocker = temp.path().join("file");
  std::fs::write(&blocker, "not a directory").unwrap();

  shiplane_cmd()
    .arg("synth")
    .arg("--out")
    .arg(blocker.join("out"))
    .assert()
    .failure();
}

// =============================================================================
// diff
// =============================================================================

#[test]
fn diff_against_own_output_is_empty() {
  let temp = TempDir::new().unwrap();
  synth_into(&temp);

  shiplane_cmd()
    .arg("diff")
    .arg(temp.path().join("manifest.json"))
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes."));
}

#[test]
fn diff_reports_updated_project() {
  let temp = TempDir::new().unwrap();
  synth_into(&temp);

  shiplane_cmd()
    .env("APPLICATION_NAME", "sample")
    .arg("diff")
    .arg(temp.path().join("manifest.json"))
    .assert()
    .success()
    .stdout(predicate::str::contains("DeployProject"))
    .stdout(predicate::str::contains("0 to create, 1 to update, 0 to delete, 5 unchanged"));
}

#[test]
fn diff_missing_manifest_fails() {
  let temp = TempDir::new().unwrap();

  shiplane_cmd()
    .arg("diff")
    .arg(temp.path().join("missing.json"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load manifest"));
}

// =============================================================================
// config
// =============================================================================

#[test]
fn config_shows_defaults_and_overrides() {
  shiplane_cmd()
    .env("DEPLOY_NAMESPACE", "staging")
    .arg("config")
    .assert()
    .success()
    .stdout(predicate::str::contains("eks-blueprint"))
    .stdout(predicate::str::contains("(from DEPLOY_NAMESPACE)"))
    .stdout(predicate::str::contains("CodeBuild-BuildDeployEKS-Role (fixed)"));
}

#[test]
fn config_json_is_valid() {
  let output = shiplane_cmd()
    .env("APPLICATION_NAME", "")
    .args(["config", "--json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["application_name"]["value"], "application");
  assert_eq!(json["application_name"]["provenance"], "default");
}

// =============================================================================
// script
// =============================================================================

#[test]
fn script_lists_phases_in_order() {
  let output = shiplane_cmd().arg("script").output().unwrap();
  assert!(output.status.success());

  let stdout = String::from_utf8(output.stdout).unwrap();
  let install = stdout.find("install:").unwrap();
  let pre = stdout.find("pre_build:").unwrap();
  let post = stdout.find("post_build:").unwrap();
  assert!(install < pre && pre < post);
  assert!(stdout.contains("$APP_NAME-$DEPLOY_ENV"));
}

#[test]
fn script_render_substitutes_environment() {
  shiplane_cmd()
    .env("APPLICATION_NAME", "sample")
    .env("EKS_CLUSTER_NAME", "foo")
    .args(["script", "--render", "--build-version", "a1b2c3", "--repository-uri", "example/app"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--name foo"))
    .stdout(predicate::str::contains("-i sample-dev helm/sample -n dev"))
    .stdout(predicate::str::contains("image.repository=example/app --set image.tag=a1b2c3"))
    .stdout(predicate::str::contains("helm repo add stable"))
    .stdout(predicate::str::contains("kubectl get svc sample-dev -n dev"));
}

#[test]
fn script_render_checks_outcome_before_grace_sleep() {
  let output = shiplane_cmd()
    .env("APPLICATION_NAME", "sample")
    .args(["script", "--render", "--build-version", "a1b2c3"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let stdout = String::from_utf8_lossy(&output.stdout);
  let check = stdout.find("CODEBUILD_BUILD_SUCCEEDING").unwrap();
  let sleep = stdout.find("sleep 60").unwrap();
  let endpoint = stdout.find("http://$APP_ENDPOINT/").unwrap();
  assert!(check < sleep && sleep < endpoint);
}

#[test]
fn script_render_without_version_warns() {
  shiplane_cmd()
    .args(["script", "--render"])
    .assert()
    .success()
    .stderr(predicate::str::contains("BUILD_VERSION not given"))
    .stdout(predicate::str::contains("image.repository=$${AppRepository.repository_uri}"));
}

#[test]
fn script_yaml_has_version() {
  shiplane_cmd()
    .args(["script", "--yaml"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("version:"));
}
