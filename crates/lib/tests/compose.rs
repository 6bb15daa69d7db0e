//! End-to-end composition tests: environment in, manifest and scripts out.

use std::collections::BTreeMap;

use serial_test::serial;
use shiplane_lib::buildspec::PhaseName;
use shiplane_lib::config::Config;
use shiplane_lib::consts::{BUILD_SERVICE_PRINCIPAL, PULL_ACTIONS, STACK_NAME};
use shiplane_lib::engine::{AssemblyDir, ProvisioningEngine};
use shiplane_lib::manifest::{DescriptorKind, compute_diff};
use shiplane_lib::pipeline::StageKind;
use shiplane_lib::placeholder::{AttrRef, Attribute, KnownValues};
use shiplane_lib::policy::Principal;
use shiplane_lib::stack::{
  BUILD_PROJECT_NAME, DEPLOY_PROJECT_NAME, Descriptor, REGISTRY_NAME, Stack, compose,
};
use tempfile::TempDir;

fn compose_with(vars: [(&str, Option<&str>); 4]) -> Stack {
  temp_env::with_vars(vars, || compose(&Config::from_env()).unwrap())
}

fn sample_stack() -> Stack {
  compose_with([
    ("APPLICATION_NAME", Some("sample")),
    ("DEPLOY_ENVIRONMENT", Some("dev")),
    ("DEPLOY_NAMESPACE", Some("dev")),
    ("EKS_CLUSTER_NAME", None),
  ])
}

#[test]
#[serial]
fn sample_application_composes_full_stack() {
  let stack = sample_stack();
  assert_eq!(stack.name(), STACK_NAME);

  let manifest = stack.synthesize().unwrap();
  let counts = manifest.counts();
  assert_eq!(counts[&DescriptorKind::Registry], 1);
  assert_eq!(counts[&DescriptorKind::Role], 1);
  assert_eq!(counts[&DescriptorKind::RoleReference], 1);
  assert_eq!(counts[&DescriptorKind::Project], 2);
  assert_eq!(counts[&DescriptorKind::Pipeline], 1);

  let pipeline = stack.pipeline().unwrap();
  assert_eq!(pipeline.pipeline_name, "Build-Deploy-coding-challenge");
  assert_eq!(pipeline.stage_kinds(), vec![StageKind::Source, StageKind::Build, StageKind::Deploy]);

  let deploy = stack.project(DEPLOY_PROJECT_NAME).unwrap();
  assert_eq!(deploy.environment["APP_NAME"].render(), "sample");
  assert_eq!(deploy.environment["CLUSTER_NAME"].render(), "eks-blueprint");
}

#[test]
#[serial]
fn deploy_script_renders_with_resolved_environment() {
  let stack = compose_with([
    ("APPLICATION_NAME", Some("sample")),
    ("DEPLOY_ENVIRONMENT", Some("dev")),
    ("DEPLOY_NAMESPACE", Some("dev")),
    ("EKS_CLUSTER_NAME", Some("foo")),
  ]);

  let deploy = stack.project(DEPLOY_PROJECT_NAME).unwrap();
  let action = &stack.pipeline().unwrap().stage(StageKind::Deploy).unwrap().actions[0];

  let mut known = KnownValues::new().with_attribute(
    AttrRef::new(REGISTRY_NAME, Attribute::RepositoryUri),
    "123456789012.dkr.ecr.us-east-1.amazonaws.com/app",
  );
  known.publish("BuildVariables", "BUILD_VERSION", "a1b2c3");

  let env: BTreeMap<String, String> = action.resolve_environment(&deploy.environment, &known);
  let rendered = deploy.inline_script().unwrap().render(&env);

  let phases: Vec<PhaseName> = rendered.iter().map(|(p, _)| *p).collect();
  assert_eq!(phases, PhaseName::ALL.to_vec());

  let commands: BTreeMap<PhaseName, Vec<String>> = rendered.into_iter().collect();
  assert!(commands[&PhaseName::PreBuild].iter().any(|c| c.ends_with("--name foo")));
  let upgrade = &commands[&PhaseName::Build][0];
  assert!(upgrade.contains("-i sample-dev helm/sample -n dev -f helm/sample/values.dev.yaml"));
  assert!(upgrade.contains("--set image.repository=123456789012.dkr.ecr.us-east-1.amazonaws.com/app"));
  assert!(upgrade.ends_with("--set image.tag=a1b2c3"));

  let install = &commands[&PhaseName::Install];
  assert!(install[0].contains("get-helm-3"));
  assert!(install[1].starts_with("helm repo add stable"));

  let post = &commands[&PhaseName::PostBuild];
  assert_eq!(post.len(), 4);
  assert!(post[0].contains("$CODEBUILD_BUILD_SUCCEEDING") && post[0].contains("exit 1"));
  assert_eq!(post[1], "sleep 60");
  assert!(post[2].contains("kubectl get svc sample-dev -n dev"));
  assert!(post[3].contains("http://$APP_ENDPOINT/"));
}

#[test]
#[serial]
fn registry_grants_only_pull_to_build_service() {
  let stack = sample_stack();
  let Some(Descriptor::Registry(registry)) = stack.get(REGISTRY_NAME) else {
    panic!("registry missing");
  };

  assert_eq!(registry.principals(), vec![&Principal::service(BUILD_SERVICE_PRINCIPAL)]);
  let grant = &registry.resource_policy[0];
  let actions: Vec<&str> = grant.actions.iter().map(String::as_str).collect();
  let mut expected = PULL_ACTIONS.to_vec();
  expected.sort();
  assert_eq!(actions, expected);
  assert!(!grant.allows("ecr:PutImage"));
}

#[test]
#[serial]
fn changing_cluster_updates_both_projects() {
  let before = sample_stack().synthesize().unwrap();
  let after = compose_with([
    ("APPLICATION_NAME", Some("sample")),
    ("DEPLOY_ENVIRONMENT", Some("dev")),
    ("DEPLOY_NAMESPACE", Some("dev")),
    ("EKS_CLUSTER_NAME", Some("prod-cluster")),
  ])
  .synthesize()
  .unwrap();

  let diff = compute_diff(&after, Some(&before));
  assert_eq!(diff.to_update, vec![BUILD_PROJECT_NAME, DEPLOY_PROJECT_NAME]);
  assert_eq!(diff.unchanged.len(), 4);
}

#[test]
#[serial]
fn assembly_directory_receives_manifest() {
  let temp = TempDir::new().unwrap();
  let engine = AssemblyDir::new(temp.path());

  let manifest = sample_stack().synthesize().unwrap();
  engine.submit(&manifest).unwrap();

  let loaded = engine.load_manifest().unwrap().unwrap();
  assert!(compute_diff(&manifest, Some(&loaded)).is_empty());
}
