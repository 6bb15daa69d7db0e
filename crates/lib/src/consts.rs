//! Fixed names and values shared across the crate.

/// Length of the truncated SHA-256 prefix used for descriptor and manifest hashes.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Logical name of the composed stack.
pub const STACK_NAME: &str = "AppInfrastructureStack";

/// Default output directory for synthesized assemblies.
pub const DEFAULT_ASSEMBLY_DIR: &str = "shiplane.out";

/// Service principal of the build executor.
pub const BUILD_SERVICE_PRINCIPAL: &str = "codebuild.amazonaws.com";

/// Read-only image actions. The only actions a pull grant may carry.
pub const PULL_ACTIONS: [&str; 3] = [
  "ecr:GetDownloadUrlForLayer",
  "ecr:BatchGetImage",
  "ecr:BatchCheckLayerAvailability",
];

/// Full control over a registry, granted only on the owned repository.
pub const REGISTRY_ALL_ACTIONS: &str = "ecr:*";

/// Registry login. The provisioning API only accepts this action with a global scope.
pub const REGISTRY_TOKEN_ACTION: &str = "ecr:GetAuthorizationToken";

pub const LOG_ACTIONS: [&str; 5] = [
  "logs:CreateLogGroup",
  "logs:CreateLogStream",
  "logs:DescribeLogGroups",
  "logs:DescribeLogStreams",
  "logs:PutLogEvents",
];

/// Build image shared by both stage projects.
pub const BUILD_IMAGE: &str = "aws/codebuild/standard:7.0";

/// Script file maintained alongside the application source.
pub const BUILD_SCRIPT_FILE: &str = "buildspec.yml";

/// Schema version of phase-ordered scripts.
pub const BUILDSPEC_VERSION: &str = "0.2";

/// Namespace the Build action publishes its variables under.
pub const BUILD_VARIABLES_NAMESPACE: &str = "BuildVariables";

/// Variable carrying the image tag from Build to Deploy.
pub const BUILD_VERSION_VAR: &str = "BUILD_VERSION";

/// Upper bound for the atomic chart upgrade.
pub const CHART_UPGRADE_TIMEOUT_SECS: u64 = 60;

/// Fixed wait before querying the load balancer hostname. Not a readiness poll.
pub const POST_DEPLOY_GRACE_SECS: u64 = 60;

/// Helm chart repository index installed alongside the tooling.
pub const CHART_REPO_NAME: &str = "stable";
pub const CHART_REPO_URL: &str = "https://charts.helm.sh/stable";
pub const HELM_INSTALL_SCRIPT_URL: &str = "https://raw.githubusercontent.com/helm/helm/master/scripts/get-helm-3";
