//! End-to-end runs against the in-process platform.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fnship_lib::apply::{ApplyPhase, FunctionOutcome, SettlePolicy};
use fnship_lib::gateway::{
  AliasInfo, Call, CreateFunctionRequest, FunctionConfig, FunctionOverrides, FunctionVersion, Gateway, GatewayError,
  LayerVersionInfo, Lookup, MemoryGateway, Op,
};
use fnship_lib::plan::{FunctionAction, LayerAction};
use fnship_lib::prune::PruneOptions;
use fnship_lib::util::hash::LayerFingerprint;
use fnship_lib::{DeployReport, ReconcileOptions, Reconciler, RunError};

use super::common::{DEPLOY_YML, FakeInstaller, PACKAGE_JSON, Project, fast_options, reconciler};

/// The report carried by a run that stopped on a function failure.
fn failed_run(err: RunError) -> DeployReport {
  match err {
    RunError::FunctionFailed { report, .. } => *report,
    other => panic!("unexpected error: {other}"),
  }
}

/// Delegates to the in-process platform but stalls every function create.
struct StalledCreate(Arc<MemoryGateway>);

#[async_trait]
impl Gateway for StalledCreate {
  async fn get_function_config(&self, name: &str) -> Result<Lookup<FunctionConfig>, GatewayError> {
    self.0.get_function_config(name).await
  }

  async fn create_function(&self, request: &CreateFunctionRequest, code: &[u8]) -> Result<(), GatewayError> {
    tokio::time::sleep(Duration::from_secs(4)).await;
    self.0.create_function(request, code).await
  }

  async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<(), GatewayError> {
    self.0.update_function_code(name, code).await
  }

  async fn update_function_config(&self, name: &str, overrides: &FunctionOverrides) -> Result<(), GatewayError> {
    self.0.update_function_config(name, overrides).await
  }

  async fn publish_version(&self, name: &str) -> Result<String, GatewayError> {
    self.0.publish_version(name).await
  }

  async fn list_versions(&self, name: &str) -> Result<Vec<FunctionVersion>, GatewayError> {
    self.0.list_versions(name).await
  }

  async fn list_aliases(&self, name: &str) -> Result<Vec<AliasInfo>, GatewayError> {
    self.0.list_aliases(name).await
  }

  async fn delete_version(&self, name: &str, version: &str) -> Result<(), GatewayError> {
    self.0.delete_version(name, version).await
  }

  async fn latest_layer_version(&self, layer: &str) -> Result<Lookup<LayerVersionInfo>, GatewayError> {
    self.0.latest_layer_version(layer).await
  }

  async fn publish_layer_version(
    &self,
    layer: &str,
    fingerprint: &LayerFingerprint,
    archive: &[u8],
  ) -> Result<LayerVersionInfo, GatewayError> {
    self.0.publish_layer_version(layer, fingerprint, archive).await
  }

  async fn list_layer_versions(&self, layer: &str) -> Result<Vec<LayerVersionInfo>, GatewayError> {
    self.0.list_layer_versions(layer).await
  }

  async fn delete_layer_version(&self, layer: &str, version: u64) -> Result<(), GatewayError> {
    self.0.delete_layer_version(layer, version).await
  }
}

fn is_layer_call(call: &Call) -> bool {
  matches!(
    call,
    Call::LatestLayerVersion(_) | Call::PublishLayerVersion(_) | Call::ListLayerVersions(_) | Call::DeleteLayerVersion(..)
  )
}

#[tokio::test]
async fn first_deploy_creates_functions_and_layer() {
  let project = Project::new(DEPLOY_YML, Some(PACKAGE_JSON));
  let gateway = Arc::new(MemoryGateway::new());

  let report = reconciler(&gateway, fast_options())
    .deploy(&project.config())
    .await
    .unwrap();

  assert!(report.is_success());
  assert_eq!(report.plan.count(FunctionAction::Create), 2);
  assert_eq!(report.plan.layer.action, LayerAction::Create);

  let layer_arn = report.apply.layer.arn.clone().unwrap();
  assert_eq!(gateway.attached_layers("orders-api"), vec![layer_arn.clone()]);
  assert_eq!(gateway.attached_layers("orders-worker"), vec![layer_arn]);
  assert_eq!(gateway.layer_version_numbers("orders"), vec![1]);
  assert_eq!(gateway.version_ids("orders-api"), vec!["1", "2"]);
}

#[tokio::test]
async fn second_deploy_reuses_layer_and_updates_functions() {
  let project = Project::new(DEPLOY_YML, Some(PACKAGE_JSON));
  let gateway = Arc::new(MemoryGateway::new());
  let reconciler = reconciler(&gateway, fast_options());
  let config = project.config();

  reconciler.deploy(&config).await.unwrap();
  gateway.clear_calls();
  let report = reconciler.deploy(&config).await.unwrap();

  assert!(report.is_success());
  assert_eq!(report.plan.count(FunctionAction::Update), 2);
  assert_eq!(report.plan.layer.action, LayerAction::Reuse);
  assert!(!gateway.calls().iter().any(|c| matches!(c, Call::PublishLayerVersion(_))));
  assert_eq!(gateway.layer_version_numbers("orders"), vec![1]);
  assert_eq!(gateway.version_ids("orders-api"), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn changed_manifest_publishes_new_layer() {
  let project = Project::new(DEPLOY_YML, Some(PACKAGE_JSON));
  let gateway = Arc::new(MemoryGateway::new());
  let reconciler = reconciler(&gateway, fast_options());

  reconciler.deploy(&project.config()).await.unwrap();
  project.write("package.json", r#"{"dependencies": {"left-pad": "^1.3.0"}}"#);
  let report = reconciler.deploy(&project.config()).await.unwrap();

  assert_eq!(report.plan.layer.action, LayerAction::Create);
  let arn = report.apply.layer.arn.unwrap();
  assert!(arn.ends_with(":layer:orders:2"));
  assert_eq!(gateway.attached_layers("orders-worker"), vec![arn]);
}

#[tokio::test]
async fn reordered_manifest_keeps_layer() {
  let project = Project::new(DEPLOY_YML, Some(PACKAGE_JSON));
  let gateway = Arc::new(MemoryGateway::new());
  let reconciler = reconciler(&gateway, fast_options());

  reconciler.deploy(&project.config()).await.unwrap();
  project.write(
    "package.json",
    r#"{"dependencies": {"zod": "^3.22.0", "left-pad": "^1.0.0"}}"#,
  );
  let outcome = reconciler.plan(&project.config()).await.unwrap();

  assert_eq!(outcome.plan.layer.action, LayerAction::Reuse);
}

#[tokio::test]
async fn project_without_manifest_makes_no_layer_calls() {
  let project = Project::new(DEPLOY_YML, None);
  let gateway = Arc::new(MemoryGateway::new());

  let report = reconciler(&gateway, fast_options())
    .deploy(&project.config())
    .await
    .unwrap();

  assert!(report.is_success());
  assert_eq!(report.plan.layer.action, LayerAction::None);
  assert!(report.apply.layer.arn.is_none());
  assert!(!gateway.calls().iter().any(is_layer_call));
  assert!(gateway.attached_layers("orders-api").is_empty());
}

#[tokio::test]
async fn plan_issues_only_reads() {
  let project = Project::new(DEPLOY_YML, Some(PACKAGE_JSON));
  let gateway = Arc::new(MemoryGateway::new());
  gateway.seed_function("orders-api");

  let outcome = reconciler(&gateway, fast_options())
    .plan(&project.config())
    .await
    .unwrap();

  assert_eq!(outcome.plan.action_for("orders-api"), Some(FunctionAction::Update));
  assert_eq!(outcome.plan.action_for("orders-worker"), Some(FunctionAction::Create));
  assert!(outcome.fingerprint.is_some());
  assert!(
    gateway
      .calls()
      .iter()
      .all(|c| matches!(c, Call::GetFunctionConfig(_) | Call::LatestLayerVersion(_)))
  );
}

#[tokio::test]
async fn failed_settle_stops_run_and_skips_prune() {
  let deploy = format!("{}Prune:\n  RetainCount: 0\n", DEPLOY_YML);
  let project = Project::new(&deploy, None);
  let gateway = Arc::new(MemoryGateway::new());
  gateway.seed_function("orders-api");
  gateway.seed_version("orders-api", &[]);
  gateway.script_settle("orders-api", &["InProgress", "InProgress", "Failed"]);

  let err = reconciler(&gateway, fast_options())
    .deploy(&project.config())
    .await
    .unwrap_err();

  assert!(err.to_string().contains("deploy of 'orders-api' failed during update-code"), "got: {err}");
  let report = failed_run(err);
  assert!(!report.is_success());
  let failed = report.apply.failure().unwrap();
  assert_eq!(failed.name, "orders-api");
  assert!(matches!(
    failed.outcome,
    FunctionOutcome::Failed {
      phase: ApplyPhase::UpdateCode,
      ..
    }
  ));
  assert_eq!(report.apply.functions[1].outcome, FunctionOutcome::NotAttempted);
  assert!(!gateway.function_exists("orders-worker"));
  assert!(report.prune.is_none());
  assert_eq!(gateway.version_ids("orders-api"), vec!["1"]);
}

#[tokio::test]
async fn run_timeout_fails_settle_wait() {
  let project = Project::new(DEPLOY_YML, None);
  let gateway = Arc::new(MemoryGateway::new());
  gateway.seed_function("orders-api");
  gateway.script_settle("orders-api", &["InProgress"; 1000]);

  let options = ReconcileOptions {
    settle: SettlePolicy {
      max_attempts: 10_000,
      interval: Duration::from_millis(5),
    },
    timeout: Some(Duration::from_millis(50)),
    ..Default::default()
  };
  let err = reconciler(&gateway, options).deploy(&project.config()).await.unwrap_err();

  let report = failed_run(err);
  let failed = report.apply.failure().unwrap();
  match &failed.outcome {
    FunctionOutcome::Failed { phase, error } => {
      assert_eq!(*phase, ApplyPhase::UpdateCode);
      assert!(error.contains("did not settle"), "got: {error}");
    }
    other => panic!("unexpected outcome: {other:?}"),
  }
}

#[tokio::test]
async fn run_timeout_bounds_stalled_platform_calls() {
  let project = Project::new(DEPLOY_YML, None);
  let memory = Arc::new(MemoryGateway::new());
  let gateway: Arc<dyn Gateway> = Arc::new(StalledCreate(memory.clone()));
  let options = ReconcileOptions {
    timeout: Some(Duration::from_millis(300)),
    ..fast_options()
  };

  let started = Instant::now();
  let err = Reconciler::new(gateway, Arc::new(FakeInstaller))
    .with_options(options)
    .deploy(&project.config())
    .await
    .unwrap_err();

  assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
  match &err {
    RunError::FunctionFailed { function, phase, error, .. } => {
      assert_eq!(function, "orders-api");
      assert_eq!(*phase, ApplyPhase::Create);
      assert!(error.contains("deadline"), "got: {error}");
    }
    other => panic!("unexpected error: {other}"),
  }
  let report = failed_run(err);
  assert_eq!(report.apply.functions[1].outcome, FunctionOutcome::NotAttempted);
  assert!(!memory.function_exists("orders-api"));
  assert!(!memory.function_exists("orders-worker"));
}

#[tokio::test]
async fn deploy_prunes_with_configured_policy() {
  let deploy = format!("{}Prune:\n  RetainCount: 1\n  IncludeLayers: true\n", DEPLOY_YML);
  let project = Project::new(&deploy, Some(PACKAGE_JSON));
  let gateway = Arc::new(MemoryGateway::new());
  let reconciler = reconciler(&gateway, fast_options());

  reconciler.deploy(&project.config()).await.unwrap();
  reconciler.deploy(&project.config()).await.unwrap();
  let report = reconciler.deploy(&project.config()).await.unwrap();

  let prune = report.prune.unwrap();
  assert_eq!(prune.functions.len(), 2);
  // Only the newest published version survives alongside the head.
  assert_eq!(gateway.version_ids("orders-api"), vec!["4"]);
  // The layer is attached to the head and the surviving version.
  assert_eq!(gateway.layer_version_numbers("orders"), vec![1]);
  assert_eq!(prune.layer.unwrap().protected, vec![1]);
}

#[tokio::test]
async fn skip_prune_leaves_versions() {
  let deploy = format!("{}Prune:\n  RetainCount: 0\n", DEPLOY_YML);
  let project = Project::new(&deploy, None);
  let gateway = Arc::new(MemoryGateway::new());
  let options = ReconcileOptions {
    skip_prune: true,
    ..fast_options()
  };

  let report = reconciler(&gateway, options).deploy(&project.config()).await.unwrap();

  assert!(report.prune.is_none());
  assert_eq!(gateway.version_ids("orders-api"), vec!["1", "2"]);
}

#[tokio::test]
async fn explicit_prune_spares_alias_targets() {
  let project = Project::new(DEPLOY_YML, None);
  let gateway = Arc::new(MemoryGateway::new());
  for _ in 0..5 {
    gateway.seed_version("orders-api", &[]);
  }
  gateway.seed_alias("orders-api", "live", "3");

  let options = PruneOptions {
    retain: 2,
    include_layers: false,
    dry_run: false,
  };
  let report = reconciler(&gateway, fast_options())
    .prune_with(&project.config(), &options)
    .await
    .unwrap();

  assert_eq!(report.functions[0].deleted, vec!["1", "2"]);
  assert_eq!(gateway.version_ids("orders-api"), vec!["3", "4", "5"]);
}

#[tokio::test]
async fn lookup_failure_aborts_before_mutation() {
  let project = Project::new(DEPLOY_YML, None);
  let gateway = Arc::new(MemoryGateway::new());
  gateway.fail_on(Op::GetFunctionConfig, "orders-worker");

  let err = reconciler(&gateway, fast_options())
    .deploy(&project.config())
    .await
    .unwrap_err();

  assert!(err.to_string().contains("orders-worker"));
  assert!(
    gateway
      .calls()
      .iter()
      .all(|c| matches!(c, Call::GetFunctionConfig(_)))
  );
}
