//! Shared helpers for library integration tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fnship_lib::apply::{DependencyInstaller, InstallError, SettlePolicy};
use fnship_lib::gateway::{Gateway, MemoryGateway};
use fnship_lib::{DeployConfig, ReconcileOptions, Reconciler};
use tempfile::TempDir;

pub const DEPLOY_YML: &str = r#"
Service: orders
Ignore: ["*.md"]
Functions:
  api:
    FunctionName: orders-api
    Role: arn:aws:iam::123456789012:role/orders
    Runtime: nodejs20.x
    Handler: index.handler
  worker:
    FunctionName: orders-worker
    Role: arn:aws:iam::123456789012:role/orders
    Runtime: nodejs20.x
    Handler: worker.handler
"#;

pub const PACKAGE_JSON: &str = r#"{
  "name": "orders",
  "dependencies": { "left-pad": "^1.0.0", "zod": "^3.22.0" }
}"#;

/// Stands in for npm: drops one module per declared dependency into staging.
pub struct FakeInstaller;

#[async_trait]
impl DependencyInstaller for FakeInstaller {
  async fn install(&self, _project_dir: &Path, staging: &Path) -> Result<(), InstallError> {
    let module = staging.join("node_modules").join("left-pad");
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(module.join("index.js"), "module.exports = pad;").unwrap();
    Ok(())
  }
}

/// A project directory with a deploy document, code and optional manifest.
pub struct Project {
  pub temp: TempDir,
}

impl Project {
  pub fn new(deploy: &str, package_json: Option<&str>) -> Self {
    let temp = TempDir::new().unwrap();
    let project = Self { temp };
    project.write("deploy.yml", deploy);
    project.write("index.js", "exports.handler = async () => ({ statusCode: 200 });");
    project.write("worker.js", "exports.handler = async () => {};");
    project.write("README.md", "# orders");
    if let Some(manifest) = package_json {
      project.write("package.json", manifest);
    }
    project
  }

  pub fn write(&self, relative: &str, content: &str) {
    let path = self.temp.path().join(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }

  pub fn config(&self) -> DeployConfig {
    DeployConfig::load(&self.temp.path().join("deploy.yml")).unwrap()
  }
}

pub fn fast_options() -> ReconcileOptions {
  ReconcileOptions {
    settle: SettlePolicy {
      max_attempts: 20,
      interval: Duration::from_millis(1),
    },
    ..Default::default()
  }
}

pub fn reconciler(gateway: &Arc<MemoryGateway>, options: ReconcileOptions) -> Reconciler {
  let gateway: Arc<dyn Gateway> = gateway.clone();
  Reconciler::new(gateway, Arc::new(FakeInstaller)).with_options(options)
}
