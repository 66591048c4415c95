//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;
use std::process::Output;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DEPLOY_YML: &str = r#"
Service: orders
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

/// Isolated project directory pointed at a mock platform endpoint.
pub struct TestEnv {
  pub temp: TempDir,
  pub endpoint: String,
}

impl TestEnv {
  pub fn new(server: &MockServer, deploy: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self {
      temp,
      endpoint: server.uri(),
    };
    env.write_file("deploy.yml", deploy);
    env.write_file("index.js", "exports.handler = async () => ({ statusCode: 200 });");
    env.write_file("worker.js", "exports.handler = async () => {};");
    env
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Build an fnship command with region, credentials and endpoint set.
  pub fn fnship_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("fnship");
    cmd
      .current_dir(self.temp.path())
      .env_remove("AWS_SESSION_TOKEN")
      .env_remove("AWS_DEFAULT_REGION")
      .env_remove("FNSHIP_CONFIG")
      .env_remove("RUST_LOG")
      .env("AWS_REGION", "us-east-1")
      .env("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE")
      .env("AWS_SECRET_ACCESS_KEY", "secret")
      .env("FNSHIP_ENDPOINT", &self.endpoint);
    cmd
  }
}

/// Run a command off the async runtime so the mock server keeps serving.
pub async fn run(mut cmd: Command) -> Output {
  tokio::task::spawn_blocking(move || cmd.output().unwrap()).await.unwrap()
}

pub fn stdout(output: &Output) -> String {
  String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
  String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn not_found() -> ResponseTemplate {
  ResponseTemplate::new(404)
    .insert_header("x-amzn-errortype", "ResourceNotFoundException")
    .set_body_json(json!({ "Type": "User", "Message": "Function not found" }))
}

/// Answer a function configuration lookup.
pub async fn mount_function(server: &MockServer, name: &str, exists: bool) {
  let response = if exists {
    ResponseTemplate::new(200).set_body_json(json!({
      "FunctionName": name,
      "State": "Active",
      "LastUpdateStatus": "Successful"
    }))
  } else {
    not_found()
  };
  Mock::given(method("GET"))
    .and(path(format!("/2015-03-31/functions/{name}/configuration")))
    .respond_with(response)
    .mount(server)
    .await;
}
