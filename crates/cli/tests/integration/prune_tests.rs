//! `fnship prune` against a mock platform.

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{DEPLOY_YML, TestEnv, not_found, run, stderr, stdout};

async fn mount_versions(server: &MockServer, name: &str, versions: &[&str]) {
  let versions: Vec<_> = versions
    .iter()
    .map(|v| json!({ "FunctionName": name, "Version": v }))
    .collect();
  Mock::given(method("GET"))
    .and(path(format!("/2015-03-31/functions/{name}/versions")))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Versions": versions })))
    .mount(server)
    .await;
}

async fn mount_aliases(server: &MockServer, name: &str, aliases: serde_json::Value) {
  Mock::given(method("GET"))
    .and(path(format!("/2015-03-31/functions/{name}/aliases")))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Aliases": aliases })))
    .mount(server)
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_lists_without_deleting() {
  let server = MockServer::start().await;
  mount_versions(&server, "orders-api", &["$LATEST", "1", "2", "3"]).await;
  mount_aliases(&server, "orders-api", json!([])).await;
  Mock::given(method("GET"))
    .and(path("/2015-03-31/functions/orders-worker/versions"))
    .respond_with(not_found())
    .mount(&server)
    .await;
  Mock::given(method("DELETE"))
    .respond_with(ResponseTemplate::new(204))
    .expect(0)
    .mount(&server)
    .await;
  let env = TestEnv::new(&server, DEPLOY_YML);

  let mut cmd = env.fnship_cmd();
  cmd.args(["prune", "--retain", "1", "--dry-run"]);
  let output = run(cmd).await;

  assert!(output.status.success(), "stderr: {}", stderr(&output));
  let out = stdout(&output);
  assert!(out.contains("removed 1, 2"), "stdout: {out}");
  assert!(out.contains("Dry run - no changes made"));
}

#[tokio::test(flavor = "multi_thread")]
async fn confirmed_prune_deletes_unreferenced_versions() {
  let server = MockServer::start().await;
  mount_versions(&server, "orders-api", &["$LATEST", "1", "2", "3", "4"]).await;
  mount_aliases(&server, "orders-api", json!([{ "Name": "live", "FunctionVersion": "1" }])).await;
  mount_versions(&server, "orders-worker", &["$LATEST", "1"]).await;
  mount_aliases(&server, "orders-worker", json!([])).await;
  for version in ["2", "3"] {
    Mock::given(method("DELETE"))
      .and(path("/2015-03-31/functions/orders-api"))
      .and(query_param("Qualifier", version))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;
  }
  let env = TestEnv::new(&server, DEPLOY_YML);

  let mut cmd = env.fnship_cmd();
  cmd.args(["-o", "json", "prune", "--retain", "1", "--yes"]);
  let output = run(cmd).await;

  assert!(output.status.success(), "stderr: {}", stderr(&output));
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["dry_run"], false);
  assert_eq!(json["functions"][0]["deleted"], json!(["2", "3"]));
  assert_eq!(json["functions"][1]["deleted"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn retention_can_come_from_config() {
  let server = MockServer::start().await;
  mount_versions(&server, "orders-api", &["$LATEST", "1", "2"]).await;
  mount_aliases(&server, "orders-api", json!([])).await;
  mount_versions(&server, "orders-worker", &["$LATEST"]).await;
  mount_aliases(&server, "orders-worker", json!([])).await;
  let deploy = format!("{DEPLOY_YML}Prune:\n  RetainCount: 5\n");
  let env = TestEnv::new(&server, &deploy);

  let mut cmd = env.fnship_cmd();
  cmd.args(["prune", "--dry-run"]);
  let output = run(cmd).await;

  assert!(output.status.success(), "stderr: {}", stderr(&output));
  assert!(stdout(&output).contains("Versions removed"));
}
