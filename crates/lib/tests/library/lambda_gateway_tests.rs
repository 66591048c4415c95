//! REST gateway behavior against a mock platform endpoint.

use std::time::{Duration, Instant};

use fnship_lib::gateway::{
  Credentials, Gateway, GatewayError, LambdaGateway, LambdaGatewayConfig, Lookup,
};
use fnship_lib::util::hash::LayerFingerprint;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer) -> LambdaGateway {
  gateway_with_timeout(server, Duration::from_secs(5))
}

fn gateway_with_timeout(server: &MockServer, request_timeout: Duration) -> LambdaGateway {
  LambdaGateway::new(LambdaGatewayConfig {
    region: "us-east-1".to_string(),
    endpoint: Some(server.uri()),
    credentials: Credentials::new("AKIDEXAMPLE", "secret"),
    request_timeout,
  })
  .unwrap()
}

fn not_found() -> ResponseTemplate {
  ResponseTemplate::new(404)
    .insert_header("x-amzn-errortype", "ResourceNotFoundException")
    .set_body_json(json!({ "Type": "User", "Message": "Function not found" }))
}

#[tokio::test]
async fn function_configuration_is_signed_and_decoded() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/2015-03-31/functions/orders-api/configuration"))
    .and(header_exists("authorization"))
    .and(header_exists("x-amz-date"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "FunctionName": "orders-api",
      "State": "Active",
      "LastUpdateStatus": "Successful",
      "Layers": [{ "Arn": "arn:aws:lambda:us-east-1:1:layer:orders:2" }]
    })))
    .expect(1)
    .mount(&server)
    .await;

  let config = gateway(&server)
    .get_function_config("orders-api")
    .await
    .unwrap()
    .found()
    .unwrap();

  assert_eq!(config.state.as_deref(), Some("Active"));
  assert_eq!(config.layers.len(), 1);
}

#[tokio::test]
async fn missing_function_is_a_lookup_miss() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/2015-03-31/functions/ghost/configuration"))
    .respond_with(not_found())
    .mount(&server)
    .await;

  let lookup = gateway(&server).get_function_config("ghost").await.unwrap();
  assert_eq!(lookup, Lookup::NotFound);
}

#[tokio::test]
async fn other_errors_carry_code_and_status() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/2015-03-31/functions/orders-api/versions"))
    .respond_with(
      ResponseTemplate::new(429)
        .insert_header("x-amzn-errortype", "TooManyRequestsException")
        .set_body_json(json!({ "message": "Rate exceeded" })),
    )
    .mount(&server)
    .await;

  let err = gateway(&server).publish_version("orders-api").await.unwrap_err();
  match err {
    GatewayError::Api {
      status, code, message, ..
    } => {
      assert_eq!(status, 429);
      assert_eq!(code, "TooManyRequestsException");
      assert_eq!(message, "Rate exceeded");
    }
    other => panic!("unexpected error: {other:?}"),
  }
}

#[tokio::test]
async fn version_listing_follows_markers() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/2015-03-31/functions/orders-api/versions"))
    .and(query_param_is_missing("Marker"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "Versions": [{ "FunctionName": "orders-api", "Version": "$LATEST" }, { "FunctionName": "orders-api", "Version": "1" }],
      "NextMarker": "page-2"
    })))
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path("/2015-03-31/functions/orders-api/versions"))
    .and(query_param("Marker", "page-2"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "Versions": [{
        "FunctionName": "orders-api",
        "Version": "2",
        "Layers": [{ "Arn": "arn:layer:orders:1" }]
      }]
    })))
    .mount(&server)
    .await;

  let versions = gateway(&server).list_versions("orders-api").await.unwrap();
  let ids: Vec<_> = versions.iter().map(|v| v.version.as_str()).collect();
  assert_eq!(ids, vec!["$LATEST", "1", "2"]);
  assert_eq!(versions[2].layers, vec!["arn:layer:orders:1".to_string()]);
}

#[tokio::test]
async fn layer_versions_are_returned_oldest_first() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/2018-10-31/layers/orders/versions"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "LayerVersions": [
        { "LayerVersionArn": "arn:layer:orders:3", "Version": 3, "Description": "c" },
        { "LayerVersionArn": "arn:layer:orders:2", "Version": 2, "Description": "b" },
        { "LayerVersionArn": "arn:layer:orders:1", "Version": 1 }
      ]
    })))
    .mount(&server)
    .await;

  let versions = gateway(&server).list_layer_versions("orders").await.unwrap();
  let numbers: Vec<_> = versions.iter().map(|v| v.version).collect();
  assert_eq!(numbers, vec![1, 2, 3]);
  assert_eq!(versions[0].description, None);
}

#[tokio::test]
async fn latest_layer_requests_one_item() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/2018-10-31/layers/orders/versions"))
    .and(query_param("MaxItems", "1"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "LayerVersions": [{ "LayerVersionArn": "arn:layer:orders:7", "Version": 7, "Description": "fp" }]
    })))
    .expect(1)
    .mount(&server)
    .await;

  let latest = gateway(&server).latest_layer_version("orders").await.unwrap().found().unwrap();
  assert_eq!(latest.version, 7);
  assert_eq!(latest.description.as_deref(), Some("fp"));
}

#[tokio::test]
async fn published_layer_records_fingerprint() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/2018-10-31/layers/orders/versions"))
    .and(body_partial_json(json!({ "Description": "xYxGh/AHY2h+9/i4q2uxRk4xFa+BuieZYHXj8iungIc=" })))
    .respond_with(ResponseTemplate::new(201).set_body_json(json!({
      "LayerVersionArn": "arn:layer:orders:1",
      "Version": 1,
      "Description": "xYxGh/AHY2h+9/i4q2uxRk4xFa+BuieZYHXj8iungIc="
    })))
    .expect(1)
    .mount(&server)
    .await;

  let fingerprint = LayerFingerprint("xYxGh/AHY2h+9/i4q2uxRk4xFa+BuieZYHXj8iungIc=".to_string());
  let info = gateway(&server)
    .publish_layer_version("orders", &fingerprint, b"PK")
    .await
    .unwrap();
  assert_eq!(info.arn, "arn:layer:orders:1");
}

#[tokio::test]
async fn delete_version_sends_qualifier() {
  let server = MockServer::start().await;
  Mock::given(method("DELETE"))
    .and(path("/2015-03-31/functions/orders-api"))
    .and(query_param("Qualifier", "4"))
    .respond_with(ResponseTemplate::new(204))
    .expect(1)
    .mount(&server)
    .await;

  gateway(&server).delete_version("orders-api", "4").await.unwrap();
}

#[tokio::test]
async fn stalled_request_fails_at_request_timeout() {
  let server = MockServer::start().await;
  Mock::given(method("PUT"))
    .and(path("/2015-03-31/functions/orders-api/code"))
    .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
    .mount(&server)
    .await;

  let started = Instant::now();
  let err = gateway_with_timeout(&server, Duration::from_millis(200))
    .update_function_code("orders-api", b"PK")
    .await
    .unwrap_err();

  assert!(
    matches!(err, GatewayError::Transport { operation: "update-function-code", .. }),
    "got: {err}"
  );
  assert!(started.elapsed() < Duration::from_secs(3));
}
