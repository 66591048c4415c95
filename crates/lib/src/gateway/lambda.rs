//! REST gateway for the hosted function platform.
//!
//! Speaks the platform's JSON API directly over `reqwest`, signing each
//! request with [`sigv4`](super::sigv4). Archives travel base64-encoded in the
//! JSON body. List calls follow `NextMarker` until exhausted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sigv4::{Credentials, SigningRequest, authorization, canonical_query, uri_encode};
use super::{
  AliasInfo, CreateFunctionRequest, FunctionConfig, FunctionOverrides, FunctionVersion, Gateway, GatewayError,
  LayerVersionInfo, Lookup,
};
use crate::consts::LIST_PAGE_SIZE;
use crate::util::hash::{LayerFingerprint, hash_bytes};

const SERVICE: &str = "lambda";
const FUNCTIONS_API: &str = "/2015-03-31/functions";
const LAYERS_API: &str = "/2018-10-31/layers";

/// Connection settings for [`LambdaGateway`].
#[derive(Debug, Clone)]
pub struct LambdaGatewayConfig {
  pub region: String,
  /// Base URL override, e.g. a local emulator. Defaults to the regional endpoint.
  pub endpoint: Option<String>,
  pub credentials: Credentials,
  /// Per-request limit; a request still running past it fails as a transport error.
  pub request_timeout: Duration,
}

impl LambdaGatewayConfig {
  pub fn endpoint_url(&self) -> String {
    self
      .endpoint
      .clone()
      .unwrap_or_else(|| format!("https://lambda.{}.amazonaws.com", self.region))
  }
}

pub struct LambdaGateway {
  client: Client,
  base: Url,
  host: String,
  region: String,
  credentials: Credentials,
}

impl LambdaGateway {
  pub fn new(config: LambdaGatewayConfig) -> Result<Self, GatewayError> {
    let endpoint = config.endpoint_url();
    let base = Url::parse(&endpoint).map_err(|e| GatewayError::Decode {
      operation: "connect",
      target: endpoint.clone(),
      message: format!("invalid endpoint: {}", e),
    })?;

    let host = match (base.host_str(), base.port()) {
      (Some(host), Some(port)) => format!("{}:{}", host, port),
      (Some(host), None) => host.to_string(),
      (None, _) => {
        return Err(GatewayError::Decode {
          operation: "connect",
          target: endpoint,
          message: "endpoint has no host".to_string(),
        });
      }
    };

    let client = Client::builder()
      .timeout(config.request_timeout)
      .build()
      .map_err(|source| GatewayError::Transport {
        operation: "connect",
        target: endpoint,
        source,
      })?;

    Ok(Self {
      client,
      base,
      host,
      region: config.region,
      credentials: config.credentials,
    })
  }

  /// Send a signed request; non-success statuses become [`GatewayError`].
  async fn send(
    &self,
    operation: &'static str,
    target: &str,
    method: Method,
    path: &str,
    query: &[(String, String)],
    body: Option<Vec<u8>>,
  ) -> Result<Response, GatewayError> {
    let payload = body.unwrap_or_default();
    let payload_hash = hash_bytes(&payload).0;
    let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = BTreeMap::new();
    headers.insert("host".to_string(), self.host.clone());
    headers.insert("x-amz-date".to_string(), amz_date.clone());
    if let Some(token) = &self.credentials.session_token {
      headers.insert("x-amz-security-token".to_string(), token.clone());
    }
    if !payload.is_empty() {
      headers.insert("content-type".to_string(), "application/json".to_string());
    }

    let signing = SigningRequest {
      method: method.as_str(),
      path,
      query,
      headers: &headers,
      payload_hash: &payload_hash,
    };
    let auth = authorization(&self.credentials, &self.region, SERVICE, &amz_date, &signing);

    let mut url = self.base.clone();
    url.set_path(path);
    let query_string = canonical_query(query);
    url.set_query((!query_string.is_empty()).then_some(query_string.as_str()));

    debug!(operation, target, method = %method, url = %url, "platform request");

    let mut request = self.client.request(method, url).header("authorization", auth);
    for (name, value) in &headers {
      if name != "host" {
        request = request.header(name.as_str(), value.as_str());
      }
    }

    let response = request
      .body(payload)
      .send()
      .await
      .map_err(|source| GatewayError::Transport {
        operation,
        target: target.to_string(),
        source,
      })?;

    if response.status().is_success() {
      return Ok(response);
    }

    let status = response.status();
    let error_type = response
      .headers()
      .get("x-amzn-errortype")
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    Err(error_from_response(operation, target, status, error_type.as_deref(), &body))
  }

  async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    target: &str,
    response: Response,
  ) -> Result<T, GatewayError> {
    response.json::<T>().await.map_err(|e| GatewayError::Decode {
      operation,
      target: target.to_string(),
      message: e.to_string(),
    })
  }

  /// Collect every page of a list call.
  async fn list_all<P: Page>(&self, operation: &'static str, target: &str, path: &str) -> Result<Vec<P::Item>, GatewayError> {
    let mut items = Vec::new();
    let mut marker: Option<String> = None;

    loop {
      let mut query = vec![("MaxItems".to_string(), LIST_PAGE_SIZE.to_string())];
      if let Some(m) = &marker {
        query.push(("Marker".to_string(), m.clone()));
      }

      let response = self.send(operation, target, Method::GET, path, &query, None).await?;
      let page: P = Self::decode(operation, target, response).await?;
      let (mut page_items, next) = page.into_parts();
      items.append(&mut page_items);

      match next {
        Some(m) if !m.is_empty() => marker = Some(m),
        _ => break,
      }
    }

    Ok(items)
  }
}

fn function_path(name: &str) -> String {
  format!("{}/{}", FUNCTIONS_API, uri_encode(name, true))
}

fn layer_versions_path(layer: &str) -> String {
  format!("{}/{}/versions", LAYERS_API, uri_encode(layer, true))
}

fn to_json<T: Serialize>(operation: &'static str, target: &str, value: &T) -> Result<Vec<u8>, GatewayError> {
  serde_json::to_vec(value).map_err(|e| GatewayError::Decode {
    operation,
    target: target.to_string(),
    message: e.to_string(),
  })
}

/// Map an error response onto [`GatewayError`].
///
/// The error code comes from the `x-amzn-errortype` header (text before the
/// first `:`), falling back to the body's `Type`/`__type` field.
fn error_from_response(
  operation: &'static str,
  target: &str,
  status: StatusCode,
  error_type: Option<&str>,
  body: &str,
) -> GatewayError {
  let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

  let code = error_type
    .and_then(|t| t.split(':').next())
    .filter(|t| !t.is_empty())
    .map(str::to_string)
    .or(parsed.type_name)
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());

  if status == StatusCode::NOT_FOUND && code.contains("NotFound") {
    return GatewayError::NotFound {
      operation,
      target: target.to_string(),
    };
  }

  GatewayError::Api {
    operation,
    target: target.to_string(),
    status: status.as_u16(),
    code,
    message: parsed.message.unwrap_or_else(|| body.trim().to_string()),
  }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
  #[serde(rename = "Type", alias = "__type", default)]
  type_name: Option<String>,
  #[serde(rename = "Message", alias = "message", default)]
  message: Option<String>,
}

trait Page: DeserializeOwned {
  type Item;
  fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionsPage {
  #[serde(default)]
  versions: Vec<FunctionConfig>,
  #[serde(default)]
  next_marker: Option<String>,
}

impl Page for VersionsPage {
  type Item = FunctionVersion;

  fn into_parts(self) -> (Vec<FunctionVersion>, Option<String>) {
    let versions = self
      .versions
      .into_iter()
      .map(|config| FunctionVersion {
        version: config.version.unwrap_or_default(),
        layers: config.layers.into_iter().map(|l| l.arn).collect(),
      })
      .collect();
    (versions, self.next_marker)
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliasesPage {
  #[serde(default)]
  aliases: Vec<AliasInfo>,
  #[serde(default)]
  next_marker: Option<String>,
}

impl Page for AliasesPage {
  type Item = AliasInfo;

  fn into_parts(self) -> (Vec<AliasInfo>, Option<String>) {
    (self.aliases, self.next_marker)
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawLayerVersion {
  layer_version_arn: String,
  version: u64,
  #[serde(default)]
  description: Option<String>,
}

impl From<RawLayerVersion> for LayerVersionInfo {
  fn from(raw: RawLayerVersion) -> Self {
    Self {
      version: raw.version,
      arn: raw.layer_version_arn,
      description: raw.description.filter(|d| !d.is_empty()),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LayerVersionsPage {
  #[serde(default)]
  layer_versions: Vec<RawLayerVersion>,
  #[serde(default)]
  next_marker: Option<String>,
}

impl Page for LayerVersionsPage {
  type Item = LayerVersionInfo;

  fn into_parts(self) -> (Vec<LayerVersionInfo>, Option<String>) {
    (
      self.layer_versions.into_iter().map(LayerVersionInfo::from).collect(),
      self.next_marker,
    )
  }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ZipContent {
  zip_file: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateFunctionBody<'a> {
  #[serde(flatten)]
  request: &'a CreateFunctionRequest,
  code: ZipContent,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PublishLayerBody<'a> {
  description: &'a str,
  content: ZipContent,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PublishedVersion {
  version: String,
}

#[async_trait]
impl Gateway for LambdaGateway {
  async fn get_function_config(&self, name: &str) -> Result<Lookup<FunctionConfig>, GatewayError> {
    const OP: &str = "get-function-configuration";
    let path = format!("{}/configuration", function_path(name));
    match self.send(OP, name, Method::GET, &path, &[], None).await {
      Ok(response) => Ok(Lookup::Found(Self::decode(OP, name, response).await?)),
      Err(e) if e.is_not_found() => Ok(Lookup::NotFound),
      Err(e) => Err(e),
    }
  }

  async fn create_function(&self, request: &CreateFunctionRequest, code: &[u8]) -> Result<(), GatewayError> {
    const OP: &str = "create-function";
    let name = request.function_name.as_str();
    let body = CreateFunctionBody {
      request,
      code: ZipContent {
        zip_file: STANDARD.encode(code),
      },
    };
    let body = to_json(OP, name, &body)?;
    self.send(OP, name, Method::POST, FUNCTIONS_API, &[], Some(body)).await?;
    Ok(())
  }

  async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<(), GatewayError> {
    const OP: &str = "update-function-code";
    let path = format!("{}/code", function_path(name));
    let body = to_json(
      OP,
      name,
      &ZipContent {
        zip_file: STANDARD.encode(code),
      },
    )?;
    self.send(OP, name, Method::PUT, &path, &[], Some(body)).await?;
    Ok(())
  }

  async fn update_function_config(&self, name: &str, overrides: &FunctionOverrides) -> Result<(), GatewayError> {
    const OP: &str = "update-function-configuration";
    let path = format!("{}/configuration", function_path(name));
    let body = to_json(OP, name, overrides)?;
    self.send(OP, name, Method::PUT, &path, &[], Some(body)).await?;
    Ok(())
  }

  async fn publish_version(&self, name: &str) -> Result<String, GatewayError> {
    const OP: &str = "publish-version";
    let path = format!("{}/versions", function_path(name));
    let response = self.send(OP, name, Method::POST, &path, &[], Some(b"{}".to_vec())).await?;
    let published: PublishedVersion = Self::decode(OP, name, response).await?;
    Ok(published.version)
  }

  async fn list_versions(&self, name: &str) -> Result<Vec<FunctionVersion>, GatewayError> {
    let path = format!("{}/versions", function_path(name));
    self.list_all::<VersionsPage>("list-versions", name, &path).await
  }

  async fn list_aliases(&self, name: &str) -> Result<Vec<AliasInfo>, GatewayError> {
    let path = format!("{}/aliases", function_path(name));
    self.list_all::<AliasesPage>("list-aliases", name, &path).await
  }

  async fn delete_version(&self, name: &str, version: &str) -> Result<(), GatewayError> {
    const OP: &str = "delete-version";
    let query = [("Qualifier".to_string(), version.to_string())];
    let target = format!("{}:{}", name, version);
    self
      .send(OP, &target, Method::DELETE, &function_path(name), &query, None)
      .await?;
    Ok(())
  }

  async fn latest_layer_version(&self, layer: &str) -> Result<Lookup<LayerVersionInfo>, GatewayError> {
    const OP: &str = "list-layer-versions";
    let query = [("MaxItems".to_string(), "1".to_string())];
    let path = layer_versions_path(layer);
    match self.send(OP, layer, Method::GET, &path, &query, None).await {
      Ok(response) => {
        let page: LayerVersionsPage = Self::decode(OP, layer, response).await?;
        let (versions, _) = page.into_parts();
        Ok(versions.into_iter().next().into())
      }
      Err(e) if e.is_not_found() => Ok(Lookup::NotFound),
      Err(e) => Err(e),
    }
  }

  async fn publish_layer_version(
    &self,
    layer: &str,
    fingerprint: &LayerFingerprint,
    archive: &[u8],
  ) -> Result<LayerVersionInfo, GatewayError> {
    const OP: &str = "publish-layer-version";
    let body = PublishLayerBody {
      description: fingerprint.as_str(),
      content: ZipContent {
        zip_file: STANDARD.encode(archive),
      },
    };
    let body = to_json(OP, layer, &body)?;
    let response = self
      .send(OP, layer, Method::POST, &layer_versions_path(layer), &[], Some(body))
      .await?;
    let raw: RawLayerVersion = Self::decode(OP, layer, response).await?;
    Ok(raw.into())
  }

  async fn list_layer_versions(&self, layer: &str) -> Result<Vec<LayerVersionInfo>, GatewayError> {
    let path = layer_versions_path(layer);
    match self.list_all::<LayerVersionsPage>("list-layer-versions", layer, &path).await {
      Ok(mut versions) => {
        // The platform lists newest first.
        versions.reverse();
        Ok(versions)
      }
      Err(e) if e.is_not_found() => Ok(Vec::new()),
      Err(e) => Err(e),
    }
  }

  async fn delete_layer_version(&self, layer: &str, version: u64) -> Result<(), GatewayError> {
    const OP: &str = "delete-layer-version";
    let path = format!("{}/{}", layer_versions_path(layer), version);
    let target = format!("{}:{}", layer, version);
    self.send(OP, &target, Method::DELETE, &path, &[], None).await?;
    Ok(())
  }
}
