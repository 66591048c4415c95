//! In-process platform.
//!
//! `MemoryGateway` keeps functions, versions, aliases and layers in memory and
//! follows the same contracts as the hosted platform: versions are listed
//! oldest first with the mutable head first of all, layer versions are
//! listed oldest first, and version numbers are never reused.
//!
//! Tests drive it by seeding state, scripting the update status reported
//! while a function settles, and injecting failures for a given
//! operation/target pair. Every call is recorded for later assertions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
  AliasInfo, AttachedLayer, CreateFunctionRequest, FunctionConfig, FunctionOverrides, FunctionVersion, Gateway,
  GatewayError, LayerVersionInfo, Lookup,
};
use crate::consts::HEAD_VERSION;
use crate::util::hash::{LayerFingerprint, hash_bytes};

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "000000000000";

/// Gateway operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  GetFunctionConfig,
  CreateFunction,
  UpdateFunctionCode,
  UpdateFunctionConfig,
  PublishVersion,
  ListVersions,
  ListAliases,
  DeleteVersion,
  LatestLayerVersion,
  PublishLayerVersion,
  ListLayerVersions,
  DeleteLayerVersion,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  GetFunctionConfig(String),
  CreateFunction { name: String, layers: Vec<String> },
  UpdateFunctionCode(String),
  UpdateFunctionConfig { name: String, layers: Option<Vec<String>> },
  PublishVersion(String),
  ListVersions(String),
  ListAliases(String),
  DeleteVersion(String, String),
  LatestLayerVersion(String),
  PublishLayerVersion(String),
  ListLayerVersions(String),
  DeleteLayerVersion(String, u64),
}

#[derive(Debug, Default)]
struct FunctionRecord {
  config: FunctionConfig,
  code_sha256: String,
  next_version: u64,
  versions: Vec<FunctionVersion>,
  aliases: Vec<AliasInfo>,
}

#[derive(Debug, Default)]
struct LayerRecord {
  next_version: u64,
  versions: Vec<LayerVersionInfo>,
}

#[derive(Debug, Default)]
struct State {
  functions: BTreeMap<String, FunctionRecord>,
  layers: BTreeMap<String, LayerRecord>,
  failures: HashMap<(Op, String), String>,
  settle_scripts: HashMap<String, VecDeque<String>>,
  settling: HashSet<String>,
  calls: Vec<Call>,
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
  state: Mutex<State>,
}

fn function_arn(name: &str) -> String {
  format!("arn:aws:lambda:{}:{}:function:{}", REGION, ACCOUNT, name)
}

fn layer_arn(layer: &str, version: u64) -> String {
  format!("arn:aws:lambda:{}:{}:layer:{}:{}", REGION, ACCOUNT, layer, version)
}

impl MemoryGateway {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    // A poisoned lock only means another test thread panicked mid-call.
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Seed an existing function with no published versions.
  pub fn seed_function(&self, name: &str) {
    let mut state = self.lock();
    state.functions.entry(name.to_string()).or_insert_with(|| new_record(name));
  }

  /// Seed a published version with the given attached layers; returns its id.
  pub fn seed_version(&self, name: &str, layers: &[&str]) -> String {
    let mut state = self.lock();
    let record = state.functions.entry(name.to_string()).or_insert_with(|| new_record(name));
    record.next_version += 1;
    let version = record.next_version.to_string();
    record.versions.push(FunctionVersion {
      version: version.clone(),
      layers: layers.iter().map(|l| l.to_string()).collect(),
    });
    version
  }

  pub fn seed_alias(&self, name: &str, alias: &str, version: &str) {
    let mut state = self.lock();
    let record = state.functions.entry(name.to_string()).or_insert_with(|| new_record(name));
    record.aliases.push(AliasInfo {
      name: alias.to_string(),
      function_version: version.to_string(),
    });
  }

  /// Seed a published layer version carrying `description`.
  pub fn seed_layer_version(&self, layer: &str, description: &str) -> LayerVersionInfo {
    let mut state = self.lock();
    push_layer_version(&mut state, layer, Some(description.to_string()))
  }

  /// Statuses reported by successive configuration reads after the next mutation.
  ///
  /// Once the script runs out the function reports `Successful`.
  pub fn script_settle(&self, name: &str, statuses: &[&str]) {
    let mut state = self.lock();
    state
      .settle_scripts
      .insert(name.to_string(), statuses.iter().map(|s| s.to_string()).collect());
  }

  /// Make `op` on `target` fail with a platform error.
  ///
  /// `target` is the function or layer name; version deletes match either the
  /// bare name or `name:version`.
  pub fn fail_on(&self, op: Op, target: &str) {
    let mut state = self.lock();
    state
      .failures
      .insert((op, target.to_string()), format!("injected failure for {}", target));
  }

  pub fn calls(&self) -> Vec<Call> {
    self.lock().calls.clone()
  }

  pub fn clear_calls(&self) {
    self.lock().calls.clear();
  }

  pub fn function_exists(&self, name: &str) -> bool {
    self.lock().functions.contains_key(name)
  }

  /// Published version ids of a function, oldest first (head excluded).
  pub fn version_ids(&self, name: &str) -> Vec<String> {
    self
      .lock()
      .functions
      .get(name)
      .map(|r| r.versions.iter().map(|v| v.version.clone()).collect())
      .unwrap_or_default()
  }

  pub fn layer_version_numbers(&self, layer: &str) -> Vec<u64> {
    self
      .lock()
      .layers
      .get(layer)
      .map(|r| r.versions.iter().map(|v| v.version).collect())
      .unwrap_or_default()
  }

  /// Layers currently attached to the function head.
  pub fn attached_layers(&self, name: &str) -> Vec<String> {
    self
      .lock()
      .functions
      .get(name)
      .map(|r| r.config.layers.iter().map(|l| l.arn.clone()).collect())
      .unwrap_or_default()
  }

  pub fn code_sha256(&self, name: &str) -> Option<String> {
    self.lock().functions.get(name).map(|r| r.code_sha256.clone())
  }
}

fn new_record(name: &str) -> FunctionRecord {
  FunctionRecord {
    config: FunctionConfig {
      function_name: name.to_string(),
      function_arn: Some(function_arn(name)),
      version: Some(HEAD_VERSION.to_string()),
      state: Some("Active".to_string()),
      last_update_status: Some("Successful".to_string()),
      ..Default::default()
    },
    ..Default::default()
  }
}

fn push_layer_version(state: &mut State, layer: &str, description: Option<String>) -> LayerVersionInfo {
  let record = state.layers.entry(layer.to_string()).or_default();
  record.next_version += 1;
  let info = LayerVersionInfo {
    version: record.next_version,
    arn: layer_arn(layer, record.next_version),
    description,
  };
  record.versions.push(info.clone());
  info
}

fn check(state: &State, op: Op, operation: &'static str, targets: &[&str]) -> Result<(), GatewayError> {
  for target in targets {
    if let Some(message) = state.failures.get(&(op, target.to_string())) {
      return Err(GatewayError::Api {
        operation,
        target: target.to_string(),
        status: 500,
        code: "ServiceException".to_string(),
        message: message.clone(),
      });
    }
  }
  Ok(())
}

fn not_found(operation: &'static str, target: &str) -> GatewayError {
  GatewayError::NotFound {
    operation,
    target: target.to_string(),
  }
}

fn begin_settle(state: &mut State, name: &str) {
  state.settling.insert(name.to_string());
  if let Some(record) = state.functions.get_mut(name) {
    record.config.last_update_status = Some("InProgress".to_string());
  }
}

#[async_trait]
impl Gateway for MemoryGateway {
  async fn get_function_config(&self, name: &str) -> Result<Lookup<FunctionConfig>, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::GetFunctionConfig(name.to_string()));
    check(&state, Op::GetFunctionConfig, "get-function-configuration", &[name])?;

    if !state.functions.contains_key(name) {
      return Ok(Lookup::NotFound);
    }

    if state.settling.contains(name) {
      let status = state
        .settle_scripts
        .get_mut(name)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| "Successful".to_string());
      if status == "Successful" || status == "Failed" {
        state.settling.remove(name);
      }
      if let Some(record) = state.functions.get_mut(name) {
        record.config.last_update_status = Some(status);
      }
    }

    Ok(state.functions.get(name).map(|r| r.config.clone()).into())
  }

  async fn create_function(&self, request: &CreateFunctionRequest, code: &[u8]) -> Result<(), GatewayError> {
    let name = request.function_name.as_str();
    let mut state = self.lock();
    state.calls.push(Call::CreateFunction {
      name: name.to_string(),
      layers: request.layers.clone(),
    });
    check(&state, Op::CreateFunction, "create-function", &[name])?;

    if state.functions.contains_key(name) {
      return Err(GatewayError::Api {
        operation: "create-function",
        target: name.to_string(),
        status: 409,
        code: "ResourceConflictException".to_string(),
        message: format!("function already exist: {}", name),
      });
    }

    let mut record = new_record(name);
    record.code_sha256 = hash_bytes(code).0;
    record.config.layers = request.layers.iter().map(|arn| AttachedLayer { arn: arn.clone() }).collect();
    if request.publish {
      record.next_version = 1;
      record.versions.push(FunctionVersion {
        version: "1".to_string(),
        layers: request.layers.clone(),
      });
    }
    state.functions.insert(name.to_string(), record);
    begin_settle(&mut state, name);
    Ok(())
  }

  async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<(), GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::UpdateFunctionCode(name.to_string()));
    check(&state, Op::UpdateFunctionCode, "update-function-code", &[name])?;

    let record = state
      .functions
      .get_mut(name)
      .ok_or_else(|| not_found("update-function-code", name))?;
    record.code_sha256 = hash_bytes(code).0;
    begin_settle(&mut state, name);
    Ok(())
  }

  async fn update_function_config(&self, name: &str, overrides: &FunctionOverrides) -> Result<(), GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::UpdateFunctionConfig {
      name: name.to_string(),
      layers: overrides.layers.clone(),
    });
    check(&state, Op::UpdateFunctionConfig, "update-function-configuration", &[name])?;

    let record = state
      .functions
      .get_mut(name)
      .ok_or_else(|| not_found("update-function-configuration", name))?;
    if let Some(layers) = &overrides.layers {
      record.config.layers = layers.iter().map(|arn| AttachedLayer { arn: arn.clone() }).collect();
    }
    begin_settle(&mut state, name);
    Ok(())
  }

  async fn publish_version(&self, name: &str) -> Result<String, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::PublishVersion(name.to_string()));
    check(&state, Op::PublishVersion, "publish-version", &[name])?;

    let record = state
      .functions
      .get_mut(name)
      .ok_or_else(|| not_found("publish-version", name))?;
    record.next_version += 1;
    let version = record.next_version.to_string();
    let layers = record.config.layers.iter().map(|l| l.arn.clone()).collect();
    record.versions.push(FunctionVersion {
      version: version.clone(),
      layers,
    });
    Ok(version)
  }

  async fn list_versions(&self, name: &str) -> Result<Vec<FunctionVersion>, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::ListVersions(name.to_string()));
    check(&state, Op::ListVersions, "list-versions", &[name])?;

    let record = state.functions.get(name).ok_or_else(|| not_found("list-versions", name))?;
    let head = FunctionVersion {
      version: HEAD_VERSION.to_string(),
      layers: record.config.layers.iter().map(|l| l.arn.clone()).collect(),
    };
    Ok(std::iter::once(head).chain(record.versions.iter().cloned()).collect())
  }

  async fn list_aliases(&self, name: &str) -> Result<Vec<AliasInfo>, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::ListAliases(name.to_string()));
    check(&state, Op::ListAliases, "list-aliases", &[name])?;

    let record = state.functions.get(name).ok_or_else(|| not_found("list-aliases", name))?;
    Ok(record.aliases.clone())
  }

  async fn delete_version(&self, name: &str, version: &str) -> Result<(), GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::DeleteVersion(name.to_string(), version.to_string()));
    let qualified = format!("{}:{}", name, version);
    check(&state, Op::DeleteVersion, "delete-version", &[name, qualified.as_str()])?;

    let record = state
      .functions
      .get_mut(name)
      .ok_or_else(|| not_found("delete-version", &qualified))?;

    if record.aliases.iter().any(|a| a.function_version == version) {
      return Err(GatewayError::Api {
        operation: "delete-version",
        target: qualified,
        status: 409,
        code: "ResourceConflictException".to_string(),
        message: "version is referenced by an alias".to_string(),
      });
    }

    let before = record.versions.len();
    record.versions.retain(|v| v.version != version);
    if record.versions.len() == before {
      return Err(not_found("delete-version", &qualified));
    }
    Ok(())
  }

  async fn latest_layer_version(&self, layer: &str) -> Result<Lookup<LayerVersionInfo>, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::LatestLayerVersion(layer.to_string()));
    check(&state, Op::LatestLayerVersion, "list-layer-versions", &[layer])?;

    Ok(state.layers.get(layer).and_then(|r| r.versions.last().cloned()).into())
  }

  async fn publish_layer_version(
    &self,
    layer: &str,
    fingerprint: &LayerFingerprint,
    _archive: &[u8],
  ) -> Result<LayerVersionInfo, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::PublishLayerVersion(layer.to_string()));
    check(&state, Op::PublishLayerVersion, "publish-layer-version", &[layer])?;

    Ok(push_layer_version(&mut state, layer, Some(fingerprint.0.clone())))
  }

  async fn list_layer_versions(&self, layer: &str) -> Result<Vec<LayerVersionInfo>, GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::ListLayerVersions(layer.to_string()));
    check(&state, Op::ListLayerVersions, "list-layer-versions", &[layer])?;

    Ok(state.layers.get(layer).map(|r| r.versions.clone()).unwrap_or_default())
  }

  async fn delete_layer_version(&self, layer: &str, version: u64) -> Result<(), GatewayError> {
    let mut state = self.lock();
    state.calls.push(Call::DeleteLayerVersion(layer.to_string(), version));
    let qualified = format!("{}:{}", layer, version);
    check(&state, Op::DeleteLayerVersion, "delete-layer-version", &[layer, &qualified])?;

    let record = state
      .layers
      .get_mut(layer)
      .ok_or_else(|| not_found("delete-layer-version", &qualified))?;
    record.versions.retain(|v| v.version != version);
    Ok(())
  }
}
