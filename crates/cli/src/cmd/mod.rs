mod deploy;
mod fingerprint;
mod plan;
mod prune;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use fnship_lib::apply::NpmInstaller;
use fnship_lib::consts::REQUEST_TIMEOUT;
use fnship_lib::gateway::{Credentials, Gateway, LambdaGateway, LambdaGatewayConfig};
use fnship_lib::{DeployConfig, Reconciler};

use crate::RemoteArgs;

pub use deploy::cmd_deploy;
pub use fingerprint::cmd_fingerprint;
pub use plan::cmd_plan;
pub use prune::cmd_prune;

fn load_config(path: &Path) -> Result<DeployConfig> {
  DeployConfig::load(path).with_context(|| format!("Failed to load deploy config: {}", path.display()))
}

fn credentials(remote: &RemoteArgs) -> Result<Credentials> {
  match (&remote.access_key_id, &remote.secret_access_key) {
    (Some(id), Some(secret)) => {
      let mut credentials = Credentials::new(id, secret);
      credentials.session_token = std::env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty());
      Ok(credentials)
    }
    (None, None) => Credentials::from_env().context(
      "No credentials: pass --access-key-id and --secret-access-key or set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
    ),
    _ => bail!("--access-key-id and --secret-access-key must be given together"),
  }
}

fn connect(remote: &RemoteArgs) -> Result<Arc<dyn Gateway>> {
  let region = remote
    .region
    .clone()
    .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok().filter(|r| !r.is_empty()));
  let Some(region) = region else {
    bail!("No region: pass --region or set AWS_REGION");
  };

  let gateway = LambdaGateway::new(LambdaGatewayConfig {
    region,
    endpoint: remote.endpoint.clone(),
    credentials: credentials(remote)?,
    request_timeout: REQUEST_TIMEOUT,
  })
  .context("Failed to configure platform client")?;

  Ok(Arc::new(gateway))
}

fn reconciler(remote: &RemoteArgs) -> Result<Reconciler> {
  Ok(Reconciler::new(connect(remote)?, Arc::new(NpmInstaller::default())))
}
