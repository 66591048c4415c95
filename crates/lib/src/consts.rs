use std::time::Duration;

pub const APP_NAME: &str = "fnship";

/// Default deploy document, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "deploy.yml";

/// Package manifest whose `dependencies` become the shared layer.
pub const PACKAGE_MANIFEST: &str = "package.json";
pub const PACKAGE_LOCK: &str = "package-lock.json";

/// Output directory of the dependency installer. Never shipped in function code.
pub const DEPENDENCY_DIR: &str = "node_modules";

/// Directory inside a layer archive that the runtime adds to its module path.
pub const LAYER_ROOT: &str = "nodejs";

/// Version sentinel for the mutable head of a function.
pub const HEAD_VERSION: &str = "$LATEST";

pub const SETTLE_MAX_ATTEMPTS: u32 = 100;
pub const SETTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a single platform request, including the response body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Page size for platform list calls.
pub const LIST_PAGE_SIZE: u32 = 50;
