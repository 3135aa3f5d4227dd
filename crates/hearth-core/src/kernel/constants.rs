/// Application name
pub const APP_NAME: &str = "hearth";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable carrying the plugin name into its process
pub const ENV_PLUGIN_NAME: &str = "HEARTH_PLUGIN";

/// Environment variable carrying the plugin's private subject prefix
pub const ENV_SUBJECT_PREFIX: &str = "HEARTH_SUBJECT_PREFIX";

/// Root token of every per-plugin private subject (`plugin.<name>.*`)
pub const PLUGIN_SUBJECT_ROOT: &str = "plugin";

/// Root token of public command subjects delivered by the router (`command.<name>`)
pub const COMMAND_SUBJECT_ROOT: &str = "command";

/// Prefix of generated request-reply inboxes
pub const INBOX_PREFIX: &str = "_INBOX";

/// Default manifest file extensions, in lookup order
pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// Default health handshake bound
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;

/// Default graceful stop bound
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Default resource sampling tick
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 1_000;

/// Consecutive over-limit samples tolerated before a forced stop
pub const DEFAULT_BREACH_GRACE_TICKS: u32 = 3;

/// Smallest accepted grace window; one over-limit sample is always tolerated
pub const MIN_BREACH_GRACE_TICKS: u32 = 2;

/// Default bound on forwarded request-reply calls
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Gateway requests one plugin may have in flight at once
pub const MAX_INFLIGHT_REQUESTS: usize = 32;

/// Reply inboxes a plugin may hold before the oldest is forgotten
pub const MAX_HANDED_INBOXES: usize = 256;

/// Default number of plugins started concurrently inside one layer
pub const DEFAULT_MAX_PARALLEL_STARTS: usize = 8;

/// Default depth of the manager's command queue
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 64;

/// A run lasting `backoff_base_ms * HEALTHY_RUN_FACTOR` resets the restart counter
pub const HEALTHY_RUN_FACTOR: u32 = 10;
