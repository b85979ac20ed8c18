//! Constants and default values for the provider supervisor.
//!
//! This module centralizes the names, paths and timings shared between the
//! launcher, the ownership checks and the supervision loop.

use std::time::Duration;

// ============================================================================
// Process Names
// ============================================================================

/// Name of the tile provider executable as it appears in the process table.
pub const PROVIDER_EXE_NAME: &str = "AvnavOchartsProvider";

/// Name of the provider's background helper daemon.
/// Stale copies are killed before a fresh launch to free ports and locks.
pub const HELPER_EXE_NAME: &str = "oeserverd";

/// Start script shipped next to the provider, relative to the plugin dir.
pub const START_SCRIPT: &str = "provider.sh";

/// Interpreter used to run the start script.
pub const START_SHELL: &str = "/bin/sh";

// ============================================================================
// Ownership
// ============================================================================

/// Environment key carrying the ownership tag of a provider process.
/// Written at launch and read back from `/proc/<pid>/environ` during discovery.
pub const OWNERSHIP_ENV_KEY: &str = "AVNAV_PROVIDER";

/// Read size used when scanning another process's environment block.
pub const ENVIRON_CHUNK_SIZE: usize = 1024;

// ============================================================================
// File System Constants
// ============================================================================

/// Default configuration file names, tried in order.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["chartsup.yaml", "chartsup.yml"];

/// Name of the provider's own log file inside the config directory.
pub const PROVIDER_LOG_FILE: &str = "provider.log";

/// Name of the status file written into the config directory.
pub const STATUS_FILE_NAME: &str = "provider-status.json";

/// Root used when the bundled plugin is disabled or incomplete.
pub const SYSTEM_ROOT: &str = "/usr";

/// Directory (below a root) holding the OpenCPN plugins.
pub const OCPN_PLUGIN_SUBDIR: &str = "lib/opencpn";

/// Directory (below a root) holding the provider executables.
pub const EXE_SUBDIR: &str = "bin";

/// Parent directory (below a root) of the `s57data` directory.
pub const S57_PARENT_SUBDIR: &str = "share/opencpn";

/// Name of the S57 data directory below its configured parent.
pub const S57_DATA_DIR_NAME: &str = "s57data";

// ============================================================================
// Supervision Timing
// ============================================================================

/// Pause between two health probes, whatever the outcome.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period after a fresh launch before the first probe.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Network
// ============================================================================

/// Path of the provider's chart list / health endpoint.
pub const LIST_ENDPOINT: &str = "/list";

/// Loopback spellings rewritten to the consumer's host address.
pub const LOOPBACK_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Builds the probe URL for a provider listening on `port`.
pub fn list_url(port: u16) -> String {
    format!("http://localhost:{port}{LIST_ENDPOINT}")
}

/// Builds the user-facing web URL; `$HOST` is substituted by the consumer.
pub fn user_app_url(port: u16) -> String {
    format!("http://$HOST:{port}/static/index.html")
}
