//! Builds the provider command line from the resolved configuration.
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing::info;

use crate::{
    config::ResolvedConfig,
    constants::{
        PROVIDER_LOG_FILE, S57_DATA_DIR_NAME, S57_PARENT_SUBDIR, START_SCRIPT, START_SHELL,
    },
    error::ConfigError,
};

fn chart_dir_separator() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r" *, *").expect("separator pattern is valid"))
}

/// Splits the comma separated chart directory list, dropping empty entries.
pub fn split_chart_dirs(raw: &str) -> Vec<PathBuf> {
    chart_dir_separator()
        .split(raw.trim())
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Locates the parent of `s57data`: the configured one, else the copy bundled below the
/// plugin dir.
fn locate_s57_parent(config: &ResolvedConfig) -> Result<PathBuf, ConfigError> {
    let configured = &config.s57_data_dir;
    if configured.is_dir() && configured.join(S57_DATA_DIR_NAME).is_dir() {
        return Ok(configured.clone());
    }

    let fallback = config.plugin_dir.join(S57_PARENT_SUBDIR);
    if fallback.join(S57_DATA_DIR_NAME).is_dir() {
        info!(
            "configured s57data dir {} not found, using internal fallback {}",
            configured.display(),
            fallback.display()
        );
        return Ok(fallback);
    }

    Err(ConfigError::MissingPath {
        what: "S57 data directory (parent, no fallback)",
        path: configured.clone(),
    })
}

/// Builds the provider command line.
///
/// Every path is checked before anything is returned, so a launch either gets a complete
/// command line or none at all. `own_pid` lets the provider notice when we die.
pub fn build_command_line(
    config: &ResolvedConfig,
    own_pid: u32,
) -> Result<Vec<String>, ConfigError> {
    let script = config.plugin_dir.join(START_SCRIPT);
    if !script.exists() {
        return Err(ConfigError::MissingPath {
            what: "provider start script",
            path: script,
        });
    }

    if !config.ocpn_plugin_dir.is_dir() {
        return Err(ConfigError::MissingPath {
            what: "OpenCPN plugin directory",
            path: config.ocpn_plugin_dir.clone(),
        });
    }

    let s57_dir = locate_s57_parent(config)?;

    if !config.config_dir.exists() {
        return Err(ConfigError::MissingPath {
            what: "config directory",
            path: config.config_dir.clone(),
        });
    }

    let chart_dirs = split_chart_dirs(&config.chart_dir);
    if let Some(missing) = chart_dirs.iter().find(|dir| !dir.is_dir()) {
        return Err(ConfigError::MissingPath {
            what: "chart directory",
            path: missing.clone(),
        });
    }

    let log_file = config.config_dir.join(PROVIDER_LOG_FILE);
    let mut command_line = vec![
        START_SHELL.to_string(),
        path_arg(&script),
        "-t".into(),
        config.threads.to_string(),
        "-d".into(),
        config.debug.to_string(),
        "-s".into(),
        config.scale.to_string(),
        "-l".into(),
        path_arg(&log_file),
        "-p".into(),
        own_pid.to_string(),
        "-c".into(),
        config.cache_size.to_string(),
        "-f".into(),
        config.disk_cache_size.to_string(),
        "-r".into(),
        config.prefill_zoom.to_string(),
        "-e".into(),
        path_arg(&config.exe_dir),
    ];
    if let Some(percent) = config.mem_percent {
        command_line.extend(["-x".into(), percent.to_string()]);
    }
    command_line.extend([
        path_arg(&config.ocpn_plugin_dir),
        path_arg(&s57_dir),
        path_arg(&config.config_dir),
        config.port.to_string(),
    ]);
    command_line.extend(chart_dirs.iter().map(|dir| path_arg(dir)));

    Ok(command_line)
}
