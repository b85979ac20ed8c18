//! Configuration management for chartsup.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};
use strum_macros::{AsRefStr, EnumString};
use tracing::{error, info};

use crate::constants::{
    DEFAULT_CONFIG_FILES, DEFAULT_POLL_INTERVAL, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_SETTLE_DELAY, EXE_SUBDIR, OCPN_PLUGIN_SUBDIR, S57_PARENT_SUBDIR,
    SYSTEM_ROOT,
};
use crate::error::ConfigError;

/// Which facility is used to enumerate provider processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessListerKind {
    /// `ps -o pid,uid --no-headers -C <exe>` (procps).
    #[default]
    Ps,
    /// In-process enumeration through `sysinfo`.
    Sysinfo,
}

/// Represents the structure of the configuration file.
///
/// Every key is optional; missing keys take the defaults of the provider plugin.
/// Path-valued keys may contain `$DATADIR` and `$PLUGINDIR`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Set to false to leave the provider alone entirely.
    pub enabled: bool,
    /// Listener port of the provider.
    pub port: u16,
    /// Prefer the plugin tree installed below `plugin_dir` over `/usr`.
    pub internal_plugin: bool,
    /// Value substituted for `$DATADIR`.
    pub data_dir: Option<String>,
    /// Install root of the provider; value substituted for `$PLUGINDIR`.
    pub plugin_dir: Option<String>,
    /// Directory for the provider's cfg files and logs.
    pub config_dir: String,
    /// Directory for OpenCPN plugins.
    pub ocpn_plugin_dir: String,
    /// Directory containing the provider executables.
    pub exe_dir: String,
    /// Parent directory of `s57data`.
    pub s57_data_dir: String,
    /// Number of provider threads.
    pub threads: u32,
    /// Debug level passed to the provider.
    pub debug: u32,
    /// Comma separated list of chart directories.
    pub chart_dir: String,
    /// Render scale.
    pub scale: u32,
    /// Number of tiles kept in memory.
    pub cache_size: u64,
    /// Number of tiles kept on disk per chart set.
    pub disk_cache_size: u64,
    /// Max zoom level for cache prefill.
    pub prefill_zoom: u32,
    /// Percent of system memory the provider may use.
    pub mem_percent: Option<u32>,
    /// Pause between health probes.
    pub poll_interval: String,
    /// Timeout for a single health probe.
    pub probe_timeout: String,
    /// Delay between a fresh launch and the first probe.
    pub settle_delay: String,
    /// Process enumeration backend.
    pub process_lister: ProcessListerKind,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8082,
            internal_plugin: true,
            data_dir: None,
            plugin_dir: None,
            config_dir: "$DATADIR/ocharts".into(),
            ocpn_plugin_dir: String::new(),
            exe_dir: String::new(),
            s57_data_dir: String::new(),
            threads: 5,
            debug: 1,
            chart_dir: String::new(),
            scale: 2,
            cache_size: 10_000,
            disk_cache_size: 400_000,
            prefill_zoom: 17,
            mem_percent: None,
            poll_interval: "1s".into(),
            probe_timeout: "10s".into(),
            settle_delay: "5s".into(),
            process_lister: ProcessListerKind::Ps,
        }
    }
}

/// Supervision cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Configuration with placeholders expanded and mandatory directories located.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub port: u16,
    /// Install root holding the start script and the bundled fallback data.
    pub plugin_dir: PathBuf,
    pub config_dir: PathBuf,
    pub ocpn_plugin_dir: PathBuf,
    pub exe_dir: PathBuf,
    pub s57_data_dir: PathBuf,
    /// Raw comma separated chart directory list, validated by the launch planner.
    pub chart_dir: String,
    pub threads: u32,
    pub debug: u32,
    pub scale: u32,
    pub cache_size: u64,
    pub disk_cache_size: u64,
    pub prefill_zoom: u32,
    pub mem_percent: Option<u32>,
    pub timing: Timing,
    pub process_lister: ProcessListerKind,
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(DATADIR|PLUGINDIR)").expect("placeholder pattern is valid")
    })
}

/// Replaces `$DATADIR` and `$PLUGINDIR` in `input`.
fn expand_placeholders(input: &str, data_dir: &str, plugin_dir: &str) -> String {
    placeholder_pattern()
        .replace_all(input, |caps: &regex::Captures| match &caps[1] {
            "DATADIR" => data_dir.to_string(),
            _ => plugin_dir.to_string(),
        })
        .into_owned()
}

fn default_data_dir() -> String {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));
    home.join(".local/share/chartsup")
        .to_string_lossy()
        .into_owned()
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    let invalid = || ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    };
    if value.is_empty() {
        return Err(invalid());
    }

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Loads and parses the configuration file.
///
/// Without an explicit path, `chartsup.yaml` and then `chartsup.yml` are tried in the
/// working directory. When `plugin_dir` is not set it defaults to the directory holding
/// the configuration file.
pub fn load_config(config_path: Option<&str>) -> Result<ProviderConfig, ConfigError> {
    let config_path = match config_path {
        Some(path) => PathBuf::from(path),
        None => DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0])),
    };

    let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;

    let mut config = parse_config(&content)?;
    if config.plugin_dir.is_none() {
        let parent = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let parent = std::path::absolute(parent).unwrap_or_else(|_| parent.to_path_buf());
        config.plugin_dir = Some(parent.to_string_lossy().into_owned());
    }
    Ok(config)
}

/// Parses configuration YAML. An empty document yields the defaults.
pub fn parse_config(content: &str) -> Result<ProviderConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ProviderConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

impl ProviderConfig {
    /// The provider's config directory with placeholders expanded. Nothing is checked or
    /// created.
    pub fn expanded_config_dir(&self) -> PathBuf {
        let data_dir = self.data_dir.clone().unwrap_or_else(default_data_dir);
        let plugin_dir = self.plugin_dir.clone().unwrap_or_else(|| ".".into());
        PathBuf::from(expand_placeholders(&self.config_dir, &data_dir, &plugin_dir))
    }

    /// Expands placeholders, picks the install root, fills and checks the mandatory
    /// directories and makes sure the config directory exists.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let data_dir = self.data_dir.clone().unwrap_or_else(default_data_dir);
        let plugin_dir = self.plugin_dir.clone().unwrap_or_else(|| ".".into());
        let expand = |value: &str| expand_placeholders(value, &data_dir, &plugin_dir);

        let timing = Timing {
            poll_interval: parse_duration("poll_interval", &self.poll_interval)?,
            probe_timeout: parse_duration("probe_timeout", &self.probe_timeout)?,
            settle_delay: parse_duration("settle_delay", &self.settle_delay)?,
        };

        let plugin_root = PathBuf::from(&plugin_dir);
        let system_root = PathBuf::from(SYSTEM_ROOT);
        let base_dir = if self.internal_plugin {
            if !plugin_root.join(OCPN_PLUGIN_SUBDIR).exists()
                && system_root.join(OCPN_PLUGIN_SUBDIR).exists()
            {
                error!(
                    "internal plugin is set but {} does not exist, using {}",
                    plugin_root.join(OCPN_PLUGIN_SUBDIR).display(),
                    system_root.display()
                );
                system_root
            } else {
                plugin_root.clone()
            }
        } else {
            system_root
        };

        let mandatory = |what: &'static str, configured: &str, default_sub: &str| {
            let expanded = expand(configured);
            let dir = if expanded.trim().is_empty() {
                base_dir.join(default_sub)
            } else {
                PathBuf::from(expanded)
            };
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(ConfigError::MissingPath { what, path: dir })
            }
        };

        let ocpn_plugin_dir = mandatory(
            "OpenCPN plugin directory",
            &self.ocpn_plugin_dir,
            OCPN_PLUGIN_SUBDIR,
        )?;
        let exe_dir = mandatory("provider executable directory", &self.exe_dir, EXE_SUBDIR)?;
        let s57_data_dir = mandatory(
            "S57 data directory (parent)",
            &self.s57_data_dir,
            S57_PARENT_SUBDIR,
        )?;

        let config_dir = self.expanded_config_dir();
        if !config_dir.is_dir() {
            info!("config dir {} does not (yet) exist", config_dir.display());
            fs::create_dir_all(&config_dir).map_err(|source| ConfigError::CreateDir {
                path: config_dir.clone(),
                source,
            })?;
        }

        Ok(ResolvedConfig {
            port: self.port,
            plugin_dir: plugin_root,
            config_dir,
            ocpn_plugin_dir,
            exe_dir,
            s57_data_dir,
            chart_dir: expand(&self.chart_dir),
            threads: self.threads,
            debug: self.debug,
            scale: self.scale,
            cache_size: self.cache_size,
            disk_cache_size: self.disk_cache_size,
            prefill_zoom: self.prefill_zoom,
            mem_percent: self.mem_percent,
            timing,
            process_lister: self.process_lister,
        })
    }
}
