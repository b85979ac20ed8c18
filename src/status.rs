//! Status reporting surface.
//!
//! The supervisor publishes one of a handful of coarse states plus a human-readable
//! detail. Sinks decide what to do with it: log it, persist it, or both.
use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{info, warn};

use crate::constants::STATUS_FILE_NAME;

/// Externally visible lifecycle state of the provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ProviderStatus {
    /// Supervision disabled.
    Inactive,
    /// Configuration problem, failed launch or lost connection.
    Error,
    /// Launch in progress.
    Starting,
    /// Provider process exists, not (yet) answering.
    Started,
    /// Provider answered: connected and healthy.
    Nmea,
}

/// Receives status transitions.
pub trait StatusReporter: Send {
    fn report(&mut self, status: ProviderStatus, detail: &str);
}

/// Logs each status change.
///
/// Always at info level: failures are logged at error level by whoever detects them,
/// once per episode.
#[derive(Debug, Default)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&mut self, status: ProviderStatus, detail: &str) {
        info!("status {status}: {detail}");
    }
}

/// Contents of the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: ProviderStatus,
    pub detail: String,
    /// Pid of the supervisor that wrote the record.
    pub pid: u32,
    pub updated_at: DateTime<Utc>,
}

/// Persists the latest status as JSON so other tools can read it.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Status file living in the provider's config directory.
    pub fn in_dir(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(STATUS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `record` through a temp file and a rename.
    pub fn write(&self, record: &StatusRecord) -> std::io::Result<()> {
        let payload = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)
    }

    /// Reads the last written record, if any.
    pub fn read(&self) -> std::io::Result<Option<StatusRecord>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl StatusReporter for StatusFile {
    fn report(&mut self, status: ProviderStatus, detail: &str) {
        let record = StatusRecord {
            status,
            detail: detail.to_string(),
            pid: std::process::id(),
            updated_at: Utc::now(),
        };
        if let Err(err) = self.write(&record) {
            warn!("unable to write status file {}: {err}", self.path.display());
        }
    }
}

/// Forwards every report to each inner reporter.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn StatusReporter>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl StatusReporter + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl StatusReporter for FanOut {
    fn report(&mut self, status: ProviderStatus, detail: &str) {
        for sink in &mut self.sinks {
            sink.report(status, detail);
        }
    }
}
