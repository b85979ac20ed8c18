//! Ownership tags and lookups in other processes' environment blocks.
use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
};

use tracing::{debug, warn};

use crate::constants::{ENVIRON_CHUNK_SIZE, OWNERSHIP_ENV_KEY};

/// Identifies the provider belonging to one (machine, config directory) pair.
///
/// The tag is deterministic so a provider that outlives a supervisor restart is still
/// recognised as ours.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnershipTag(String);

impl OwnershipTag {
    /// Builds the tag from an explicit host identifier.
    pub fn new(host: &str, config_dir: &Path) -> Self {
        Self(format!("{host}:{}", config_dir.display()))
    }

    /// Builds the tag for this machine.
    pub fn for_config_dir(config_dir: &Path) -> Self {
        let host = match nix::unistd::gethostname() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(err) => {
                warn!("unable to determine host name, using localhost: {err}");
                "localhost".to_string()
            }
        };
        Self::new(&host, config_dir)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnershipTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the value of `key` if `entry` is a `KEY=VALUE` pair for it.
fn match_entry(entry: &[u8], key: &str) -> Option<String> {
    let eq = entry.iter().position(|b| *b == b'=')?;
    if &entry[..eq] != key.as_bytes() {
        return None;
    }
    Some(String::from_utf8_lossy(&entry[eq + 1..]).into_owned())
}

/// Scans a NUL separated `KEY=VALUE` stream for `key`, reading `chunk_size` bytes at a
/// time.
///
/// An entry cut by a chunk boundary is carried over and completed by the next read, so a
/// split key or value is never seen in halves. Scanning stops at the first match.
pub fn find_env_value<R: Read>(
    mut reader: R,
    key: &str,
    chunk_size: usize,
) -> io::Result<Option<String>> {
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        pending.extend_from_slice(&chunk[..read]);

        let mut consumed = 0;
        while let Some(offset) = pending[consumed..].iter().position(|b| *b == 0) {
            let entry = &pending[consumed..consumed + offset];
            if let Some(value) = match_entry(entry, key) {
                return Ok(Some(value));
            }
            consumed += offset + 1;
        }
        pending.drain(..consumed);
    }

    // Unterminated last entry.
    Ok(match_entry(&pending, key))
}

/// Reads the ownership tag from the environment of `pid`.
///
/// Any failure (process gone, permission denied, no procfs) means "unknown" and yields
/// `None`; processes exiting while we look at them are routine.
pub fn resolve_tag(pid: u32) -> Option<String> {
    let path = format!("/proc/{pid}/environ");
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            debug!("unable to read env for pid {pid}: {err}");
            return None;
        }
    };

    match find_env_value(file, OWNERSHIP_ENV_KEY, ENVIRON_CHUNK_SIZE) {
        Ok(value) => value,
        Err(err) => {
            debug!("unable to read env for pid {pid}: {err}");
            None
        }
    }
}
