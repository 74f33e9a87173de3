use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{Error, Result};

/// Configs carry private keys.
const CONFIG_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o755;

/// Persists rendered configuration at paths derived from the settings.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    conf_dir: PathBuf,
    clients_dir: PathBuf,
    interface: String,
}

/// Outcome of a directory-wide peer config removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "removed {} peer config(s), {} failure(s)",
            self.removed.len(),
            self.failed.len()
        );
        for (path, reason) in &self.failed {
            text.push_str(&format!("\n  {}: {reason}", path.display()));
        }
        text
    }
}

impl ConfigWriter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            conf_dir: settings.conf_dir.clone(),
            clients_dir: settings.clients_dir.clone(),
            interface: settings.interface.clone(),
        }
    }

    pub fn server_config_path(&self) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", self.interface))
    }

    pub fn peer_config_path(&self, peer_id: &Uuid) -> PathBuf {
        self.clients_dir.join(format!("{peer_id}.conf"))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.conf_dir, &self.clients_dir] {
            match fs::DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(dir)
            {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(err) => return Err(Error::filesystem(dir, err)),
            }
        }
        Ok(())
    }

    pub fn write_server_config(&self, text: &str) -> Result<PathBuf> {
        self.ensure_directories()?;
        let path = self.server_config_path();
        write_atomic(&path, text.as_bytes())?;
        tracing::info!(path = %path.display(), "server config written");
        Ok(path)
    }

    pub fn write_peer_config(&self, peer_id: &Uuid, text: &str) -> Result<PathBuf> {
        self.ensure_directories()?;
        let path = self.peer_config_path(peer_id);
        write_atomic(&path, text.as_bytes())?;
        tracing::debug!(peer = %peer_id, path = %path.display(), "peer config written");
        Ok(path)
    }

    /// Returns whether a file was actually removed.
    pub fn remove_peer_config(&self, peer_id: &Uuid) -> Result<bool> {
        let path = self.peer_config_path(peer_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::filesystem(path, err)),
        }
    }

    /// Removes every file in the peer directory, recording what could not be removed.
    pub fn clear_peer_configs(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let entries = match fs::read_dir(&self.clients_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return report,
            Err(err) => {
                report.failed.push((self.clients_dir.clone(), err.to_string()));
                return report;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report.failed.push((self.clients_dir.clone(), err.to_string()));
                    continue;
                }
            };
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => report.removed.push(path),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => report.failed.push((path, err.to_string())),
            }
        }
        report
    }

    /// `*.conf` files currently in the peer directory, sorted.
    pub fn list_peer_configs(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.clients_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::Io {
                    path: self.clients_dir.clone(),
                    source: err,
                });
            }
        };
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| Error::Io {
                    path: self.clients_dir.clone(),
                    source,
                })?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "conf") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Writes to a sibling temp file and renames it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(CONFIG_MODE)
        .open(&tmp)
        .map_err(|err| Error::filesystem(&tmp, err))?;
    let written = file
        .write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|err| Error::filesystem(&tmp, err));
    drop(file);
    let result =
        written.and_then(|()| fs::rename(&tmp, path).map_err(|err| Error::filesystem(path, err)));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Digest of the file at `path`, or `None` if it does not exist.
pub fn digest_file(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(digest(&bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(Error::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
