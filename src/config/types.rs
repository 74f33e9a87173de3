use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Process-wide settings, built once at startup and handed to each component.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding `<interface>.conf`.
    pub conf_dir: PathBuf,
    /// Directory holding one `<peer-id>.conf` per peer.
    pub clients_dir: PathBuf,
    /// Uplink used for NAT rules. Empty means auto-detect.
    pub external_interface: String,
    pub interface: String,
    /// Tool family: `wg` or `awg`. Selects `<mode> genkey`, `<mode>-quick@`, ...
    pub mode: String,
    pub state_path: PathBuf,
    pub command_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/amnezia/amneziawg"),
            clients_dir: PathBuf::from("/etc/amnezia/amneziawg/clients"),
            external_interface: String::new(),
            interface: "awg0".to_string(),
            mode: "awg".to_string(),
            state_path: PathBuf::from("/var/lib/wg-admin/state.json"),
            command_timeout_secs: 5,
        }
    }
}

impl Settings {
    pub fn server_config_path(&self) -> PathBuf {
        self.conf_dir.join(format!("{}.conf", self.interface))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn external_interface_override(&self) -> Option<&str> {
        Some(self.external_interface.trim()).filter(|name| !name.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        check_token("interface", &self.interface)?;
        check_token("mode", &self.mode)?;
        if self.command_timeout_secs == 0 {
            return Err(Error::Validation(
                "command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "{field} {value:?} must be a single token"
        )));
    }
    Ok(())
}
