use crate::config::types::Settings;
use anyhow::Result;

/// Applies `WG_*` overrides. `lookup` is `std::env::var` in production.
pub(super) fn apply_env_overrides<F>(cfg: &mut Settings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env_string = |key: &str| lookup(key).filter(|val| !val.is_empty());

    if let Some(dir) = env_string("WG_CONF_DIR") {
        cfg.conf_dir = dir.into();
    }
    if let Some(dir) = env_string("WG_CLIENTS_DIR") {
        cfg.clients_dir = dir.into();
    }
    if let Some(name) = env_string("WG_EXTERNAL_IF") {
        cfg.external_interface = name;
    }
    if let Some(name) = env_string("WG_INTERFACE") {
        cfg.interface = name;
    }
    if let Some(mode) = env_string("WG_MODE") {
        cfg.mode = mode;
    }
    if let Some(path) = env_string("WG_STATE_PATH") {
        cfg.state_path = path.into();
    }
    if let Some(secs) = env_string("WG_COMMAND_TIMEOUT_SECS") {
        cfg.command_timeout_secs = secs
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("WG_COMMAND_TIMEOUT_SECS must be an integer, got {secs:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut cfg = Settings::default();
        apply_env_overrides(
            &mut cfg,
            lookup(&[
                ("WG_CONF_DIR", "/etc/wireguard"),
                ("WG_CLIENTS_DIR", "/etc/wireguard/clients"),
                ("WG_INTERFACE", "wg0"),
                ("WG_MODE", "wg"),
                ("WG_EXTERNAL_IF", "ens3"),
                ("WG_COMMAND_TIMEOUT_SECS", "10"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.conf_dir, PathBuf::from("/etc/wireguard"));
        assert_eq!(cfg.clients_dir, PathBuf::from("/etc/wireguard/clients"));
        assert_eq!(cfg.server_config_path(), PathBuf::from("/etc/wireguard/wg0.conf"));
        assert_eq!(cfg.mode, "wg");
        assert_eq!(cfg.external_interface_override(), Some("ens3"));
        assert_eq!(cfg.command_timeout_secs, 10);
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut cfg = Settings::default();
        apply_env_overrides(&mut cfg, lookup(&[("WG_INTERFACE", ""), ("WG_EXTERNAL_IF", "")]))
            .unwrap();
        assert_eq!(cfg, Settings::default());
        assert_eq!(cfg.external_interface_override(), None);
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let mut cfg = Settings::default();
        assert!(
            apply_env_overrides(&mut cfg, lookup(&[("WG_COMMAND_TIMEOUT_SECS", "soon")])).is_err()
        );
    }
}
