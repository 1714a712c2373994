//! Environment toggles
//!
//! The `EOM_*` variables override whatever the configuration file says.
//! Lookups go through a caller-supplied function so tests can exercise
//! the overrides without touching the process environment.

use std::path::PathBuf;

use crate::model::{Config, ConnectionMode};

/// Integer toggle; a value greater than zero enables verbose logging
pub const DEBUG_ENV: &str = "EOM_DEBUG";

/// Integer toggle; a value greater than zero requests a private bus connection
pub const PRIVATE_CONN_ENV: &str = "EOM_PRIVATE_CONN";

/// Path of the socket backend's service socket
pub const SOCKET_ENV: &str = "EOM_SOCKET";

/// Apply the `EOM_*` overrides from the process environment
pub fn apply_env(config: &mut Config) {
    apply_env_with(config, |key| std::env::var(key).ok());
}

/// Apply the `EOM_*` overrides using `lookup` to read variables
pub fn apply_env_with<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(DEBUG_ENV) {
        config.logging.debug = is_enabled(&value);
        tracing::debug!("{} = {}", DEBUG_ENV, value);
    }

    if let Some(value) = lookup(PRIVATE_CONN_ENV) {
        config.client.connection = if is_enabled(&value) {
            ConnectionMode::Private
        } else {
            ConnectionMode::Shared
        };
        tracing::debug!("{} = {}", PRIVATE_CONN_ENV, value);
    }

    if let Some(value) = lookup(SOCKET_ENV) {
        if !value.is_empty() {
            config.client.socket_path = Some(PathBuf::from(value));
        }
    }
}

/// Default location of the service socket
///
/// Prefers `$XDG_RUNTIME_DIR/eom.sock`, otherwise falls back to
/// `/tmp/eom-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("eom.sock")
    } else {
        tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
        let uid = nix::unistd::getuid();
        PathBuf::from(format!("/tmp/eom-{}.sock", uid))
    }
}

/// Toggles are integers; anything that does not parse counts as zero
fn is_enabled(value: &str) -> bool {
    value.trim().parse::<i64>().map(|v| v > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_no_variables_leaves_config_untouched() {
        let mut config = Config::default();
        apply_env_with(&mut config, lookup_from(&[]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_debug_toggle() {
        let mut config = Config::default();
        apply_env_with(&mut config, lookup_from(&[(DEBUG_ENV, "1")]));
        assert!(config.logging.debug);

        apply_env_with(&mut config, lookup_from(&[(DEBUG_ENV, "0")]));
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_non_numeric_toggle_counts_as_off() {
        let mut config = Config::default();
        config.logging.debug = true;
        apply_env_with(&mut config, lookup_from(&[(DEBUG_ENV, "yes")]));
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_private_connection_toggle() {
        let mut config = Config::default();
        apply_env_with(&mut config, lookup_from(&[(PRIVATE_CONN_ENV, "2")]));
        assert_eq!(config.client.connection, ConnectionMode::Private);

        apply_env_with(&mut config, lookup_from(&[(PRIVATE_CONN_ENV, "-1")]));
        assert_eq!(config.client.connection, ConnectionMode::Shared);
    }

    #[test]
    fn test_socket_override() {
        let mut config = Config::default();
        apply_env_with(&mut config, lookup_from(&[(SOCKET_ENV, "/run/user/1000/eom.sock")]));
        assert_eq!(
            config.client.socket_path,
            Some(PathBuf::from("/run/user/1000/eom.sock"))
        );
    }

    #[test]
    fn test_empty_socket_override_is_ignored() {
        let mut config = Config::default();
        config.client.socket_path = Some(PathBuf::from("/from/file.sock"));
        apply_env_with(&mut config, lookup_from(&[(SOCKET_ENV, "")]));
        assert_eq!(config.client.socket_path, Some(PathBuf::from("/from/file.sock")));
    }
}
