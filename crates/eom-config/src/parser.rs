//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so we need to extract offset/len manually
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "client" => {
                config.client = parse_client(node)?;
            }
            "logging" => {
                config.logging = parse_logging(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_client(node: &kdl::KdlNode) -> Result<ClientSection, ConfigError> {
    let mut client = ClientSection::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "transport" => {
                    if let Some(val) = first_string(child) {
                        client.transport = val
                            .parse()
                            .map_err(|message: String| ConfigError::invalid("transport", message))?;
                    }
                }
                "connection" => {
                    if let Some(val) = first_string(child) {
                        client.connection = val
                            .parse()
                            .map_err(|message: String| ConfigError::invalid("connection", message))?;
                    }
                }
                "socket-path" => {
                    if let Some(val) = first_string(child) {
                        client.socket_path = Some(shellexpand::tilde(val).into_owned().into());
                    }
                }
                "reply-timeout-ms" => {
                    let value = child.entries().first().and_then(|e| e.value().as_i64());
                    match value {
                        Some(ms) if ms > 0 => client.reply_timeout_ms = ms as u64,
                        _ => {
                            return Err(ConfigError::invalid(
                                "reply-timeout-ms",
                                "expected a positive number of milliseconds",
                            ))
                        }
                    }
                }
                name => {
                    tracing::warn!("Unknown client config option: {}", name);
                }
            }
        }
    }

    Ok(client)
}

fn parse_logging(node: &kdl::KdlNode) -> Result<LoggingConfig, ConfigError> {
    let mut logging = LoggingConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "level" => {
                    if let Some(val) = first_string(child) {
                        logging.level = val
                            .parse()
                            .map_err(|message: String| ConfigError::invalid("level", message))?;
                    }
                }
                "debug" => {
                    logging.debug = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_bool())
                        .ok_or_else(|| ConfigError::invalid("debug", "expected true or false"))?;
                }
                name => {
                    tracing::warn!("Unknown logging config option: {}", name);
                }
            }
        }
    }

    Ok(logging)
}

fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries().first().and_then(|e| e.value().as_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.client.transport, TransportKind::Dbus);
        assert_eq!(config.client.connection, ConnectionMode::Shared);
        assert_eq!(config.client.reply_timeout_ms, DEFAULT_REPLY_TIMEOUT_MS);
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_full_config() {
        let kdl = r#"
client {
    transport "socket"
    connection "private"
    socket-path "/run/eom/service.sock"
    reply-timeout-ms 250
}
logging {
    level "debug"
    debug true
}
"#;
        let config = parse_config_str(kdl).unwrap();
        assert_eq!(config.client.transport, TransportKind::Socket);
        assert_eq!(config.client.connection, ConnectionMode::Private);
        assert_eq!(
            config.client.socket_path,
            Some(PathBuf::from("/run/eom/service.sock"))
        );
        assert_eq!(config.client.reply_timeout_ms, 250);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.logging.debug);
    }

    #[test]
    fn test_unknown_transport_is_invalid() {
        let kdl = r#"client { transport "carrier-pigeon"; }"#;
        let err = parse_config_str(kdl).unwrap_err();
        match err {
            ConfigError::Invalid { option, message } => {
                assert_eq!(option, "transport");
                assert!(message.contains("carrier-pigeon"));
            }
            other => panic!("Expected Invalid error, got: {:?}", other),
        }
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let kdl = r#"client { reply-timeout-ms 0; }"#;
        assert!(matches!(
            parse_config_str(kdl),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_nodes_are_ignored() {
        let kdl = r#"
compositor "weston"
client {
    flavour "vanilla"
    transport "dbus"
}
"#;
        let config = parse_config_str(kdl).unwrap();
        assert_eq!(config.client.transport, TransportKind::Dbus);
    }

    #[test]
    fn test_malformed_kdl_reports_parse_error() {
        let err = parse_config_str("client {").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.kdl");

        match parse_config(&path).unwrap_err() {
            ConfigError::Read { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("Expected Read error, got: {:?}", other),
        }
    }
}
