use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(eom::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    /// A known option carried a value it cannot take
    #[error("Invalid value for `{option}`: {message}")]
    #[diagnostic(
        code(eom::config::invalid),
        help("see the example configuration in the eom-config crate docs")
    )]
    Invalid { option: String, message: String },

    #[error("Failed to read {}", path.display())]
    #[diagnostic(code(eom::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(option: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            option: option.to_string(),
            message: message.into(),
        }
    }
}
