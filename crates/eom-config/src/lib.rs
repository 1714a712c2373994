//! Configuration for the external output manager client
//!
//! This crate handles parsing KDL configuration files and applying the
//! `EOM_*` environment toggles on top of them.
//!
//! ```kdl
//! client {
//!     transport "dbus"          // "dbus" | "socket"
//!     connection "shared"       // "shared" | "private"
//!     socket-path "~/.cache/eom.sock"
//!     reply-timeout-ms 1000
//! }
//! logging {
//!     level "warn"
//!     debug false
//! }
//! ```
//!
//! Every node is optional. Unknown nodes are logged and skipped.

mod env;
mod error;
mod model;
mod parser;

pub use env::{apply_env, apply_env_with, default_socket_path, DEBUG_ENV, PRIVATE_CONN_ENV, SOCKET_ENV};
pub use error::ConfigError;
pub use model::*;
pub use parser::{parse_config, parse_config_str};
