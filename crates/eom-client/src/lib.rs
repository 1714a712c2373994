//! Client runtime for the external output manager (EOM) service
//!
//! This crate lets an application discover external outputs (HDMI, virtual
//! displays and so on) managed by a separate service, control how they are
//! used, and be told when they change.
//!
//! ## Architecture
//!
//! - `EomClient`: public handle; control calls, registry reads, callbacks
//! - `transport`: session to the service over the system bus or a Unix socket
//! - `registry`: local cache of known outputs
//! - `dispatcher`: subscriber list, invoked without the state lock held
//! - `reconciler`: applies `Notify` pushes to the registry
//!
//! ## Protocol
//!
//! Every remote operation takes and returns flat int32 arrays; see
//! [`protocol`] for the method names and payload layouts.

mod client;
mod dispatcher;
mod error;
mod lifecycle;
mod reconciler;
mod registry;
mod types;
mod value;
mod window;

pub mod protocol;
pub mod transport;

pub use client::{ClientConfig, EomClient};
pub use dispatcher::{callback, NotifyCallback, UserData};
pub use error::{EomError, TransportError};
pub use types::{
    AttributeState, ConnectorType, NotifyCategory, OutputAttribute, OutputId, OutputMode,
    OutputRecord, PhysicalSize, Resolution,
};
pub use value::{display_values, Value};
pub use window::{NativeWindow, RawWindow};
