//! Unix socket backend
//!
//! Speaks newline-delimited JSON to the output service. Each frame is one
//! JSON object on its own line, tagged by `type`:
//!
//! ```text
//! client -> service   {"type":"hello","serial":1,"name":"org.eom.client42","interface":"org.eom.interface"}
//! client -> service   {"type":"call","serial":2,"method":"GetOutputIDs","args":[]}
//! service -> client   {"type":"reply","serial":2,"values":[{"int32":5}]}
//! service -> client   {"type":"error","serial":2,"message":"..."}
//! service -> client   {"type":"push","method":"Notify","args":[...]}
//! ```
//!
//! Replies are matched to calls by serial. A reply whose serial nobody is
//! waiting for (typically one that arrived after the deadline) is dropped.
//! End of stream is reported to the session as a disconnect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{lock, EventSender, Transport, TransportEvent, CLIENT_NAME_PREFIX, INTERFACE};
use crate::error::TransportError;
use crate::value::Value;

// ============================================================================
// Wire frames
// ============================================================================

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Register this peer and subscribe to the service's pushes
    Hello {
        serial: u32,
        name: String,
        interface: String,
    },
    /// Invoke a service method
    Call {
        serial: u32,
        method: String,
        args: Vec<Value>,
    },
}

/// Frames sent by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceFrame {
    Reply { serial: u32, values: Vec<Value> },
    Error { serial: u32, message: String },
    Push { method: String, args: Vec<Value> },
}

// ============================================================================
// Backend
// ============================================================================

type ReplySlot = oneshot::Sender<Result<Vec<Value>, TransportError>>;
type PendingReplies = Arc<Mutex<HashMap<u32, ReplySlot>>>;

pub struct SocketTransport {
    path: PathBuf,
    name: String,
    hello_timeout: Duration,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    pending: PendingReplies,
    next_serial: u32,
}

impl SocketTransport {
    pub fn new(path: PathBuf, pid: u32, hello_timeout: Duration) -> Self {
        Self {
            path,
            name: format!("{}{}", CLIENT_NAME_PREFIX, pid),
            hello_timeout,
            writer: None,
            reader: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_serial: 1,
        }
    }

    fn take_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        serial
    }

    /// Write `frame` and wait for the reply carrying its serial
    async fn exchange(&mut self, serial: u32, frame: &ClientFrame) -> Result<Vec<Value>, TransportError> {
        let (slot, reply) = oneshot::channel();
        lock(&self.pending).insert(serial, slot);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            serial,
        };

        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        write_frame(writer, frame).await?;

        reply.await.map_err(|_| TransportError::NotConnected)?
    }

    async fn handshake(&mut self) -> Result<(), TransportError> {
        let serial = self.take_serial();
        let hello = ClientFrame::Hello {
            serial,
            name: self.name.clone(),
            interface: INTERFACE.to_string(),
        };

        match tokio::time::timeout(self.hello_timeout, self.exchange(serial, &hello)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(TransportError::Remote { message })) => {
                debug!("Service refused registration: {}", message);
                Err(TransportError::NameConflict {
                    name: self.name.clone(),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(self.hello_timeout)),
        }
    }

    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        fail_pending(&self.pending);
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn connect(&mut self, events: EventSender) -> Result<(), TransportError> {
        if self.writer.is_some() {
            return Ok(());
        }

        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|e| TransportError::SocketConnect {
                path: self.path.clone(),
                source: e,
            })?;
        let (read_half, write_half) = stream.into_split();

        self.writer = Some(write_half);
        self.reader = Some(tokio::spawn(read_frames(
            read_half,
            self.pending.clone(),
            events,
        )));

        if let Err(e) = self.handshake().await {
            self.teardown();
            return Err(e);
        }

        debug!(path = %self.path.display(), name = %self.name, "Registered with output service");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.teardown();
    }

    async fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, TransportError> {
        if self.writer.is_none() {
            return Err(TransportError::NotConnected);
        }

        let serial = self.take_serial();
        let frame = ClientFrame::Call {
            serial,
            method: method.to_string(),
            args: args.to_vec(),
        };
        self.exchange(serial, &frame).await
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Removes an abandoned reply slot, e.g. when the caller's deadline expires
struct PendingGuard {
    pending: PendingReplies,
    serial: u32,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.serial);
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &ClientFrame) -> Result<(), TransportError> {
    let mut line = serde_json::to_string(frame).map_err(TransportError::Serialize)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn fail_pending(pending: &PendingReplies) {
    for (_, slot) in lock(pending).drain() {
        let _ = slot.send(Err(TransportError::NotConnected));
    }
}

/// Reader task: completes reply slots and forwards pushes until end of stream
async fn read_frames(read_half: OwnedReadHalf, pending: PendingReplies, events: EventSender) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Output service closed the socket");
                break;
            }
            Err(e) => {
                warn!("Failed to read from output service: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ServiceFrame>(&line) {
            Ok(ServiceFrame::Reply { serial, values }) => complete(&pending, serial, Ok(values)),
            Ok(ServiceFrame::Error { serial, message }) => {
                complete(&pending, serial, Err(TransportError::Remote { message }))
            }
            Ok(ServiceFrame::Push { method, args }) => {
                if events.send(TransportEvent::Push { method, args }).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Discarding malformed frame from output service: {}", e),
        }
    }

    fail_pending(&pending);
    let _ = events.send(TransportEvent::Disconnected);
}

fn complete(pending: &PendingReplies, serial: u32, result: Result<Vec<Value>, TransportError>) {
    match lock(pending).remove(&serial) {
        Some(slot) => {
            let _ = slot.send(result);
        }
        None => debug!(serial, "Dropping reply nobody is waiting for"),
    }
}
