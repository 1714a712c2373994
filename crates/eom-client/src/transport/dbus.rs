//! System message bus backend
//!
//! Calls go to `org.eom.server` at `/org/eom/path` on `org.eom.interface`.
//! The client claims the well-known name `org.eom.client<pid>` and listens
//! for every message on the service interface.
//!
//! In shared mode all sessions in the process reuse one system bus
//! connection, and with it one claim on the client name: the name is only
//! released when the last session holding it disconnects. In private mode
//! each session opens its own connection and owns its claim outright.

use async_trait::async_trait;
use eom_config::ConnectionMode;
use futures::StreamExt;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::fdo::{RequestNameFlags, RequestNameReply};
use zbus::zvariant::{self, Structure, StructureBuilder};
use zbus::{Connection, MatchRule, Message, MessageStream};

use super::{EventSender, Transport, TransportEvent};
use crate::error::TransportError;
use crate::value::Value;

pub const SERVICE_NAME: &str = "org.eom.server";
pub const OBJECT_PATH: &str = "/org/eom/path";
pub const INTERFACE: &str = "org.eom.interface";
pub const CLIENT_NAME_PREFIX: &str = "org.eom.client";

static SHARED_CONNECTION: OnceCell<Connection> = OnceCell::const_new();

/// Sessions holding each client name on the shared connection
static SHARED_CLAIMS: Mutex<NameClaims> = Mutex::const_new(NameClaims::new());

#[derive(Debug)]
struct NameClaims {
    holders: Vec<(String, usize)>,
}

impl NameClaims {
    const fn new() -> Self {
        Self {
            holders: Vec::new(),
        }
    }

    fn is_held(&self, name: &str) -> bool {
        self.holders.iter().any(|(held, _)| held == name)
    }

    fn hold(&mut self, name: &str) {
        match self.holders.iter_mut().find(|(held, _)| held == name) {
            Some((_, count)) => *count += 1,
            None => self.holders.push((name.to_string(), 1)),
        }
    }

    /// Drop one hold on `name`; returns whether it was the last one
    fn release(&mut self, name: &str) -> bool {
        let Some(index) = self.holders.iter().position(|(held, _)| held == name) else {
            return false;
        };
        let count = &mut self.holders[index].1;
        *count -= 1;
        if *count == 0 {
            self.holders.swap_remove(index);
            true
        } else {
            false
        }
    }
}

pub struct DbusTransport {
    mode: ConnectionMode,
    name: String,
    connection: Option<Connection>,
    reader: Option<JoinHandle<()>>,
}

impl DbusTransport {
    pub fn new(mode: ConnectionMode, pid: u32) -> Self {
        Self {
            mode,
            name: format!("{}{}", CLIENT_NAME_PREFIX, pid),
            connection: None,
            reader: None,
        }
    }

    async fn bus(&self) -> Result<Connection, zbus::Error> {
        match self.mode {
            ConnectionMode::Shared => SHARED_CONNECTION
                .get_or_try_init(Connection::system)
                .await
                .cloned(),
            ConnectionMode::Private => Connection::system().await,
        }
    }

    async fn claim_name(&self, connection: &Connection) -> Result<(), TransportError> {
        match self.mode {
            ConnectionMode::Private => self.request_name(connection).await,
            ConnectionMode::Shared => {
                let mut claims = SHARED_CLAIMS.lock().await;
                if !claims.is_held(&self.name) {
                    self.request_name(connection).await?;
                }
                claims.hold(&self.name);
                Ok(())
            }
        }
    }

    async fn release_claim(&self, connection: &Connection) {
        match self.mode {
            ConnectionMode::Private => self.release_name(connection).await,
            ConnectionMode::Shared => {
                let mut claims = SHARED_CLAIMS.lock().await;
                if claims.release(&self.name) {
                    self.release_name(connection).await;
                } else {
                    debug!(name = %self.name, "Bus name still held by another session");
                }
            }
        }
    }

    async fn request_name(&self, connection: &Connection) -> Result<(), TransportError> {
        let reply = connection
            .request_name_with_flags(self.name.as_str(), RequestNameFlags::ReplaceExisting.into())
            .await?;

        match reply {
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => Ok(()),
            other => {
                debug!(name = %self.name, "Bus name request answered {:?}", other);
                self.release_name(connection).await;
                Err(TransportError::NameConflict {
                    name: self.name.clone(),
                })
            }
        }
    }

    async fn release_name(&self, connection: &Connection) {
        if let Err(e) = connection.release_name(self.name.as_str()).await {
            debug!(name = %self.name, "Failed to release bus name: {}", e);
        }
    }
}

#[async_trait]
impl Transport for DbusTransport {
    fn name(&self) -> &'static str {
        "dbus"
    }

    async fn connect(&mut self, events: EventSender) -> Result<(), TransportError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let connection = self.bus().await?;
        self.claim_name(&connection).await?;

        let stream = match subscribe(&connection).await {
            Ok(stream) => stream,
            Err(e) => {
                self.release_claim(&connection).await;
                return Err(e);
            }
        };

        self.reader = Some(tokio::spawn(read_pushes(stream, events)));
        self.connection = Some(connection);

        debug!(name = %self.name, mode = ?self.mode, "Registered on the system bus");
        Ok(())
    }

    async fn disconnect(&mut self) {
        // Dropping the stream removes the match rule
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(connection) = self.connection.take() {
            self.release_claim(&connection).await;
        }
    }

    async fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, TransportError> {
        let connection = self.connection.as_ref().ok_or(TransportError::NotConnected)?;

        let reply = if args.is_empty() {
            connection
                .call_method(Some(SERVICE_NAME), OBJECT_PATH, Some(INTERFACE), method, &())
                .await?
        } else {
            connection
                .call_method(
                    Some(SERVICE_NAME),
                    OBJECT_PATH,
                    Some(INTERFACE),
                    method,
                    &encode_args(args),
                )
                .await?
        };

        decode_body(&reply)
    }
}

async fn subscribe(connection: &Connection) -> Result<MessageStream, TransportError> {
    let rule = MatchRule::builder().interface(INTERFACE)?.build();
    Ok(MessageStream::for_match_rule(rule, connection, None).await?)
}

/// Reader task: forwards every message on the service interface as a push
async fn read_pushes(mut stream: MessageStream, events: EventSender) {
    while let Some(next) = stream.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                warn!("Error on bus message stream: {}", e);
                continue;
            }
        };

        let header = message.header();
        let Some(member) = header.member() else {
            continue;
        };
        let method = member.to_string();

        match decode_body(&message) {
            Ok(args) => {
                if events.send(TransportEvent::Push { method, args }).is_err() {
                    return;
                }
            }
            Err(e) => warn!(method, "Dropping undecodable bus message: {}", e),
        }
    }

    let _ = events.send(TransportEvent::Disconnected);
}

fn encode_args(args: &[Value]) -> Structure<'static> {
    args.iter()
        .fold(StructureBuilder::new(), |builder, arg| match arg {
            Value::Int32(v) => builder.add_field(*v),
            Value::Uint32(v) => builder.add_field(*v),
            Value::String(v) => builder.add_field(v.clone()),
            Value::Bytes(v) => builder.add_field(v.clone()),
        })
        .build()
}

fn decode_body(message: &Message) -> Result<Vec<Value>, TransportError> {
    let has_body = message
        .header()
        .signature()
        .map_or(false, |signature| !signature.as_str().is_empty());
    if !has_body {
        return Ok(Vec::new());
    }

    let body = message.body();
    let structure: Structure<'_> = body.deserialize()?;
    structure.fields().iter().map(from_zvariant).collect()
}

fn from_zvariant(value: &zvariant::Value<'_>) -> Result<Value, TransportError> {
    match value {
        zvariant::Value::I32(v) => Ok(Value::Int32(*v)),
        zvariant::Value::U32(v) => Ok(Value::Uint32(*v)),
        zvariant::Value::Str(v) => Ok(Value::String(v.as_str().to_string())),
        _ => Err(TransportError::Protocol(
            "unsupported argument type in bus message".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name_includes_pid() {
        let transport = DbusTransport::new(ConnectionMode::Private, 4242);
        assert_eq!(transport.name, "org.eom.client4242");
    }

    #[test]
    fn test_shared_name_released_by_last_holder() {
        let mut claims = NameClaims::new();
        let name = "org.eom.client4242";

        claims.hold(name);
        claims.hold(name);
        assert!(claims.is_held(name));

        assert!(!claims.release(name));
        assert!(claims.is_held(name));
        assert!(claims.release(name));
        assert!(!claims.is_held(name));
        assert!(!claims.release(name));
    }

    #[test]
    fn test_name_claims_are_per_name() {
        let mut claims = NameClaims::new();
        claims.hold("org.eom.client1");
        claims.hold("org.eom.client2");

        assert!(claims.release("org.eom.client1"));
        assert!(claims.is_held("org.eom.client2"));
    }

    #[test]
    fn test_encode_args_keeps_order() {
        let structure = encode_args(&[Value::Int32(5), Value::Uint32(9), Value::from("x")]);
        let fields = structure.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(from_zvariant(&fields[0]).unwrap(), Value::Int32(5));
        assert_eq!(from_zvariant(&fields[1]).unwrap(), Value::Uint32(9));
        assert_eq!(from_zvariant(&fields[2]).unwrap(), Value::from("x"));
    }

    #[tokio::test]
    async fn test_call_without_connection_fails() {
        let mut transport = DbusTransport::new(ConnectionMode::Private, 1);
        let err = transport.call("GetOutputIDs", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
