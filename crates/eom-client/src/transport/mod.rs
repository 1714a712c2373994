//! Transport session to the output service
//!
//! A [`TransportSession`] owns one backend connection. It serializes
//! call/reply exchanges, applies the reply deadline, and routes pushes
//! from the service to the handler registered for their method name.
//!
//! ## Architecture
//!
//! ```text
//! +-----------+  TransportEvent  +--------+  by method name  +--------------+
//! | backend   | ---------------> | pump   | ---------------> | push handler |
//! | (reader)  |   mpsc channel   | task   |                  | ("Notify")   |
//! +-----------+                  +--------+                  +--------------+
//! ```
//!
//! Two backends exist: [`DbusTransport`] on the system message bus and
//! [`SocketTransport`] speaking newline-delimited JSON over a Unix socket.
//! Which one a client uses is decided when it is constructed.
//!
//! A `Disconnected` event from the backend closes the session implicitly.
//! Later calls fail with [`TransportError::NotConnected`] until the session
//! is opened again.

mod dbus;
mod socket;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use eom_config::{ConnectionMode, TransportKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::value::{display_values, Value};

pub use dbus::{DbusTransport, CLIENT_NAME_PREFIX, INTERFACE, OBJECT_PATH, SERVICE_NAME};
pub use socket::{ClientFrame, ServiceFrame, SocketTransport};

/// Events a backend delivers to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Unsolicited message from the service
    Push { method: String, args: Vec<Value> },
    /// The peer went away; no further events follow
    Disconnected,
}

/// Sending half handed to a backend when it connects
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Handler invoked with the arguments of a push
pub type PushHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// A connection to the output service
///
/// Implementations must release everything they partially acquired when
/// `connect` fails, and `disconnect` must be safe to call repeatedly.
#[async_trait]
pub trait Transport: Send {
    /// Short backend name for log lines
    fn name(&self) -> &'static str;

    /// Connect, register this peer, subscribe to the service's pushes, and
    /// start delivering them into `events`
    async fn connect(&mut self, events: EventSender) -> Result<(), TransportError>;

    /// Tear down the connection
    async fn disconnect(&mut self);

    /// Send `method` with `args` and wait for the correlated reply
    async fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, TransportError>;
}

/// Settings a backend is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub kind: TransportKind,
    pub connection: ConnectionMode,
    pub socket_path: PathBuf,
    pub reply_timeout: Duration,
    pub pid: u32,
}

/// Build the backend selected by `options.kind`
pub fn backend_for(options: &BackendOptions) -> Box<dyn Transport> {
    match options.kind {
        TransportKind::Dbus => Box::new(DbusTransport::new(options.connection, options.pid)),
        TransportKind::Socket => Box::new(SocketTransport::new(
            options.socket_path.clone(),
            options.pid,
            options.reply_timeout,
        )),
    }
}

/// One logical session with the output service
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    /// Held for the whole of a call so exchanges never interleave
    backend: tokio::sync::Mutex<Box<dyn Transport>>,
    handlers: Mutex<HashMap<String, PushHandler>>,
    connected: AtomicBool,
    /// Bumped on every successful open so a stale pump cannot close a newer connection
    generation: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
    reply_timeout: Duration,
    debug: bool,
}

impl TransportSession {
    pub fn new(backend: Box<dyn Transport>, reply_timeout: Duration, debug: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend: tokio::sync::Mutex::new(backend),
                handlers: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                pump: Mutex::new(None),
                reply_timeout,
                debug,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Open the session; a no-op if it is already open
    pub async fn open(&self) -> Result<(), TransportError> {
        let mut backend = self.inner.backend.lock().await;

        if self.is_open() {
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        backend.connect(events_tx).await?;

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.connected.store(true, Ordering::Release);

        let pump = tokio::spawn(run_pump(Arc::downgrade(&self.inner), events_rx, generation));
        if let Some(stale) = lock(&self.inner.pump).replace(pump) {
            stale.abort();
        }

        info!(transport = backend.name(), "Output service session opened");
        Ok(())
    }

    /// Close the session; a no-op if it is already closed
    pub async fn close(&self) {
        let mut backend = self.inner.backend.lock().await;

        if !self.inner.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        backend.disconnect().await;

        info!(transport = backend.name(), "Output service session closed");
    }

    /// Send a call and wait up to the reply deadline for its reply
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Vec<Value>, TransportError> {
        let mut backend = self.inner.backend.lock().await;

        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }

        self.inner.log_wire("call", method, args);

        let reply = match tokio::time::timeout(self.inner.reply_timeout, backend.call(method, args)).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(method, "No reply within {:?}", self.inner.reply_timeout);
                return Err(TransportError::Timeout(self.inner.reply_timeout));
            }
        };

        self.inner.log_wire("reply", method, &reply);
        Ok(reply)
    }

    /// Register the handler for pushes named `method`
    ///
    /// Only one handler per name can be active. Returns `false` and leaves the
    /// existing handler in place if one is already registered.
    pub fn on_push(&self, method: &str, handler: PushHandler) -> bool {
        let mut handlers = lock(&self.inner.handlers);
        if handlers.contains_key(method) {
            return false;
        }
        handlers.insert(method.to_string(), handler);
        true
    }

    /// Remove the handler for `method`; returns whether one was registered
    pub fn remove_push(&self, method: &str) -> bool {
        lock(&self.inner.handlers).remove(method).is_some()
    }
}

impl SessionInner {
    fn log_wire(&self, direction: &str, method: &str, values: &[Value]) {
        if self.debug {
            info!("{} {}({})", direction, method, display_values(values));
        } else {
            trace!("{} {}({})", direction, method, display_values(values));
        }
    }

    fn handler_for(&self, method: &str) -> Option<PushHandler> {
        lock(&self.handlers).get(method).cloned()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}

/// Drain backend events and route pushes until the backend goes away
async fn run_pump(
    session: Weak<SessionInner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };

        match event {
            TransportEvent::Push { method, args } => {
                inner.log_wire("push", &method, &args);
                match inner.handler_for(&method) {
                    Some(handler) => handler(args.as_slice()),
                    None => debug!(method, "No handler for push, ignoring"),
                }
            }
            TransportEvent::Disconnected => {
                warn!("Output service disconnected; closing session");
                let mut backend = inner.backend.lock().await;
                if inner.generation.load(Ordering::Acquire) == generation
                    && inner.connected.swap(false, Ordering::AcqRel)
                {
                    backend.disconnect().await;
                    lock(&inner.pump).take();
                }
                return;
            }
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend for engine tests

    use std::collections::VecDeque;

    use super::*;

    #[derive(Default)]
    pub(crate) struct Script {
        pub replies: HashMap<String, VecDeque<Result<Vec<Value>, TransportError>>>,
        pub calls: Vec<(String, Vec<Value>)>,
        pub connects: usize,
        pub disconnects: usize,
        pub fail_connect: bool,
        pub events: Option<EventSender>,
    }

    /// Test handle onto the state a [`ScriptedTransport`] shares
    #[derive(Clone, Default)]
    pub(crate) struct ScriptHandle(pub Arc<Mutex<Script>>);

    impl ScriptHandle {
        pub fn reply(&self, method: &str, values: Vec<Value>) {
            lock(&self.0)
                .replies
                .entry(method.to_string())
                .or_default()
                .push_back(Ok(values));
        }

        pub fn fail(&self, method: &str, error: TransportError) {
            lock(&self.0)
                .replies
                .entry(method.to_string())
                .or_default()
                .push_back(Err(error));
        }

        pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
            lock(&self.0).calls.clone()
        }

        pub fn calls_to(&self, method: &str) -> usize {
            lock(&self.0).calls.iter().filter(|(m, _)| m == method).count()
        }

        pub fn connects(&self) -> usize {
            lock(&self.0).connects
        }

        pub fn disconnects(&self) -> usize {
            lock(&self.0).disconnects
        }

        pub fn set_fail_connect(&self, fail: bool) {
            lock(&self.0).fail_connect = fail;
        }

        /// Inject a push as if the service had sent it
        pub fn push(&self, method: &str, args: Vec<Value>) {
            self.send(TransportEvent::Push {
                method: method.to_string(),
                args,
            });
        }

        pub fn drop_connection(&self) {
            self.send(TransportEvent::Disconnected);
        }

        fn send(&self, event: TransportEvent) {
            let events = lock(&self.0).events.clone();
            if let Some(events) = events {
                let _ = events.send(event);
            }
        }
    }

    pub(crate) struct ScriptedTransport {
        script: ScriptHandle,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub fn new() -> (Self, ScriptHandle) {
            let script = ScriptHandle::default();
            (
                Self {
                    script: script.clone(),
                    delay: None,
                },
                script,
            )
        }

        /// Delay every reply, to exercise the deadline
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn connect(&mut self, events: EventSender) -> Result<(), TransportError> {
            let mut script = lock(&self.script.0);
            if script.fail_connect {
                return Err(TransportError::NotConnected);
            }
            script.connects += 1;
            script.events = Some(events);
            Ok(())
        }

        async fn disconnect(&mut self) {
            let mut script = lock(&self.script.0);
            script.disconnects += 1;
            script.events = None;
        }

        async fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, TransportError> {
            let reply = {
                let mut script = lock(&self.script.0);
                script.calls.push((method.to_string(), args.to_vec()));
                script
                    .replies
                    .get_mut(method)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(|| {
                        Err(TransportError::Remote {
                            message: format!("no scripted reply for {}", method),
                        })
                    })
            };
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            reply
        }
    }

    /// Poll `condition` until it holds or a second has passed
    pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn session_with(transport: ScriptedTransport) -> TransportSession {
        TransportSession::new(Box::new(transport), Duration::from_millis(1000), false)
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let (transport, script) = ScriptedTransport::new();
        let session = session_with(transport);

        session.open().await.unwrap();
        session.open().await.unwrap();

        assert!(session.is_open());
        assert_eq!(script.connects(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_session_closed() {
        let (transport, script) = ScriptedTransport::new();
        script.set_fail_connect(true);
        let session = session_with(transport);

        assert!(session.open().await.is_err());
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, script) = ScriptedTransport::new();
        let session = session_with(transport);

        session.open().await.unwrap();
        session.close().await;
        session.close().await;

        assert!(!session.is_open());
        assert_eq!(script.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_call_requires_open_session() {
        let (transport, script) = ScriptedTransport::new();
        let session = session_with(transport);

        let err = session.call("GetOutputIDs", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(script.calls().is_empty());
    }

    #[tokio::test]
    async fn test_call_returns_reply() {
        let (transport, script) = ScriptedTransport::new();
        script.reply("GetOutputIDs", vec![Value::Int32(5), Value::Int32(6)]);
        let session = session_with(transport);
        session.open().await.unwrap();

        let reply = session.call("GetOutputIDs", &[]).await.unwrap();

        assert_eq!(reply, vec![Value::Int32(5), Value::Int32(6)]);
        assert_eq!(script.calls(), vec![("GetOutputIDs".to_string(), vec![])]);
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (transport, script) = ScriptedTransport::new();
        script.reply("SetMode", vec![Value::Int32(1)]);
        let transport = transport.with_delay(Duration::from_millis(200));
        let session = TransportSession::new(Box::new(transport), Duration::from_millis(20), false);
        session.open().await.unwrap();

        let err = session
            .call("SetMode", &[Value::Int32(5), Value::Int32(1)])
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_push_routed_to_handler() {
        let (transport, script) = ScriptedTransport::new();
        let session = session_with(transport);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        assert!(session.on_push(
            "Notify",
            Arc::new(move |args: &[Value]| {
                seen_in_handler.fetch_add(args.len(), Ordering::SeqCst);
            }),
        ));
        session.open().await.unwrap();

        script.push("Notify", vec![Value::Int32(1), Value::Int32(2)]);
        script.push("SomethingElse", vec![Value::Int32(9)]);

        assert!(wait_until(|| seen.load(Ordering::SeqCst) == 2).await);
    }

    #[tokio::test]
    async fn test_only_one_handler_per_name() {
        let (transport, _script) = ScriptedTransport::new();
        let session = session_with(transport);

        assert!(session.on_push("Notify", Arc::new(|_: &[Value]| {})));
        assert!(!session.on_push("Notify", Arc::new(|_: &[Value]| {})));
        assert!(session.remove_push("Notify"));
        assert!(!session.remove_push("Notify"));
        assert!(session.on_push("Notify", Arc::new(|_: &[Value]| {})));
    }

    #[tokio::test]
    async fn test_disconnect_closes_session_implicitly() {
        let (transport, script) = ScriptedTransport::new();
        let session = session_with(transport);
        session.open().await.unwrap();

        script.drop_connection();

        assert!(wait_until(|| !session.is_open()).await);
        assert!(wait_until(|| script.disconnects() == 1).await);
        let err = session.call("GetOutputIDs", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        // Reopening after a peer disconnect works
        session.open().await.unwrap();
        assert_eq!(script.connects(), 2);
    }
}
