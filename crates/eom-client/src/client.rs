//! Client handle and control calls
//!
//! [`EomClient`] combines a transport session with the local output
//! registry and the callback subscriptions. Remote operations are async and
//! never hold the state lock across an `.await`; registry reads are plain
//! synchronous lookups.
//!
//! `deinit` must not run while another task is waiting on a control call
//! of the same client. The waiting call then fails or completes against a
//! closed session, which is not a supported sequence.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use eom_config::{Config, ConnectionMode, TransportKind};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{CallbackDispatcher, NotifyCallback, Registration, UserData};
use crate::error::{EomError, TransportError};
use crate::lifecycle::SessionLifecycle;
use crate::protocol::{
    is_success, OutputInfo, GET_OUTPUT_IDS, GET_OUTPUT_INFO, SET_MODE, SET_OUTPUT_ATTRIBUTE,
    SET_WINDOW,
};
use crate::reconciler::reconcile;
use crate::registry::{OutputRegistry, OutputSnapshot};
use crate::transport::{self, lock, BackendOptions, PushHandler, Transport, TransportSession};
use crate::types::{
    AttributeState, ConnectorType, NotifyCategory, OutputAttribute, OutputId, OutputMode,
    OutputRecord, PhysicalSize, Resolution,
};
use crate::value::Value;
use crate::window::NativeWindow;

/// Runtime settings of a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub transport: TransportKind,
    pub connection: ConnectionMode,
    /// Service socket of the socket backend
    pub socket_path: PathBuf,
    pub reply_timeout: Duration,
    /// Log every call, reply and push at info level
    pub debug: bool,
    /// Process id sent with attribute and window calls, and used to filter
    /// attribute notifications
    pub pid: u32,
}

impl ClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transport: config.client.transport,
            connection: config.client.connection,
            socket_path: config
                .client
                .socket_path
                .clone()
                .unwrap_or_else(eom_config::default_socket_path),
            reply_timeout: Duration::from_millis(config.client.reply_timeout_ms),
            debug: config.logging.debug,
            pid: std::process::id(),
        }
    }

    fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            kind: self.transport,
            connection: self.connection,
            socket_path: self.socket_path.clone(),
            reply_timeout: self.reply_timeout,
            pid: self.pid,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything guarded by the client's single lock
#[derive(Default)]
pub(crate) struct ClientState {
    pub(crate) registry: OutputRegistry,
    pub(crate) dispatcher: CallbackDispatcher,
}

/// Handle to the external output manager service
///
/// Cloning is cheap; clones share one session, registry and set of callbacks.
///
/// # Example
///
/// ```ignore
/// let client = EomClient::new(ClientConfig::default());
/// client.init().await?;
/// for id in client.list_output_ids().await? {
///     println!("{}: {}", id, client.get_type(id)?);
/// }
/// client.deinit().await;
/// ```
#[derive(Clone)]
pub struct EomClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    state: Mutex<ClientState>,
    lifecycle: SessionLifecycle,
    pid: u32,
}

impl EomClient {
    /// Create a client using the backend selected by `config`
    ///
    /// Nothing is connected until [`init`](Self::init) or the first
    /// [`add_callback`](Self::add_callback).
    pub fn new(config: ClientConfig) -> Self {
        let backend = transport::backend_for(&config.backend_options());
        Self::with_transport(backend, &config)
    }

    /// Create a client on top of an already constructed backend
    pub fn with_transport(backend: Box<dyn Transport>, config: &ClientConfig) -> Self {
        let session = TransportSession::new(backend, config.reply_timeout, config.debug);
        Self {
            inner: Arc::new(ClientInner {
                state: Mutex::new(ClientState::default()),
                lifecycle: SessionLifecycle::new(session),
                pid: config.pid,
            }),
        }
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Whether the session to the service is currently open
    pub fn is_connected(&self) -> bool {
        self.inner.lifecycle.is_open()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the session to the output service
    ///
    /// Calling it again while the session is open does nothing.
    ///
    /// # Errors
    ///
    /// Returns `EomError::ConnectionFailure` if the service cannot be reached
    /// or this process cannot register with it.
    pub async fn init(&self) -> Result<(), EomError> {
        self.inner.lifecycle.acquire(self.notify_handler()).await?;
        debug!(pid = self.inner.pid, "Client initialized");
        Ok(())
    }

    /// Forget every known output and close the session
    ///
    /// While callbacks are registered the session stays open so their
    /// notifications keep arriving.
    pub async fn deinit(&self) {
        let subscribers = {
            let mut state = self.state();
            state.registry.clear();
            state.dispatcher.len()
        };
        if self.inner.lifecycle.release(subscribers).await {
            debug!("Client deinitialized");
        }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// List the outputs the service manages
    ///
    /// Outputs not seen before are looked up with `GetOutputInfo` and added to
    /// the registry. An output whose lookup fails is logged and left out of
    /// the registry but still returned.
    ///
    /// # Errors
    ///
    /// Returns `EomError::SendFailure` if `GetOutputIDs` cannot be exchanged.
    pub async fn list_output_ids(&self) -> Result<Vec<OutputId>, EomError> {
        let reply = self.call(GET_OUTPUT_IDS, &[]).await?;

        let mut ids = Vec::with_capacity(reply.len());
        for value in &reply {
            match value.as_i32().and_then(OutputId::from_wire) {
                Some(id) => ids.push(id),
                None => warn!("Ignoring invalid output id {} in {} reply", value, GET_OUTPUT_IDS),
            }
        }

        if ids.is_empty() {
            info!("No external outputs");
            return Ok(ids);
        }

        for &id in &ids {
            if self.state().registry.contains(id) {
                continue;
            }
            if let Err(e) = self.discover(id).await {
                error!(output_id = %id, "Failed to get output information: {}", e);
            }
        }

        Ok(ids)
    }

    async fn discover(&self, id: OutputId) -> Result<(), EomError> {
        let wire_id = check_id(id)?;
        let reply = self.call(GET_OUTPUT_INFO, &[wire_id.into()]).await?;
        let info = OutputInfo::decode(&reply)
            .map_err(|e| malformed_reply(GET_OUTPUT_INFO, e.to_string()))?;

        if info.id != wire_id {
            warn!(output_id = %id, "{} answered for output {}", GET_OUTPUT_INFO, info.id);
        }

        let mode = OutputMode::from_wire(info.mode)
            .ok_or_else(|| malformed_reply(GET_OUTPUT_INFO, format!("invalid mode {}", info.mode)))?;
        let attribute = OutputAttribute::from_wire(info.attribute).ok_or_else(|| {
            malformed_reply(GET_OUTPUT_INFO, format!("invalid attribute {}", info.attribute))
        })?;
        let snapshot = OutputSnapshot {
            connector_type: ConnectorType::from_wire(info.connector_type),
            mode,
            resolution: Resolution {
                width: info.width,
                height: info.height,
            },
            physical_size: PhysicalSize {
                width_mm: info.width_mm,
                height_mm: info.height_mm,
            },
        };

        if self
            .state()
            .registry
            .upsert_from_discovery(id, snapshot, attribute)
        {
            info!(
                output_id = %id,
                "{} {}x{} ({}x{} mm), mode {}, attribute {}",
                snapshot.connector_type,
                info.width,
                info.height,
                info.width_mm,
                info.height_mm,
                mode,
                attribute
            );
        }
        Ok(())
    }

    // ========================================================================
    // Registry reads
    // ========================================================================

    /// Copy of everything known about `id`
    pub fn output(&self, id: OutputId) -> Result<OutputRecord, EomError> {
        self.read(id, |record| record.clone())
    }

    pub fn get_type(&self, id: OutputId) -> Result<ConnectorType, EomError> {
        self.read(id, |record| record.connector_type)
    }

    pub fn get_mode(&self, id: OutputId) -> Result<OutputMode, EomError> {
        self.read(id, |record| record.mode)
    }

    pub fn get_attribute(&self, id: OutputId) -> Result<OutputAttribute, EomError> {
        self.read(id, |record| record.attribute)
    }

    pub fn get_attribute_state(&self, id: OutputId) -> Result<AttributeState, EomError> {
        self.read(id, |record| record.attribute_state)
    }

    pub fn get_resolution(&self, id: OutputId) -> Result<Resolution, EomError> {
        self.read(id, |record| record.resolution)
    }

    pub fn get_physical_size(&self, id: OutputId) -> Result<PhysicalSize, EomError> {
        self.read(id, |record| record.physical_size)
    }

    fn read<T>(&self, id: OutputId, f: impl FnOnce(&OutputRecord) -> T) -> Result<T, EomError> {
        check_id(id)?;
        self.state()
            .registry
            .find(id)
            .map(f)
            .ok_or(EomError::NoSuchDevice { id })
    }

    fn require_known(&self, id: OutputId) -> Result<(), EomError> {
        if self.state().registry.contains(id) {
            Ok(())
        } else {
            Err(EomError::NoSuchDevice { id })
        }
    }

    // ========================================================================
    // Control calls
    // ========================================================================

    /// Ask the service to grant `attribute` on `id` to this process
    ///
    /// On success the attribute is recorded locally right away. Its state is
    /// only updated once the service notifies it.
    ///
    /// # Errors
    ///
    /// Returns `EomError::InvalidParameter` for id 0 or `OutputAttribute::None`.
    /// Returns `EomError::NoSuchDevice` if `id` has not been discovered.
    /// Returns `EomError::SendFailure` if the call cannot be exchanged.
    /// Returns `EomError::OperationFailure` if the service refuses.
    pub async fn set_attribute(&self, id: OutputId, attribute: OutputAttribute) -> Result<(), EomError> {
        let wire_id = check_id(id)?;
        if attribute == OutputAttribute::None {
            return Err(EomError::invalid("attribute must not be none"));
        }
        self.require_known(id)?;

        let reply = self
            .call(
                SET_OUTPUT_ATTRIBUTE,
                &[wire_id.into(), self.wire_pid().into(), attribute.to_wire().into()],
            )
            .await?;
        if !is_success(&reply) {
            return Err(EomError::OperationFailure {
                method: SET_OUTPUT_ATTRIBUTE,
            });
        }

        if !self.state().registry.set_attribute(id, attribute) {
            debug!(output_id = %id, "Output forgotten before attribute reply");
        }
        info!(output_id = %id, "Attribute {} granted", attribute);
        Ok(())
    }

    /// Ask the service to switch `id` to `mode`
    ///
    /// The registry is not touched; the new mode becomes visible through
    /// [`get_mode`](Self::get_mode) once the service notifies it.
    ///
    /// # Errors
    ///
    /// Returns `EomError::InvalidParameter` for id 0 or an id beyond `i32::MAX`.
    /// Returns `EomError::SendFailure` if the call cannot be exchanged.
    /// Returns `EomError::OperationFailure` if the service refuses.
    pub async fn set_mode(&self, id: OutputId, mode: OutputMode) -> Result<(), EomError> {
        let wire_id = check_id(id)?;

        let reply = self
            .call(SET_MODE, &[wire_id.into(), mode.to_wire().into()])
            .await?;
        if !is_success(&reply) {
            return Err(EomError::OperationFailure { method: SET_MODE });
        }

        info!(output_id = %id, "Requested mode {}", mode);
        Ok(())
    }

    /// Ask the service to show `window` on output `id`
    ///
    /// # Errors
    ///
    /// Returns `EomError::InvalidParameter` for id 0 or a window without a
    /// native handle.
    /// Returns `EomError::NoSuchDevice` if `id` has not been discovered.
    /// Returns `EomError::SendFailure` if the call cannot be exchanged.
    /// Returns `EomError::OperationFailure` if the service refuses.
    pub async fn bind_window<W>(&self, id: OutputId, window: &W) -> Result<(), EomError>
    where
        W: NativeWindow + ?Sized,
    {
        let wire_id = check_id(id)?;
        let handle = window
            .native_handle()
            .ok_or_else(|| EomError::invalid("window has no native handle"))?;
        self.require_known(id)?;

        let reply = self
            .call(
                SET_WINDOW,
                &[wire_id.into(), self.wire_pid().into(), handle.into()],
            )
            .await?;
        if !is_success(&reply) {
            return Err(EomError::OperationFailure { method: SET_WINDOW });
        }

        info!(output_id = %id, window = handle, "Window bound");
        Ok(())
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Subscribe `callback` to notifications of `category`
    ///
    /// Registering the same callback twice for one category is accepted and
    /// keeps a single subscription. The first registration opens the session
    /// if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns `EomError::OutOfMemory` if the subscription cannot be stored.
    /// Returns `EomError::ConnectionFailure` if the session cannot be opened;
    /// the subscription is not kept in that case.
    pub async fn add_callback(
        &self,
        category: NotifyCategory,
        callback: NotifyCallback,
        user_data: Option<UserData>,
    ) -> Result<(), EomError> {
        let registration = self
            .state()
            .dispatcher
            .register(category, callback.clone(), user_data)?;

        if self.inner.lifecycle.is_open() {
            return Ok(());
        }

        if let Err(e) = self.inner.lifecycle.acquire(self.notify_handler()).await {
            if registration == Registration::Added {
                self.state().dispatcher.unregister(category, &callback);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Unsubscribe `callback` from `category`
    ///
    /// The session stays open; only [`deinit`](Self::deinit) closes it.
    ///
    /// # Errors
    ///
    /// Returns `EomError::InvalidParameter` if the callback is not subscribed
    /// to `category`.
    pub fn remove_callback(&self, category: NotifyCategory, callback: &NotifyCallback) -> Result<(), EomError> {
        if self.state().dispatcher.unregister(category, callback) {
            Ok(())
        } else {
            Err(EomError::invalid(format!(
                "callback is not registered for {} notifications",
                category
            )))
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn state(&self) -> MutexGuard<'_, ClientState> {
        lock(&self.inner.state)
    }

    fn wire_pid(&self) -> i32 {
        self.inner.pid as i32
    }

    async fn call(&self, method: &'static str, args: &[Value]) -> Result<Vec<Value>, EomError> {
        self.inner
            .lifecycle
            .session()
            .call(method, args)
            .await
            .map_err(|source| EomError::SendFailure { method, source })
    }

    /// Push handler feeding `Notify` into the reconciler
    ///
    /// Holds the client weakly; the session it is installed on is owned by
    /// the client.
    fn notify_handler(&self) -> PushHandler {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |args: &[Value]| {
            if let Some(inner) = inner.upgrade() {
                reconcile(&inner.state, inner.pid, args);
            }
        })
    }
}

/// Wire form of `id`, rejecting the reserved id and ids that do not fit an int32
fn check_id(id: OutputId) -> Result<i32, EomError> {
    match id.to_wire() {
        Some(wire_id) => Ok(wire_id),
        None if id.get() == 0 => Err(EomError::invalid("output id 0 is reserved")),
        None => Err(EomError::invalid(format!("output id {} is out of range", id))),
    }
}

fn malformed_reply(method: &'static str, message: String) -> EomError {
    EomError::SendFailure {
        method,
        source: TransportError::Protocol(message),
    }
}
