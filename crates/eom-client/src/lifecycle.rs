//! When the transport session is opened and closed
//!
//! The session is opened lazily by `init` or by the first callback
//! registration, and closed by `deinit` only once no subscriber remains.
//! A failed open never leaves a half-open session behind.

use tracing::{debug, info};

use crate::error::EomError;
use crate::protocol::NOTIFY;
use crate::transport::{PushHandler, TransportSession};

pub(crate) struct SessionLifecycle {
    session: TransportSession,
}

impl SessionLifecycle {
    pub fn new(session: TransportSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// Open the session and route `Notify` pushes to `handler`
    ///
    /// # Errors
    ///
    /// Returns `EomError::ConnectionFailure` if the session cannot be opened.
    pub async fn acquire(&self, handler: PushHandler) -> Result<(), EomError> {
        if !self.session.on_push(NOTIFY, handler) {
            debug!("Notify handler already installed");
        }
        self.session
            .open()
            .await
            .map_err(EomError::ConnectionFailure)
    }

    /// Close the session unless subscribers still depend on it
    ///
    /// Returns whether the session was released.
    pub async fn release(&self, subscribers: usize) -> bool {
        if subscribers > 0 {
            info!(subscribers, "Callbacks still registered; keeping session open");
            return false;
        }
        self.session.remove_push(NOTIFY);
        self.session.close().await;
        true
    }
}
