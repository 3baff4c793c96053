//! Connection manager owning one self-healing push connection.
//!
//! Drives the lifecycle (idle, connecting, connected, reconnecting,
//! disconnected), decodes inbound messages, and hands envelopes to its
//! [`Dispatcher`]. Transport failures never reach the caller: they are
//! retried with backoff and show up only as status changes.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleetlive_protocol::{EventDecoder, EventEnvelope};

use crate::backoff::{BackoffPolicy, RetryState};
use crate::dispatcher::{
    Dispatcher, HandlerResult, Predicate, SubscriptionGuard, SubscriptionHandle,
};
use crate::error::LiveError;
use crate::reconnection::{self, LiveContext, Session};
use crate::transport::Transport;
use crate::types::{ConnectionStatus, LiveConfig, StatusIndicator};

/// Owns one push connection and its subscribers.
///
/// Create one per logical subscription point. Dropping the manager stops it.
pub struct ConnectionManager {
    ctx: Arc<LiveContext>,
}

impl ConnectionManager {
    /// Creates a stopped manager. Nothing connects until [`start`](Self::start).
    pub fn new(config: LiveConfig, transport: impl Transport) -> Result<Self, LiveError> {
        config.validate()?;
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let ctx = LiveContext {
            transport: Box::new(transport),
            decoder: EventDecoder::new(config.max_message_bytes),
            dispatcher: Dispatcher::new(),
            stability_window: config.stability_window(),
            session: Mutex::new(Session {
                generation: 0,
                cancel: None,
                live: None,
                backoff: BackoffPolicy::new(config.backoff()),
            }),
            status,
        };
        Ok(Self { ctx: Arc::new(ctx) })
    }

    /// Starts connecting. A no-op while already connecting, connected, or
    /// reconnecting.
    ///
    /// Must be called from within a Tokio runtime, which then drives the
    /// connection in a background task.
    pub fn start(&self) -> Result<(), LiveError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| LiveError::NoRuntime)?;

        let mut session = self.ctx.lock_session();
        if self.ctx.status().is_active() {
            return Ok(());
        }

        session.generation = session.generation.wrapping_add(1);
        let generation = session.generation;
        let cancel = CancellationToken::new();
        session.cancel = Some(cancel.clone());
        session.backoff.reset();

        let connection = self.ctx.transport.connect();
        session.live = Some(connection.close_handle());
        self.ctx.set_status(ConnectionStatus::Connecting);
        drop(session);

        info!(generation, "starting push connection");
        runtime.spawn(reconnection::drive(
            self.ctx.clone(),
            generation,
            cancel,
            connection,
        ));
        Ok(())
    }

    /// Stops the connection.
    ///
    /// Cancels any pending reconnect and closes the live transport before
    /// returning: no handler runs and no reconnect fires afterwards. Safe to
    /// call repeatedly and from inside a handler (through a
    /// [`ManagerHandle`]).
    pub fn stop(&self) {
        self.ctx.stop();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ctx.status()
    }

    pub fn indicator(&self) -> StatusIndicator {
        self.status().indicator()
    }

    /// Observes status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.ctx.status.subscribe()
    }

    /// The current failure streak, if any.
    pub fn retry_state(&self) -> Option<RetryState> {
        self.ctx.lock_session().backoff.retry_state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.ctx.dispatcher
    }

    pub fn subscribe<F>(&self, predicate: impl Into<Predicate>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.ctx.dispatcher.subscribe(predicate, handler)
    }

    pub fn subscribe_scoped<F>(
        &self,
        predicate: impl Into<Predicate>,
        handler: F,
    ) -> SubscriptionGuard
    where
        F: Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.ctx.dispatcher.subscribe_scoped(predicate, handler)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.ctx.dispatcher.unsubscribe(handle)
    }

    /// A weak handle for use inside handlers, which must not keep the
    /// manager alive.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            ctx: Arc::downgrade(&self.ctx),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.ctx.stop();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("subscriptions", &self.ctx.dispatcher.len())
            .finish()
    }
}

/// Non-owning handle to a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    ctx: Weak<LiveContext>,
}

impl ManagerHandle {
    /// Stops the manager if it still exists.
    pub fn stop(&self) {
        if let Some(ctx) = self.ctx.upgrade() {
            ctx.stop();
        }
    }

    /// Current status, or `None` once the manager is gone.
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.ctx.upgrade().map(|ctx| ctx.status())
    }
}
