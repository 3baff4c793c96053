//! Connection driver with exponential backoff.
//!
//! Contains the shared [`LiveContext`] and the per-generation driver task
//! that pumps one connection at a time, dispatches its messages, and
//! reconnects after failures until cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fleetlive_protocol::EventDecoder;

use crate::backoff::BackoffPolicy;
use crate::dispatcher::Dispatcher;
use crate::transport::{CloseHandle, Connection, Transport, TransportEvent};
use crate::types::ConnectionStatus;

/// Mutable lifecycle state, guarded by one short-held lock.
#[derive(Debug)]
pub(crate) struct Session {
    /// Bumped by every `start()` and `stop()`; drivers from older
    /// generations are inert.
    pub(crate) generation: u64,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) live: Option<CloseHandle>,
    pub(crate) backoff: BackoffPolicy,
}

/// State shared between the manager and its driver task.
pub(crate) struct LiveContext {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) decoder: EventDecoder,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) stability_window: Duration,
    pub(crate) session: Mutex<Session>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
}

/// How one connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Stopped or superseded; the driver must exit.
    Cancelled,
    /// Failed or closed remotely; schedule a reconnect.
    Lost,
}

impl LiveContext {
    pub(crate) fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Publishes a new status. Call with the session lock held.
    pub(crate) fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        self.status.send_replace(status)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_session().generation == generation
    }

    /// Ends the current generation: cancels pending timers, closes the live
    /// connection, and clears the retry streak.
    pub(crate) fn stop(&self) {
        let previous = {
            let mut session = self.lock_session();
            session.generation = session.generation.wrapping_add(1);
            if let Some(cancel) = session.cancel.take() {
                cancel.cancel();
            }
            if let Some(live) = session.live.take() {
                live.close();
            }
            session.backoff.reset();
            self.set_status(ConnectionStatus::Disconnected)
        };
        if previous.is_active() {
            info!(from = ?previous, "push connection stopped");
        }
    }

    fn mark_open(&self, generation: u64) -> bool {
        let session = self.lock_session();
        if session.generation != generation {
            return false;
        }
        let previous = self.set_status(ConnectionStatus::Connected);
        let attempt = session.backoff.retry_state().map(|r| r.attempt);
        drop(session);
        if previous != ConnectionStatus::Connected {
            info!(retry_attempt = ?attempt, "push connection open");
        }
        true
    }

    /// Clears the retry streak after a sustained connected period.
    fn mark_stable(&self, generation: u64) {
        let mut session = self.lock_session();
        if session.generation != generation || self.status() != ConnectionStatus::Connected {
            return;
        }
        if session.backoff.retry_state().is_some() {
            session.backoff.reset();
            debug!("connection stable, retry backoff reset");
        }
    }

    /// Decodes one raw message and publishes it. Returns whether the
    /// generation is still current afterwards.
    fn deliver(&self, generation: u64, raw: &str) -> bool {
        match self.decoder.decode(raw) {
            Ok(envelope) => {
                trace!(event_type = envelope.event_type(), "inbound event");
                self.dispatcher
                    .publish_while(&envelope, || self.is_current(generation));
            }
            Err(rejected) => {
                warn!(reason = %rejected, len = raw.len(), "dropping inbound message");
            }
        }
        self.is_current(generation)
    }

    /// Moves to `Reconnecting` and returns the backoff delay, or `None` if
    /// this generation has ended.
    fn begin_reconnect(&self, generation: u64) -> Option<Duration> {
        let mut session = self.lock_session();
        if session.generation != generation {
            return None;
        }
        session.live = None;
        let delay = session.backoff.next_delay();
        let attempt = session.backoff.retry_state().map_or(0, |r| r.attempt);
        self.set_status(ConnectionStatus::Reconnecting);
        drop(session);

        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );
        Some(delay)
    }

    /// Starts the next connection attempt unless this generation has ended.
    fn reconnect(&self, generation: u64) -> Option<Connection> {
        let mut session = self.lock_session();
        if session.generation != generation {
            return None;
        }
        let connection = self.transport.connect();
        session.live = Some(connection.close_handle());
        self.set_status(ConnectionStatus::Connecting);
        Some(connection)
    }
}

/// Drives one generation: pump the connection, back off, reconnect, repeat.
pub(crate) async fn drive(
    ctx: Arc<LiveContext>,
    generation: u64,
    cancel: CancellationToken,
    mut connection: Connection,
) {
    loop {
        if pump(&ctx, generation, &cancel, &mut connection).await == Outcome::Cancelled {
            break;
        }
        connection.close();

        let Some(delay) = ctx.begin_reconnect(generation) else {
            break;
        };

        // Wait for the backoff delay (or cancellation).
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, "reconnect cancelled");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match ctx.reconnect(generation) {
            Some(next) => connection = next,
            None => break,
        }
    }
    connection.close();
    debug!(generation, "connection driver exited");
}

/// Reads one connection until it is lost or the generation ends.
async fn pump(
    ctx: &LiveContext,
    generation: u64,
    cancel: &CancellationToken,
    connection: &mut Connection,
) -> Outcome {
    let stability = tokio::time::sleep(ctx.stability_window);
    tokio::pin!(stability);
    let mut armed = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Outcome::Cancelled,

            _ = &mut stability, if armed => {
                armed = false;
                ctx.mark_stable(generation);
            }

            event = connection.next_event() => match event {
                Some(TransportEvent::Open) => {
                    if !ctx.mark_open(generation) {
                        return Outcome::Cancelled;
                    }
                    stability
                        .as_mut()
                        .reset(Instant::now() + ctx.stability_window);
                    armed = true;
                }
                Some(TransportEvent::Message(raw)) => {
                    if !ctx.deliver(generation, &raw) {
                        return Outcome::Cancelled;
                    }
                }
                Some(TransportEvent::Error(e)) => {
                    warn!(error = %e, "push connection failed");
                    return Outcome::Lost;
                }
                Some(TransportEvent::Closed) => {
                    info!("push connection closed by server");
                    return Outcome::Lost;
                }
                None => {
                    debug!("transport ended without close");
                    return Outcome::Lost;
                }
            },
        }
    }
}
