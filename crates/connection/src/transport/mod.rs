//! Transport seam between the connection manager and a concrete push source.
//!
//! A [`Transport`] starts one connection per [`Transport::connect`] call. The
//! returned [`Connection`] yields lifecycle events in order and can be closed
//! synchronously through its [`CloseHandle`]. The transport side writes into
//! the matching [`ConnectionSink`].

pub mod simulated;
pub mod sse;
pub(crate) mod sse_parser;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Something that happened on one underlying connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// One raw inbound message.
    Message(String),
    /// The connection failed.
    Error(TransportError),
    /// The remote side ended the connection.
    Closed,
}

/// A source of push connections.
pub trait Transport: Send + Sync + 'static {
    /// Starts a connection attempt and returns immediately.
    ///
    /// Called from within a Tokio runtime. Success or failure of the attempt
    /// is reported through the returned [`Connection`].
    fn connect(&self) -> Connection;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn connect(&self) -> Connection {
        (**self).connect()
    }
}

/// Client side of one connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct Connection {
    events: mpsc::Receiver<TransportEvent>,
    closer: CancellationToken,
}

impl Connection {
    /// Creates a connected sink/connection pair.
    pub fn channel(capacity: usize) -> (ConnectionSink, Connection) {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let closer = CancellationToken::new();
        (
            ConnectionSink {
                tx,
                closer: closer.clone(),
            },
            Connection { events, closer },
        )
    }

    /// Next event, or `None` once the transport side is gone or the
    /// connection was closed locally.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.closer.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closer.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(self.closer.clone())
    }

    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closer.cancel();
    }
}

/// Closes a [`Connection`] from elsewhere.
#[derive(Debug, Clone)]
pub struct CloseHandle(CancellationToken);

impl CloseHandle {
    pub fn close(&self) {
        self.0.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Transport side of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSink {
    tx: mpsc::Sender<TransportEvent>,
    closer: CancellationToken,
}

impl ConnectionSink {
    /// Sends an event, waiting for room. Returns `false` once the client
    /// side has closed the connection.
    pub async fn send(&self, event: TransportEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.closer.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Sends without waiting. Returns `false` if the connection is closed or
    /// the buffer is full.
    pub fn try_send(&self, event: TransportEvent) -> bool {
        !self.is_closed() && self.tx.try_send(event).is_ok()
    }

    /// Whether the client side closed or dropped the connection.
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the client side closes or drops the connection.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.closer.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut conn) = Connection::channel(8);
        assert!(sink.send(TransportEvent::Open).await);
        assert!(sink.try_send(TransportEvent::Message("a".into())));
        assert!(sink.try_send(TransportEvent::Closed));

        assert!(matches!(conn.next_event().await, Some(TransportEvent::Open)));
        assert!(matches!(
            conn.next_event().await,
            Some(TransportEvent::Message(m)) if m == "a"
        ));
        assert!(matches!(conn.next_event().await, Some(TransportEvent::Closed)));
    }

    #[tokio::test]
    async fn close_handle_stops_delivery() {
        let (sink, mut conn) = Connection::channel(8);
        assert!(sink.try_send(TransportEvent::Message("queued".into())));

        conn.close_handle().close();
        assert!(conn.is_closed());
        assert!(sink.is_closed());
        assert!(!sink.try_send(TransportEvent::Open));
        assert!(!sink.send(TransportEvent::Open).await);
        // Already-queued events are not handed out after a close.
        assert!(conn.next_event().await.is_none());
    }

    #[tokio::test]
    async fn dropping_connection_closes_sink() {
        let (sink, conn) = Connection::channel(8);
        drop(conn);
        assert!(sink.is_closed());
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.closed())
            .await
            .expect("closed() should resolve");
    }

    #[tokio::test]
    async fn dropping_sink_ends_stream() {
        let (sink, mut conn) = Connection::channel(8);
        drop(sink);
        assert!(conn.next_event().await.is_none());
    }

    #[test]
    fn try_send_respects_capacity() {
        let (sink, _conn) = Connection::channel(1);
        assert!(sink.try_send(TransportEvent::Open));
        assert!(!sink.try_send(TransportEvent::Closed));
    }
}
