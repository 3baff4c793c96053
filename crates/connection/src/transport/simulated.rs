//! In-memory transport driven by hand, for tests and demos.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::TransportError;
use crate::transport::{Connection, ConnectionSink, Transport, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A transport whose connections are scripted by the caller.
///
/// Every [`connect`](Transport::connect) records a new
/// [`SimulatedConnection`]; the caller then opens it, pushes messages,
/// fails it, or closes it from the "server" side.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    connections: Arc<Mutex<Vec<SimulatedConnection>>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SimulatedConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of connection attempts made so far.
    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    pub fn connection(&self, index: usize) -> Option<SimulatedConnection> {
        self.lock().get(index).cloned()
    }

    /// The most recent connection attempt.
    pub fn latest(&self) -> Option<SimulatedConnection> {
        self.lock().last().cloned()
    }

    /// Connections the client side has not closed yet.
    pub fn open_connections(&self) -> usize {
        self.lock().iter().filter(|c| !c.is_closed()).count()
    }
}

impl Transport for SimulatedTransport {
    fn connect(&self) -> Connection {
        let (sink, connection) = Connection::channel(EVENT_CHANNEL_CAPACITY);
        let mut connections = self.lock();
        let index = connections.len();
        connections.push(SimulatedConnection { index, sink });
        connection
    }
}

/// Server side of one simulated connection.
#[derive(Debug, Clone)]
pub struct SimulatedConnection {
    index: usize,
    sink: ConnectionSink,
}

impl SimulatedConnection {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Reports the connection as established.
    pub fn open(&self) -> bool {
        self.sink.try_send(TransportEvent::Open)
    }

    /// Pushes one raw message.
    pub fn message(&self, raw: impl Into<String>) -> bool {
        self.sink.try_send(TransportEvent::Message(raw.into()))
    }

    /// Fails the connection.
    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.sink
            .try_send(TransportEvent::Error(TransportError::Other(reason.into())))
    }

    /// Ends the connection from the server side.
    pub fn close(&self) -> bool {
        self.sink.try_send(TransportEvent::Closed)
    }

    /// Whether the client side closed or dropped this connection.
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}
