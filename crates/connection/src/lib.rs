//! Push connection client for the fleetlive dashboard.
//!
//! Keeps one long-lived push connection open, reconnecting with jittered
//! exponential backoff, and fans decoded events out to independent
//! subscribers.

pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub(crate) mod reconnection;
pub mod transport;
pub mod types;

pub use backoff::{BackoffConfig, BackoffPolicy, RetryState};
pub use dispatcher::{
    DeliveryReport, Dispatcher, HandlerError, HandlerResult, Predicate, SubscriberGone,
    SubscriptionGuard, SubscriptionHandle,
};
pub use error::{LiveError, TransportError};
pub use manager::{ConnectionManager, ManagerHandle};
pub use transport::simulated::{SimulatedConnection, SimulatedTransport};
pub use transport::sse::SseTransport;
pub use transport::{CloseHandle, Connection, ConnectionSink, Transport, TransportEvent};
pub use types::{ConnectionStatus, LiveConfig, StatusIndicator};
