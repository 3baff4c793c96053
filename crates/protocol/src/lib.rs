//! Wire contract for the fleetlive push connection.
//!
//! Inbound messages are JSON objects carrying at least a `type` string.
//! [`EventDecoder`] validates them into immutable [`EventEnvelope`]s; the
//! payload stays opaque until a consumer asks for a typed view.

pub mod decoder;
pub mod envelope;
pub mod kinds;
pub mod messages;

// Re-export primary types for convenience.
pub use decoder::{DEFAULT_MAX_MESSAGE_SIZE, EventDecoder, Rejected};
pub use envelope::EventEnvelope;
pub use messages::{ContainerRestarted, DependencyIgnored, StatusChanged, UpdateAvailable};
