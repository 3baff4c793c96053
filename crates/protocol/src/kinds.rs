//! Event kinds the server is known to emit.
//!
//! Routing never requires a kind to be listed here: unknown kinds decode and
//! dispatch like any other.

/// A newer image version was discovered for a monitored container.
pub const UPDATE_AVAILABLE: &str = "update_available";

/// A pending update was applied.
pub const UPDATE_APPLIED: &str = "update_applied";

/// A monitored container restarted.
pub const CONTAINER_RESTARTED: &str = "container_restarted";

/// An operator chose to ignore a dependency update.
pub const DEPENDENCY_IGNORED: &str = "dependency_ignored";

/// Generic status change of a monitored workload.
pub const STATUS_CHANGED: &str = "status_changed";

/// All kinds listed above.
pub const ALL: &[&str] = &[
    UPDATE_AVAILABLE,
    UPDATE_APPLIED,
    CONTAINER_RESTARTED,
    DEPENDENCY_IGNORED,
    STATUS_CHANGED,
];

/// Returns `true` if `event_type` is one of the kinds listed in this module.
pub fn is_known(event_type: &str) -> bool {
    ALL.contains(&event_type)
}
