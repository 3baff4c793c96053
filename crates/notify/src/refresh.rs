//! Per-page refresh signals driven by push events.

use tokio::sync::watch;
use tracing::trace;

use fleetlive_connection::{Dispatcher, Predicate, SubscriptionGuard};

/// Bumps a generation counter whenever one of a page's event types arrives.
///
/// A page holds a [`watch::Receiver`] and re-fetches its data whenever the
/// value changes. Several events in a burst may coalesce into one wake-up.
/// Dropping the trigger unsubscribes it and ends every receiver's stream.
#[derive(Debug)]
pub struct RefreshTrigger {
    generation: watch::Receiver<u64>,
    _subscription: SubscriptionGuard,
}

impl RefreshTrigger {
    pub fn attach(dispatcher: &Dispatcher, types: impl Into<Predicate>) -> Self {
        let (tx, generation) = watch::channel(0u64);
        let subscription = dispatcher.subscribe_scoped(types, move |envelope| {
            tx.send_modify(|g| *g += 1);
            trace!(
                event_type = envelope.event_type(),
                generation = *tx.borrow(),
                "refresh requested"
            );
            Ok(())
        });
        Self {
            generation,
            _subscription: subscription,
        }
    }

    /// Number of matching events seen so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// A receiver that wakes on every bump.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.clone()
    }
}
