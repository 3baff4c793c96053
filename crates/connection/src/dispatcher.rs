//! Subscriber registry and event fan-out.
//!
//! Handlers run outside the registry lock, one after another in
//! registration order. Each call is isolated: an `Err` or a panic from one
//! handler is logged and the remaining handlers still see the envelope.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use fleetlive_protocol::EventEnvelope;

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of a subscriber callback.
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Box<dyn Fn(&EventEnvelope) -> HandlerResult + Send + Sync>;

/// Returned by a handler to remove its own subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("subscriber is gone")]
pub struct SubscriberGone;

/// Which envelopes a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every envelope.
    All,
    /// Envelopes whose type is in the set.
    Types(BTreeSet<String>),
}

impl Predicate {
    pub fn all() -> Self {
        Predicate::All
    }

    pub fn one(event_type: impl Into<String>) -> Self {
        Predicate::Types(BTreeSet::from([event_type.into()]))
    }

    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::Types(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Types(types) => types.contains(event_type),
        }
    }
}

impl From<&str> for Predicate {
    fn from(event_type: &str) -> Self {
        Predicate::one(event_type)
    }
}

impl From<String> for Predicate {
    fn from(event_type: String) -> Self {
        Predicate::one(event_type)
    }
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Outcome of one [`Dispatcher::publish`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscriptions whose predicate matched.
    pub matched: usize,
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

struct Subscription {
    handle: SubscriptionHandle,
    predicate: Predicate,
    handler: Handler,
    active: AtomicBool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Arc<Subscription>>,
}

impl Registry {
    fn remove(&mut self, handle: SubscriptionHandle) -> bool {
        match self.entries.iter().position(|s| s.handle == handle) {
            Some(pos) => {
                let sub = self.entries.remove(pos);
                sub.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Subscriber registry with isolated fan-out.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for envelopes matching `predicate`.
    pub fn subscribe<F>(&self, predicate: impl Into<Predicate>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let handle = SubscriptionHandle(registry.next_id);
        registry.entries.push(Arc::new(Subscription {
            handle,
            predicate: predicate.into(),
            handler: Box::new(handler),
            active: AtomicBool::new(true),
        }));
        trace!(subscription = handle.0, "subscribed");
        handle
    }

    /// Like [`subscribe`](Self::subscribe), but the subscription ends when the
    /// returned guard is dropped.
    pub fn subscribe_scoped<F>(
        &self,
        predicate: impl Into<Predicate>,
        handler: F,
    ) -> SubscriptionGuard
    where
        F: Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    {
        let handle = self.subscribe(predicate, handler);
        SubscriptionGuard {
            registry: Arc::downgrade(&self.registry),
            handle,
        }
    }

    /// Delivers matching envelopes into a bounded channel.
    ///
    /// Publishing never waits on the receiver: when the channel is full the
    /// envelope is dropped for this subscriber only. Dropping the receiver
    /// ends the subscription on the next matching publish.
    pub fn subscribe_channel(
        &self,
        predicate: impl Into<Predicate>,
        capacity: usize,
    ) -> (SubscriptionHandle, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = self.subscribe(predicate, move |envelope| {
            tx.try_send(envelope.clone()).map_err(|e| match e {
                TrySendError::Full(_) => HandlerError::from("subscriber channel full"),
                TrySendError::Closed(_) => HandlerError::from(SubscriberGone),
            })
        });
        (handle, rx)
    }

    /// Removes a subscription. Unknown or already removed handles are a
    /// no-op; returns whether anything was removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = lock(&self.registry).remove(handle);
        if removed {
            trace!(subscription = handle.0, "unsubscribed");
        }
        removed
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `envelope` to every matching subscriber.
    pub fn publish(&self, envelope: &EventEnvelope) -> DeliveryReport {
        self.publish_while(envelope, || true)
    }

    /// Like [`publish`](Self::publish), but checks `keep_going` before each
    /// handler and stops delivering as soon as it returns `false`.
    pub(crate) fn publish_while(
        &self,
        envelope: &EventEnvelope,
        keep_going: impl Fn() -> bool,
    ) -> DeliveryReport {
        let event_type = envelope.event_type();
        let targets: Vec<Arc<Subscription>> = lock(&self.registry)
            .entries
            .iter()
            .filter(|s| s.predicate.matches(event_type))
            .cloned()
            .collect();

        let mut report = DeliveryReport {
            matched: targets.len(),
            ..DeliveryReport::default()
        };

        for sub in targets {
            if !keep_going() {
                debug!(event_type, "delivery interrupted");
                break;
            }
            // Removed by an earlier handler during this publish.
            if !sub.active.load(Ordering::Acquire) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (sub.handler)(envelope))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) if e.is::<SubscriberGone>() => {
                    report.failed += 1;
                    debug!(subscription = sub.handle.0, "subscriber gone, removing");
                    self.unsubscribe(sub.handle);
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        subscription = sub.handle.0,
                        event_type,
                        error = %e,
                        "subscriber failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        subscription = sub.handle.0,
                        event_type,
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }

        trace!(
            event_type,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "published"
        );
        report
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Ends its subscription when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    registry: Weak<Mutex<Registry>>,
    handle: SubscriptionHandle,
}

impl SubscriptionGuard {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Unsubscribes now. Same as dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.handle);
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("handle", &self.handle)
            .finish()
    }
}
