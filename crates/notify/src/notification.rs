//! Transient notifications for push events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

use fleetlive_connection::{Dispatcher, Predicate, SubscriptionGuard};
use fleetlive_protocol::{
    ContainerRestarted, DependencyIgnored, EventEnvelope, StatusChanged, UpdateAvailable, kinds,
};

use crate::toast::{Toast, ToastKind, ToastQueue};

/// Renders every push event into a toast while notifications are enabled.
///
/// The enable flag is shared with the settings screen, so flipping it takes
/// effect on the next event. Dropping the layer unsubscribes it.
#[derive(Debug)]
pub struct NotificationLayer {
    queue: Arc<Mutex<ToastQueue>>,
    enabled: Arc<AtomicBool>,
    _subscription: SubscriptionGuard,
}

impl NotificationLayer {
    pub fn attach(dispatcher: &Dispatcher, enabled: Arc<AtomicBool>) -> Self {
        Self::attach_with_queue(dispatcher, enabled, ToastQueue::new())
    }

    /// Attaches with a preconfigured queue.
    pub fn attach_with_queue(
        dispatcher: &Dispatcher,
        enabled: Arc<AtomicBool>,
        queue: ToastQueue,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));
        let sink = queue.clone();
        let flag = enabled.clone();
        let subscription = dispatcher.subscribe_scoped(Predicate::all(), move |envelope| {
            if !flag.load(Ordering::Relaxed) {
                return Ok(());
            }
            let (kind, title, message) = render(envelope);
            let id = lock(&sink).push_for_event(kind, title, message, envelope.event_type());
            debug!(toast = id, event_type = envelope.event_type(), "toast queued");
            Ok(())
        });
        Self {
            queue,
            enabled,
            _subscription: subscription,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot of the queued toasts, oldest first.
    pub fn toasts(&self) -> Vec<Toast> {
        lock(&self.queue).iter().cloned().collect()
    }

    /// Dismisses one toast. Returns `true` if it was still queued.
    pub fn dismiss(&self, id: u64) -> bool {
        lock(&self.queue).remove(id)
    }

    pub fn clear(&self) {
        lock(&self.queue).clear();
    }

    /// Unsubscribes. Same as dropping the layer.
    pub fn detach(self) {}
}

fn lock(queue: &Mutex<ToastQueue>) -> MutexGuard<'_, ToastQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Picks kind, title and body for an event.
fn render(envelope: &EventEnvelope) -> (ToastKind, String, Option<String>) {
    match envelope.event_type() {
        kinds::UPDATE_AVAILABLE => {
            if let Ok(update) = envelope.parse_data::<UpdateAvailable>() {
                return render_update(&update);
            }
        }
        kinds::CONTAINER_RESTARTED => {
            if let Ok(restart) = envelope.parse_data::<ContainerRestarted>() {
                return (
                    ToastKind::Warning,
                    format!("{} restarted", restart.container),
                    restart.reason,
                );
            }
        }
        kinds::DEPENDENCY_IGNORED => {
            if let Ok(ignored) = envelope.parse_data::<DependencyIgnored>() {
                return (
                    ToastKind::Info,
                    format!("Ignoring {} for {}", ignored.dependency, ignored.container),
                    None,
                );
            }
        }
        kinds::UPDATE_APPLIED => {
            return (
                ToastKind::Success,
                humanize(envelope.event_type()),
                container_of(envelope.data()).map(str::to_string),
            );
        }
        kinds::STATUS_CHANGED => {
            if let Ok(changed) = envelope.parse_data::<StatusChanged>() {
                let title = match &changed.container {
                    Some(container) => format!("{container} is {}", changed.status),
                    None => format!("Status: {}", changed.status),
                };
                return (ToastKind::Info, title, None);
            }
        }
        _ => {}
    }

    if kinds::is_known(envelope.event_type()) {
        debug!(
            event_type = envelope.event_type(),
            "unexpected payload shape, using generic toast"
        );
    } else {
        debug!(event_type = envelope.event_type(), "unrecognised event kind");
    }
    (
        ToastKind::Info,
        humanize(envelope.event_type()),
        container_of(envelope.data()).map(str::to_string),
    )
}

fn render_update(update: &UpdateAvailable) -> (ToastKind, String, Option<String>) {
    let title = match (&update.current_version, &update.latest_version) {
        (Some(current), Some(latest)) => {
            format!("Update available for {}: {current} → {latest}", update.container)
        }
        (None, Some(latest)) => format!("Update available for {}: {latest}", update.container),
        _ => format!("Update available for {}", update.container),
    };
    (ToastKind::Info, title, Some(update.image.clone()))
}

fn container_of(data: &Value) -> Option<&str> {
    data.get("container").and_then(Value::as_str)
}

/// `"status_changed"` becomes `"Status changed"`.
fn humanize(event_type: &str) -> String {
    let spaced = event_type.replace(['_', '-', '.'], " ");
    let trimmed = spaced.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Event".to_string(),
    }
}
