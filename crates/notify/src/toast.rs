/// Default toast display duration in milliseconds.
pub const DEFAULT_DURATION_MS: u64 = 5000;

/// Warning and error toasts stay up longer.
pub const URGENT_DURATION_MS: u64 = 8000;

/// Oldest toasts are dropped beyond this many.
const DEFAULT_CAPACITY: usize = 20;

/// The visual category of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
}

impl ToastKind {
    /// How long a toast of this kind stays on screen.
    pub fn default_duration_ms(self) -> u64 {
        match self {
            ToastKind::Success | ToastKind::Info => DEFAULT_DURATION_MS,
            ToastKind::Warning | ToastKind::Error => URGENT_DURATION_MS,
        }
    }
}

/// One transient notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub title: String,
    pub message: Option<String>,
    /// The push event that produced this toast, if any.
    pub event_type: Option<String>,
    pub duration_ms: u64,
}

/// In-memory toast queue with monotonic ids.
///
/// Auto-dismissal is up to the UI; the queue only bounds its own length.
#[derive(Debug, Clone)]
pub struct ToastQueue {
    toasts: Vec<Toast>,
    next_id: u64,
    capacity: usize,
}

impl ToastQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A queue holding at most `capacity` toasts (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            toasts: Vec::new(),
            next_id: 0,
            capacity: capacity.max(1),
        }
    }

    /// Adds a toast with the kind's default duration and returns its id.
    pub fn push(
        &mut self,
        kind: ToastKind,
        title: impl Into<String>,
        message: Option<String>,
    ) -> u64 {
        self.insert(kind, title.into(), message, None)
    }

    /// Adds a toast rendered from a push event.
    pub fn push_for_event(
        &mut self,
        kind: ToastKind,
        title: impl Into<String>,
        message: Option<String>,
        event_type: impl Into<String>,
    ) -> u64 {
        self.insert(kind, title.into(), message, Some(event_type.into()))
    }

    fn insert(
        &mut self,
        kind: ToastKind,
        title: String,
        message: Option<String>,
        event_type: Option<String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.toasts.len() >= self.capacity {
            let overflow = self.toasts.len() + 1 - self.capacity;
            self.toasts.drain(..overflow);
        }
        self.toasts.push(Toast {
            id,
            kind,
            title,
            message,
            event_type,
            duration_ms: kind.default_duration_ms(),
        });
        id
    }

    /// Removes a toast by id. Returns `true` if it was present.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|t| t.id != id);
        self.toasts.len() != before
    }

    pub fn get(&self, id: u64) -> Option<&Toast> {
        self.toasts.iter().find(|t| t.id == id)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    pub fn clear(&mut self) {
        self.toasts.clear();
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new()
    }
}
