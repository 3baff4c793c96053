//! Dashboard-side consumers of fleetlive push events.
//!
//! - [`NotificationLayer`]: turns events into transient toasts.
//! - [`RefreshTrigger`]: tells a page to re-fetch when its events arrive.

pub mod notification;
pub mod refresh;
pub mod toast;

pub use notification::NotificationLayer;
pub use refresh::RefreshTrigger;
pub use toast::{Toast, ToastKind, ToastQueue};
