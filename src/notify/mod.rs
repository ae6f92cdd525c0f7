//! Notification intents, formatting and delivery
//!
//! A run produces [`NotificationIntent`]s; a [`Dispatcher`] turns each into
//! a message and reports an [`Ack`] or a [`DispatchError`]. The radar only
//! persists a sent-flag after an `Ack`.

pub mod format;
pub mod intent;
pub mod notifier;

pub use format::format_intent;
pub use intent::{Deviation, MetricChangeNotice, NotificationIntent, ReleaseNotice, WarningNotice};
pub use notifier::{Ack, DispatchError, Dispatcher, Notifier, NotifyTarget, RecordingDispatcher};
