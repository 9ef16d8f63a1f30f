//! Repository traits and their SQLx implementations.

mod notification;
mod push_subscription;
mod reminder_targets;
mod user;

pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use push_subscription::{PushSubscriptionRepository, SqlxPushSubscriptionRepository};
pub use reminder_targets::{ReminderTargetRepository, SqlxReminderTargetRepository};
pub use user::{SqlxUserRepository, UserRepository};
