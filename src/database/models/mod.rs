//! Database row models.

mod notification;
mod push_subscription;
mod reminder_target;
mod user;

pub use notification::{NotificationDbModel, NotificationKind, RelatedKind, ReminderCategory};
pub use push_subscription::WebPushSubscriptionDbModel;
pub use reminder_target::{ReminderTarget, TaskPriority};
pub use user::UserDbModel;
