//! Notification database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;

/// Severity of a notification, reflected as an accent color/icon in every
/// delivery channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Kind of the domain object a notification refers back to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RelatedKind {
    Task,
    Event,
}

/// Which reminder rule produced a notification.
///
/// Distinct tags per (item class, horizon) pair: the same target may receive
/// both a "tomorrow" and a "today" reminder on consecutive days, and the
/// per-day dedup window is keyed on this tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ReminderCategory {
    TaskDueTomorrow,
    TaskDueToday,
    EventDueTomorrow,
    EventDueToday,
}

/// Notification database model.
///
/// One row per logical notification, addressing one or many recipients.
/// Immutable after creation except for the per-recipient read set and the
/// email bookkeeping flag.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    /// JSON array of recipient user ids.
    pub recipients: String,
    pub title: String,
    pub body: String,
    /// Persisted `NotificationKind`.
    pub kind: String,
    pub related_kind: Option<String>,
    pub related_id: Option<String>,
    /// Persisted `ReminderCategory`; NULL for non-reminder notifications.
    pub reminder_key: Option<String>,
    /// JSON array of user ids that have read the notification.
    pub read_by: String,
    pub email_sent: bool,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
    /// Calendar day in the service time zone, `YYYY-MM-DD`.
    pub created_day: String,
}

impl NotificationDbModel {
    pub fn new(
        recipients: &[String],
        title: impl Into<String>,
        body: impl Into<String>,
        kind: NotificationKind,
        related: Option<(RelatedKind, &str)>,
        reminder: Option<ReminderCategory>,
        created_day: impl Into<String>,
    ) -> Self {
        let (related_kind, related_id) = match related {
            Some((kind, id)) => (Some(kind.to_string()), Some(id.to_string())),
            None => (None, None),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipients: serde_json::to_string(recipients).unwrap_or_else(|_| "[]".to_string()),
            title: title.into(),
            body: body.into(),
            kind: kind.to_string(),
            related_kind,
            related_id,
            reminder_key: reminder.map(|r| r.to_string()),
            read_by: "[]".to_string(),
            email_sent: false,
            created_at: time::now_ms(),
            created_day: created_day.into(),
        }
    }

    /// Recipient user ids.
    pub fn recipient_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.recipients).unwrap_or_default()
    }

    /// Typed severity; unknown stored values read as `Info`.
    pub fn kind(&self) -> NotificationKind {
        self.kind.parse().unwrap_or(NotificationKind::Info)
    }

    /// The (kind, id) pair of the domain object this notification refers to.
    pub fn related(&self) -> Option<(RelatedKind, String)> {
        let kind = self.related_kind.as_deref()?.parse::<RelatedKind>().ok()?;
        let id = self.related_id.clone()?;
        Some((kind, id))
    }
}
