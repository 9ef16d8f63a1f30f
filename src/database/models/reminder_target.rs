//! Read-only views over tasks and events eligible for reminders.

use serde::{Deserialize, Serialize};

use super::RelatedKind;

/// Task priority, rendered as a marker glyph in reminder titles.
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
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::High => "🔴",
            Self::Medium => "🟡",
            Self::Low => "🟢",
        }
    }
}

/// A task or event due within a scanned day window, joined with the user ids
/// it should remind. Produced by the owning domain's tables; never mutated
/// by the reminder service.
#[derive(Debug, Clone)]
pub struct ReminderTarget {
    pub kind: RelatedKind,
    pub id: String,
    pub title: String,
    /// Due (tasks) or start (events) instant, Unix epoch milliseconds UTC.
    pub due_at_ms: i64,
    /// Tasks only.
    pub priority: Option<TaskPriority>,
    /// Events only.
    pub location: Option<String>,
    /// Assignees (tasks) or attendees (events).
    pub recipients: Vec<String>,
}
