//! Read queries over the task/event domain for the reminder scanner.
//!
//! The task and event tables belong to the surrounding product; this
//! repository only ever reads them. Targets come back joined with their
//! recipient sets, so an item nobody is assigned to never reaches the
//! scanner.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{RelatedKind, ReminderTarget, TaskPriority};
use crate::Result;

/// Query surface over "items needing reminders".
#[async_trait]
pub trait ReminderTargetRepository: Send + Sync {
    /// Open tasks (pending or in progress) due within `[start_ms, end_ms)`,
    /// with their assignee ids.
    async fn open_tasks_due_on(&self, start_ms: i64, end_ms: i64) -> Result<Vec<ReminderTarget>>;

    /// Events starting within `[start_ms, end_ms)`, with their attendee ids.
    async fn events_on(&self, start_ms: i64, end_ms: i64) -> Result<Vec<ReminderTarget>>;
}

/// SQLx implementation of ReminderTargetRepository.
pub struct SqlxReminderTargetRepository {
    pool: SqlitePool,
}

impl SqlxReminderTargetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Fold (target row, recipient) pairs into targets, preserving query order.
fn fold_targets(
    kind: RelatedKind,
    rows: Vec<(String, String, i64, Option<String>, Option<String>, String)>,
) -> Vec<ReminderTarget> {
    let mut targets: Vec<ReminderTarget> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for (id, title, due_at_ms, priority, location, user_id) in rows {
        match index_by_id.get(&id) {
            Some(&i) => targets[i].recipients.push(user_id),
            None => {
                index_by_id.insert(id.clone(), targets.len());
                targets.push(ReminderTarget {
                    kind,
                    id,
                    title,
                    due_at_ms,
                    priority: priority.as_deref().and_then(|p| p.parse::<TaskPriority>().ok()),
                    location,
                    recipients: vec![user_id],
                });
            }
        }
    }

    targets
}

#[async_trait]
impl ReminderTargetRepository for SqlxReminderTargetRepository {
    async fn open_tasks_due_on(&self, start_ms: i64, end_ms: i64) -> Result<Vec<ReminderTarget>> {
        let rows: Vec<(String, String, i64, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT t.id, t.title, t.due_at, t.priority, NULL, a.user_id
                FROM task t
                INNER JOIN task_assignee a ON a.task_id = t.id
                WHERE t.due_at >= ? AND t.due_at < ?
                  AND t.status IN ('pending', 'in_progress')
                ORDER BY t.due_at, t.id, a.user_id
                "#,
            )
            .bind(start_ms)
            .bind(end_ms)
            .fetch_all(&self.pool)
            .await?;

        Ok(fold_targets(RelatedKind::Task, rows))
    }

    async fn events_on(&self, start_ms: i64, end_ms: i64) -> Result<Vec<ReminderTarget>> {
        let rows: Vec<(String, String, i64, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT e.id, e.title, e.starts_at, NULL, e.location, a.user_id
                FROM event e
                INNER JOIN event_attendee a ON a.event_id = e.id
                WHERE e.starts_at >= ? AND e.starts_at < ?
                ORDER BY e.starts_at, e.id, a.user_id
                "#,
            )
            .bind(start_ms)
            .bind(end_ms)
            .fetch_all(&self.pool)
            .await?;

        Ok(fold_targets(RelatedKind::Event, rows))
    }
}
