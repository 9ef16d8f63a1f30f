//! Notification repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{NotificationDbModel, RelatedKind, ReminderCategory};
use crate::database::time;
use crate::Result;

/// Notification repository trait.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Persist a notification.
    ///
    /// Returns `false` when the reminder uniqueness index already holds a row
    /// for the same (target, category, day): the write is silently suppressed
    /// so concurrent or repeated scans converge on one record per day.
    async fn create(&self, notification: &NotificationDbModel) -> Result<bool>;

    async fn find_by_id(&self, id: &str) -> Result<Option<NotificationDbModel>>;

    /// Dedup pre-check: has a reminder with this category already been
    /// created for this target on the given service-zone day?
    async fn reminder_exists(
        &self,
        related_kind: RelatedKind,
        related_id: &str,
        category: ReminderCategory,
        day: &str,
    ) -> Result<bool>;

    /// Record a successful email delivery for one recipient of one record.
    ///
    /// Idempotent: the per-(record, recipient) delivery row has a primary key
    /// and the record-level flag is a monotonic bookkeeping bit.
    async fn mark_email_sent(&self, notification_id: &str, user_id: &str) -> Result<()>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, notification: &NotificationDbModel) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification (
                id, recipients, title, body, kind, related_kind, related_id,
                reminder_key, read_by, email_sent, created_at, created_day
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.recipients)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.kind)
        .bind(&notification.related_kind)
        .bind(&notification.related_id)
        .bind(&notification.reminder_key)
        .bind(&notification.read_by)
        .bind(notification.email_sent)
        .bind(notification.created_at)
        .bind(&notification.created_day)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<NotificationDbModel>> {
        let row = sqlx::query_as::<_, NotificationDbModel>(
            "SELECT * FROM notification WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn reminder_exists(
        &self,
        related_kind: RelatedKind,
        related_id: &str,
        category: ReminderCategory,
        day: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM notification
                WHERE related_kind = ? AND related_id = ?
                  AND reminder_key = ? AND created_day = ?
            )
            "#,
        )
        .bind(related_kind.to_string())
        .bind(related_id)
        .bind(category.to_string())
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_email_sent(&self, notification_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO notification_email_delivery (notification_id, user_id, sent_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(time::now_ms())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE notification SET email_sent = 1 WHERE id = ? AND email_sent = 0")
            .bind(notification_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
