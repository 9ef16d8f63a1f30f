//! Web push subscription repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::WebPushSubscriptionDbModel;
use crate::database::time;
use crate::Result;

/// Web push subscription repository trait.
#[async_trait]
pub trait PushSubscriptionRepository: Send + Sync {
    /// Register or refresh an endpoint for a recipient.
    ///
    /// Conflicts on (user_id, endpoint) update the key material in place, so
    /// a client re-registering after a key rotation never duplicates rows.
    async fn upsert(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<WebPushSubscriptionDbModel>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<WebPushSubscriptionDbModel>>;

    /// Client-initiated unsubscribe. Idempotent.
    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<()>;

    /// Batch removal of subscriptions whose endpoints the push service
    /// reported permanently gone. Idempotent; returns the number of rows
    /// removed.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64>;
}

/// SQLx implementation of PushSubscriptionRepository.
pub struct SqlxPushSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxPushSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushSubscriptionRepository for SqlxPushSubscriptionRepository {
    async fn upsert(
        &self,
        user_id: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<WebPushSubscriptionDbModel> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = time::now_ms();

        sqlx::query(
            r#"
            INSERT INTO web_push_subscription (
                id, user_id, endpoint, p256dh, auth, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, endpoint) DO UPDATE SET
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(endpoint)
        .bind(p256dh)
        .bind(auth)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, WebPushSubscriptionDbModel>(
            "SELECT * FROM web_push_subscription WHERE user_id = ? AND endpoint = ? LIMIT 1",
        )
        .bind(user_id)
        .bind(endpoint)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<WebPushSubscriptionDbModel>> {
        let rows = sqlx::query_as::<_, WebPushSubscriptionDbModel>(
            "SELECT * FROM web_push_subscription WHERE user_id = ? ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, user_id: &str, endpoint: &str) -> Result<()> {
        sqlx::query("DELETE FROM web_push_subscription WHERE user_id = ? AND endpoint = ?")
            .bind(user_id)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder =
            sqlx::QueryBuilder::<sqlx::Sqlite>::new("DELETE FROM web_push_subscription WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
