//! User repository.
//!
//! Read surface over the product's account table, used to resolve recipient
//! ids for email delivery. `create` exists for the product's own write path
//! and for test seeding.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::UserDbModel;
use crate::Result;

/// User repository trait.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &UserDbModel) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<UserDbModel>>;

    /// Resolve a set of recipient ids; ids without a matching row are simply
    /// absent from the result.
    async fn find_many(&self, ids: &[String]) -> Result<Vec<UserDbModel>>;
}

/// SQLx implementation of UserRepository.
pub struct SqlxUserRepository {
    pool: SqlitePool,
}

impl SqlxUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &UserDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, email, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserDbModel>> {
        let row = sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<UserDbModel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder =
            sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM users WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY id");

        let rows = builder
            .build_query_as::<UserDbModel>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
