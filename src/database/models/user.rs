//! User database model.
//!
//! Accounts are owned by the surrounding product; the reminder service reads
//! them to resolve recipient ids into display names and email addresses.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    pub id: String,
    pub display_name: String,
    /// Nullable: recipients without an address are skipped by the email
    /// channel.
    pub email: Option<String>,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC).
    pub updated_at: i64,
}

impl UserDbModel {
    pub fn new(display_name: impl Into<String>, email: Option<String>) -> Self {
        let now = time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            email,
            created_at: now,
            updated_at: now,
        }
    }
}
