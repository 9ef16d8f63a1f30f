//! Web push subscription database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One registered push endpoint for one recipient.
///
/// At most one row per (user, endpoint): re-registering the same endpoint
/// refreshes the key material in place. Rows disappear either through an
/// explicit client unsubscribe or when the push service reports the endpoint
/// permanently gone.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebPushSubscriptionDbModel {
    pub id: String,
    pub user_id: String,
    /// Push service URL; opaque to us beyond its origin.
    pub endpoint: String,
    /// Client public key (base64url, uncompressed SEC1 point).
    pub p256dh: String,
    /// Client auth secret (base64url, 16 bytes).
    pub auth: String,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC).
    pub updated_at: i64,
}
