//! Push Delivery Engine.
//!
//! Sends one encrypted message per registered subscription, classifies
//! transport failures, and prunes subscriptions whose endpoints the push
//! service reports permanently gone. Without VAPID keys the engine is inert:
//! every send no-ops with zero counts, since push is an optional feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::models::{NotificationDbModel, RelatedKind, WebPushSubscriptionDbModel};
use crate::database::repositories::PushSubscriptionRepository;
use crate::database::time;
use crate::notify::push_crypto::{self, AUTH_SECRET_LEN, PUBLIC_KEY_LEN};
use crate::{Error, Result};

/// Push message time-to-live. Reminders are calendar-day granular, so a
/// message undeliverable for a day is stale.
const PUSH_TTL_SECS: u32 = 86_400;
const PUSH_URGENCY: &str = "high";
const MAX_PAYLOAD_BYTES: usize = 3500;
const FANOUT_CONCURRENCY: usize = 8;
const VAPID_TOKEN_EXP_SECS: i64 = 12 * 60 * 60;
const VAPID_TOKEN_SKEW_SECS: i64 = 60;

/// Server-side VAPID key material. Absent config means the push channel is
/// disabled, not broken.
#[derive(Debug, Clone)]
pub struct WebPushConfig {
    public_key_b64: String,
    private_key: [u8; 32],
    subject: String,
}

impl WebPushConfig {
    pub fn new(
        public_key_b64: impl Into<String>,
        private_key_b64: &str,
        subject: impl Into<String>,
    ) -> Result<Self> {
        let public_key_b64 = public_key_b64.into();

        let public_raw = push_crypto::decode_b64url(&public_key_b64)
            .map_err(|e| Error::config(format!("Invalid WEB_PUSH_VAPID_PUBLIC_KEY: {}", e)))?;
        let _public_raw: [u8; PUBLIC_KEY_LEN] = public_raw.try_into().map_err(|_| {
            Error::config(format!(
                "WEB_PUSH_VAPID_PUBLIC_KEY must decode to {} bytes",
                PUBLIC_KEY_LEN
            ))
        })?;

        let private_raw = push_crypto::decode_b64url(private_key_b64)
            .map_err(|e| Error::config(format!("Invalid WEB_PUSH_VAPID_PRIVATE_KEY: {}", e)))?;
        let private_key: [u8; 32] = private_raw.try_into().map_err(|_| {
            Error::config("WEB_PUSH_VAPID_PRIVATE_KEY must decode to 32 bytes".to_string())
        })?;

        Ok(Self {
            public_key_b64,
            private_key,
            subject: subject.into(),
        })
    }

    /// `Ok(None)` when neither key is set: the channel is simply disabled.
    /// Setting only one of the two keys is a configuration error.
    pub fn from_env() -> Result<Option<Self>> {
        let public = std::env::var("WEB_PUSH_VAPID_PUBLIC_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let private = std::env::var("WEB_PUSH_VAPID_PRIVATE_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let (public, private) = match (public, private) {
            (None, None) => return Ok(None),
            (Some(public), Some(private)) => (public, private),
            _ => {
                return Err(Error::config(
                    "Both WEB_PUSH_VAPID_PUBLIC_KEY and WEB_PUSH_VAPID_PRIVATE_KEY must be set"
                        .to_string(),
                ));
            }
        };

        let subject = std::env::var("WEB_PUSH_VAPID_SUBJECT")
            .unwrap_or_else(|_| "mailto:admin@localhost".to_string());

        Ok(Some(Self::new(public, &private, subject)?))
    }

    pub fn public_key_b64(&self) -> &str {
        &self.public_key_b64
    }
}

/// Payload pushed to the browser.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    pub kind: String,
    pub created_at: String,
}

impl PushPayload {
    pub fn for_notification(notification: &NotificationDbModel) -> Self {
        let url = match notification.related() {
            Some((RelatedKind::Task, id)) => format!("/tasks/{}", id),
            Some((RelatedKind::Event, id)) => format!("/calendar?event={}", id),
            None => "/notifications".to_string(),
        };

        Self {
            title: notification.title.clone(),
            body: notification.body.clone(),
            url,
            kind: notification.kind.clone(),
            created_at: time::ms_to_datetime(notification.created_at).to_rfc3339(),
        }
    }

    /// Serialize, falling back to a minimal body when the payload would
    /// exceed what push services accept.
    fn to_bytes_capped(&self, max_bytes: usize) -> Result<Vec<u8>> {
        let mut capped = self.clone();
        capped.title = truncate_chars(&capped.title, 120);
        capped.body = truncate_chars(&capped.body, 600);

        let bytes = serde_json::to_vec(&capped)?;
        if bytes.len() <= max_bytes {
            return Ok(bytes);
        }

        let minimal = PushPayload {
            title: truncate_chars(&capped.title, 80),
            body: "Open Tasktide to view details.".to_string(),
            url: capped.url,
            kind: capped.kind,
            created_at: capped.created_at,
        };
        Ok(serde_json::to_vec(&minimal)?)
    }
}

/// Fully assembled push request, ready for the wire.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub endpoint: String,
    pub body: Vec<u8>,
    /// `Encryption` header value (`salt=...`).
    pub encryption: String,
    /// `Crypto-Key` header value (`dh=...; p256ecdsa=...`).
    pub crypto_key: String,
    /// `Authorization` header value (`vapid t=..., k=...`).
    pub authorization: String,
    pub ttl_secs: u32,
    pub urgency: &'static str,
}

#[derive(Debug, Clone)]
pub struct PushResponse {
    pub status: u16,
    pub body: String,
}

/// Transport seam over the third-party push service POST.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, message: &PushMessage) -> Result<PushResponse>;
}

/// reqwest-backed production transport.
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl HttpPushTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build push HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn deliver(&self, message: &PushMessage) -> Result<PushResponse> {
        let response = self
            .client
            .post(&message.endpoint)
            .header("TTL", message.ttl_secs.to_string())
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header("Encryption", &message.encryption)
            .header("Crypto-Key", &message.crypto_key)
            .header("Authorization", &message.authorization)
            .header("Urgency", message.urgency)
            .body(message.body.clone())
            .send()
            .await
            .map_err(|e| Error::Other(format!("Web push request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());

        Ok(PushResponse {
            status,
            body: truncate_chars(&body, 500),
        })
    }
}

/// Per-recipient delivery counts. Pruned dead endpoints are not failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReceipt {
    pub sent: usize,
    pub failed: usize,
}

/// Aggregate over a recipient set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushFanout {
    pub total_sent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionOutcome {
    Delivered,
    /// 404/410: the push service will never accept this endpoint again.
    Dead,
    Failed,
}

#[derive(Debug, Clone)]
struct CachedVapidToken {
    token: String,
    exp_unix: i64,
}

/// The push delivery engine.
pub struct WebPushEngine {
    subscriptions: Arc<dyn PushSubscriptionRepository>,
    transport: Arc<dyn PushTransport>,
    config: Option<WebPushConfig>,
    vapid_token_cache: DashMap<String, CachedVapidToken>,
}

impl WebPushEngine {
    pub fn new(
        subscriptions: Arc<dyn PushSubscriptionRepository>,
        transport: Arc<dyn PushTransport>,
        config: Option<WebPushConfig>,
    ) -> Self {
        Self {
            subscriptions,
            transport,
            config,
            vapid_token_cache: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Deliver a payload to every subscription of one recipient.
    ///
    /// Not-subscribed is not a failure; neither is a dead endpoint, which is
    /// pruned in one batch after all subscriptions have been attempted.
    pub async fn send_to_recipient(
        &self,
        user_id: &str,
        payload: &PushPayload,
    ) -> Result<PushReceipt> {
        let Some(config) = &self.config else {
            return Ok(PushReceipt::default());
        };

        let subscriptions = self.subscriptions.list_for_user(user_id).await?;
        if subscriptions.is_empty() {
            return Ok(PushReceipt::default());
        }

        let payload_bytes = payload.to_bytes_capped(MAX_PAYLOAD_BYTES)?;

        let outcomes: Vec<(WebPushSubscriptionDbModel, SubscriptionOutcome)> =
            stream::iter(subscriptions)
                .map(|subscription| {
                    let payload_bytes = payload_bytes.clone();
                    async move {
                        let outcome = self
                            .send_to_subscription(config, &subscription, &payload_bytes)
                            .await;
                        (subscription, outcome)
                    }
                })
                .buffer_unordered(FANOUT_CONCURRENCY)
                .collect()
                .await;

        let mut receipt = PushReceipt::default();
        let mut dead_ids: Vec<String> = Vec::new();
        for (subscription, outcome) in outcomes {
            match outcome {
                SubscriptionOutcome::Delivered => receipt.sent += 1,
                SubscriptionOutcome::Dead => dead_ids.push(subscription.id),
                SubscriptionOutcome::Failed => receipt.failed += 1,
            }
        }

        if !dead_ids.is_empty() {
            match self.subscriptions.delete_by_ids(&dead_ids).await {
                Ok(removed) => info!(
                    user_id = %user_id,
                    removed,
                    "Pruned dead push subscriptions"
                ),
                Err(e) => warn!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to prune dead push subscriptions"
                ),
            }
        }

        Ok(receipt)
    }

    /// Fan a payload out to many recipients, isolating failures per
    /// recipient.
    pub async fn send_to_recipients(
        &self,
        user_ids: &[String],
        payload: &PushPayload,
    ) -> PushFanout {
        if !self.is_enabled() || user_ids.is_empty() {
            return PushFanout::default();
        }

        let total_sent = stream::iter(user_ids.to_vec())
            .map(|user_id: String| async move {
                match self.send_to_recipient(&user_id, payload).await {
                    Ok(receipt) => receipt.sent,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Push fan-out failed for recipient");
                        0
                    }
                }
            })
            .buffer_unordered(FANOUT_CONCURRENCY)
            .fold(0usize, |acc, sent| async move { acc + sent })
            .await;

        PushFanout { total_sent }
    }

    async fn send_to_subscription(
        &self,
        config: &WebPushConfig,
        subscription: &WebPushSubscriptionDbModel,
        payload: &[u8],
    ) -> SubscriptionOutcome {
        match self.try_send(config, subscription, payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    endpoint = %subscription.endpoint,
                    error = %e,
                    "Web push delivery failed"
                );
                SubscriptionOutcome::Failed
            }
        }
    }

    async fn try_send(
        &self,
        config: &WebPushConfig,
        subscription: &WebPushSubscriptionDbModel,
        payload: &[u8],
    ) -> Result<SubscriptionOutcome> {
        let client_public: [u8; PUBLIC_KEY_LEN] =
            decode_key(&subscription.p256dh, "p256dh")?;
        let client_auth: [u8; AUTH_SECRET_LEN] = decode_key(&subscription.auth, "auth")?;

        let encrypted = push_crypto::encrypt_payload(payload, &client_public, &client_auth)?;
        let audience = push_crypto::push_audience(&subscription.endpoint)?;
        let token = self.vapid_token_for(config, &audience)?;

        let message = PushMessage {
            endpoint: subscription.endpoint.clone(),
            body: encrypted.body,
            encryption: format!("salt={}", encrypted.salt_b64),
            crypto_key: format!("dh={}; p256ecdsa={}", encrypted.dh_b64, config.public_key_b64),
            authorization: format!("vapid t={}, k={}", token, config.public_key_b64),
            ttl_secs: PUSH_TTL_SECS,
            urgency: PUSH_URGENCY,
        };

        let response = self.transport.deliver(&message).await?;

        if (200..300).contains(&response.status) {
            debug!(endpoint = %subscription.endpoint, "Web push delivered");
            return Ok(SubscriptionOutcome::Delivered);
        }

        if response.status == 404 || response.status == 410 {
            info!(
                endpoint = %subscription.endpoint,
                status = response.status,
                "Push endpoint gone; subscription marked for removal"
            );
            return Ok(SubscriptionOutcome::Dead);
        }

        warn!(
            endpoint = %subscription.endpoint,
            status = response.status,
            body = %response.body,
            "Push service rejected delivery"
        );
        Ok(SubscriptionOutcome::Failed)
    }

    fn vapid_token_for(&self, config: &WebPushConfig, audience: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        if let Some(entry) = self.vapid_token_cache.get(audience)
            && entry.exp_unix - VAPID_TOKEN_SKEW_SECS > now
        {
            return Ok(entry.token.clone());
        }

        let (token, exp_unix) = push_crypto::vapid_token(
            audience,
            &config.subject,
            &config.private_key,
            VAPID_TOKEN_EXP_SECS,
        )?;
        self.vapid_token_cache.insert(
            audience.to_string(),
            CachedVapidToken {
                token: token.clone(),
                exp_unix,
            },
        );
        Ok(token)
    }
}

fn decode_key<const N: usize>(input: &str, what: &str) -> Result<[u8; N]> {
    let raw = push_crypto::decode_b64url(input)
        .map_err(|e| Error::Other(format!("Invalid {} key: {}", what, e)))?;
    raw.try_into()
        .map_err(|_| Error::Other(format!("Invalid {} key length", what)))
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut chars = input.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        match chars.next() {
            Some(c) => out.push(c),
            None => return out,
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
