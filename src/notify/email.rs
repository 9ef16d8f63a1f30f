//! Email Delivery Engine.
//!
//! Renders a templated message (severity maps to an accent color) with an
//! optional call-to-action deep link and submits it to the configured SMTP
//! relay. Without a configured relay the channel degrades to a no-op:
//! email is optional, and its absence is never an error.

use std::sync::Arc;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use crate::database::models::{NotificationDbModel, NotificationKind, RelatedKind};
use crate::database::repositories::{NotificationRepository, UserRepository};
use crate::{Error, Result};

/// SMTP relay configuration. Absent config means the email channel is
/// disabled, not broken.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: String,
}

impl EmailConfig {
    /// `Ok(None)` when `SMTP_HOST` is unset: the channel is simply disabled.
    pub fn from_env() -> Result<Option<Self>> {
        let smtp_host = match std::env::var("SMTP_HOST") {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
            _ => return Ok(None),
        };

        let smtp_port = match std::env::var("SMTP_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::config(format!("Invalid SMTP_PORT: {}", raw)))?,
            Err(_) => 587,
        };

        let from_address = std::env::var("SMTP_FROM")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::config("SMTP_FROM must be set when SMTP_HOST is configured".to_string())
            })?;

        let smtp_username = std::env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty());
        let smtp_password = std::env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty());

        Ok(Some(Self {
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            from_address,
        }))
    }
}

type Mailer = AsyncSmtpTransport<Tokio1Executor>;

/// Outcome of a single send.
#[derive(Debug, Clone, Default)]
pub struct EmailSendResult {
    pub success: bool,
    pub message_id: Option<String>,
}

/// Aggregate over a recipient set. Recipients without an address are not
/// part of `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmailFanout {
    pub sent: usize,
    pub total: usize,
}

/// The email delivery engine.
pub struct EmailEngine {
    transport: Option<(Mailer, Mailbox)>,
    base_url: String,
    users: Arc<dyn UserRepository>,
    notifications: Arc<dyn NotificationRepository>,
}

impl EmailEngine {
    pub fn new(
        config: Option<EmailConfig>,
        base_url: impl Into<String>,
        users: Arc<dyn UserRepository>,
        notifications: Arc<dyn NotificationRepository>,
    ) -> Result<Self> {
        let transport = match config {
            None => None,
            Some(config) => {
                let from: Mailbox = config
                    .from_address
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid SMTP_FROM address: {}", e)))?;

                let mut builder = Mailer::starttls_relay(&config.smtp_host)
                    .map_err(|e| Error::config(format!("Invalid SMTP relay: {}", e)))?
                    .port(config.smtp_port);
                if let (Some(username), Some(password)) =
                    (&config.smtp_username, &config.smtp_password)
                {
                    builder =
                        builder.credentials(Credentials::new(username.clone(), password.clone()));
                }

                Some((builder.build(), from))
            }
        };

        Ok(Self {
            transport,
            base_url: base_url.into(),
            users,
            notifications,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Render and send one message. Never throws: a missing transport, a bad
    /// address or a relay failure all come back as `success: false`.
    pub async fn send_to_recipient(
        &self,
        address: &str,
        display_name: &str,
        title: &str,
        body: &str,
        kind: NotificationKind,
        related: Option<(RelatedKind, &str)>,
    ) -> EmailSendResult {
        let Some((mailer, from)) = &self.transport else {
            debug!("Email channel disabled; skipping send");
            return EmailSendResult::default();
        };

        let to = match address.parse::<lettre::Address>() {
            Ok(addr) => Mailbox::new(Some(display_name.to_string()), addr),
            Err(e) => {
                warn!(address = %address, error = %e, "Invalid recipient email address");
                return EmailSendResult::default();
            }
        };

        let action_url = related.map(|r| self.action_url(r));
        let subject = format!("[Tasktide] {}", title);
        let text = render_text(title, body, action_url.as_deref());
        let html = render_html(title, body, kind, action_url.as_deref());

        let message = match Message::builder()
            .from(from.clone())
            .to(to)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(text, html))
        {
            Ok(message) => message,
            Err(e) => {
                warn!(address = %address, error = %e, "Failed to build email message");
                return EmailSendResult::default();
            }
        };

        match mailer.send(message).await {
            Ok(response) => EmailSendResult {
                success: true,
                message_id: response.first_line().map(str::to_string),
            },
            Err(e) => {
                warn!(address = %address, error = %e, "Email delivery failed");
                EmailSendResult::default()
            }
        }
    }

    /// Resolve recipient ids to addresses and send individually, continuing
    /// past per-recipient failures. Each success records the per-recipient
    /// delivery against the notification.
    pub async fn send_to_many(
        &self,
        recipient_ids: &[String],
        notification: &NotificationDbModel,
    ) -> EmailFanout {
        if !self.is_enabled() || recipient_ids.is_empty() {
            return EmailFanout::default();
        }

        let users = match self.users.find_many(recipient_ids).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Failed to resolve email recipients");
                return EmailFanout::default();
            }
        };

        let related = notification.related();
        let related = related.as_ref().map(|(kind, id)| (*kind, id.as_str()));

        let mut fanout = EmailFanout::default();
        for user in &users {
            let Some(address) = user.email.as_deref() else {
                continue;
            };
            fanout.total += 1;

            let result = self
                .send_to_recipient(
                    address,
                    &user.display_name,
                    &notification.title,
                    &notification.body,
                    notification.kind(),
                    related,
                )
                .await;

            if result.success {
                fanout.sent += 1;
                if let Err(e) = self
                    .notifications
                    .mark_email_sent(&notification.id, &user.id)
                    .await
                {
                    warn!(
                        notification_id = %notification.id,
                        user_id = %user.id,
                        error = %e,
                        "Failed to record email delivery"
                    );
                }
            }
        }

        fanout
    }

    fn action_url(&self, related: (RelatedKind, &str)) -> String {
        match related {
            (RelatedKind::Task, id) => format!("{}/tasks/{}", self.base_url, id),
            (RelatedKind::Event, id) => format!("{}/calendar?event={}", self.base_url, id),
        }
    }
}

fn accent_color(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Info => "#3498db",
        NotificationKind::Success => "#2ecc71",
        NotificationKind::Warning => "#f39c12",
        NotificationKind::Error => "#e74c3c",
    }
}

fn render_text(title: &str, body: &str, action_url: Option<&str>) -> String {
    match action_url {
        Some(url) => format!("{}\n\n{}\n\n{}", title, body, url),
        None => format!("{}\n\n{}", title, body),
    }
}

fn render_html(title: &str, body: &str, kind: NotificationKind, action_url: Option<&str>) -> String {
    let action = match action_url {
        Some(url) => format!(
            r#"<p><a href="{}" style="color: {};">Open in Tasktide</a></p>"#,
            url,
            accent_color(kind)
        ),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background-color: {}; color: white; padding: 15px; border-radius: 5px; }}
        .content {{ padding: 20px; background-color: #f9f9f9; border-radius: 5px; margin-top: 10px; }}
        .footer {{ color: #666; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="header">
        <h2>{}</h2>
    </div>
    <div class="content">
        <p>{}</p>
        {}
    </div>
    <div class="footer">
        <p>You are receiving this because of your Tasktide reminder settings.</p>
    </div>
</body>
</html>"#,
        accent_color(kind),
        title,
        body,
        action
    )
}
