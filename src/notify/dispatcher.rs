//! Notification fan-out dispatcher.
//!
//! `notify` persists exactly one record for the whole audience and hands the
//! record to a delivery worker over a bounded channel, then returns. The
//! worker runs push and email fan-out concurrently; neither channel's
//! failure blocks the other, and nothing past the record write propagates
//! back to the caller.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::database::models::{
    NotificationDbModel, NotificationKind, RelatedKind, ReminderCategory,
};
use crate::database::repositories::NotificationRepository;
use crate::database::time;
use crate::notify::email::EmailEngine;
use crate::notify::push::{PushPayload, WebPushEngine};
use crate::{Error, Result};

const DELIVERY_QUEUE_CAPACITY: usize = 256;

/// One logical notification addressed to a non-empty audience.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub recipients: Vec<String>,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub related: Option<(RelatedKind, String)>,
    pub reminder: Option<ReminderCategory>,
}

struct DeliveryJob {
    notification: NotificationDbModel,
}

/// The fan-out dispatcher.
pub struct NotificationDispatcher {
    notifications: Arc<dyn NotificationRepository>,
    timezone: Tz,
    delivery_tx: Mutex<Option<mpsc::Sender<DeliveryJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        push: Arc<WebPushEngine>,
        email: Arc<EmailEngine>,
        timezone: Tz,
    ) -> Self {
        let (delivery_tx, mut delivery_rx) = mpsc::channel::<DeliveryJob>(DELIVERY_QUEUE_CAPACITY);

        let worker = tokio::spawn(async move {
            while let Some(job) = delivery_rx.recv().await {
                deliver(push.clone(), email.clone(), job.notification).await;
            }
            debug!("Notification delivery worker drained");
        });

        Self {
            notifications,
            timezone,
            delivery_tx: Mutex::new(Some(delivery_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Create and persist one notification record for the audience, then
    /// queue channel delivery. Returns once the record is stored; `Ok(None)`
    /// means the per-day reminder uniqueness suppressed a duplicate and no
    /// delivery was queued.
    pub async fn notify(&self, request: NotifyRequest) -> Result<Option<NotificationDbModel>> {
        if request.recipients.is_empty() {
            return Err(Error::validation(
                "notification requires at least one recipient",
            ));
        }

        let created_day = time::day_key(Utc::now(), self.timezone);
        let related = request
            .related
            .as_ref()
            .map(|(kind, id)| (*kind, id.as_str()));
        let notification = NotificationDbModel::new(
            &request.recipients,
            request.title,
            request.body,
            request.kind,
            related,
            request.reminder,
            created_day,
        );

        if !self.notifications.create(&notification).await? {
            debug!(
                related_id = ?notification.related_id,
                reminder_key = ?notification.reminder_key,
                "Duplicate reminder suppressed by uniqueness guard"
            );
            return Ok(None);
        }

        let sender = self.delivery_tx.lock().clone();
        match sender {
            Some(sender) => {
                if sender
                    .send(DeliveryJob {
                        notification: notification.clone(),
                    })
                    .await
                    .is_err()
                {
                    warn!(
                        notification_id = %notification.id,
                        "Delivery worker is gone; notification stored without fan-out"
                    );
                }
            }
            None => warn!(
                notification_id = %notification.id,
                "Dispatcher is shut down; notification stored without fan-out"
            ),
        }

        Ok(Some(notification))
    }

    /// Close the delivery queue and wait for queued deliveries to drain.
    pub async fn shutdown(&self) {
        let sender = self.delivery_tx.lock().take();
        drop(sender);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Notification delivery worker ended abnormally");
        }
    }
}

async fn deliver(push: Arc<WebPushEngine>, email: Arc<EmailEngine>, notification: NotificationDbModel) {
    let recipients = notification.recipient_ids();
    let payload = PushPayload::for_notification(&notification);

    let push_task = {
        let push = push.clone();
        let recipients = recipients.clone();
        let payload = payload.clone();
        tokio::spawn(async move { push.send_to_recipients(&recipients, &payload).await })
    };
    let email_task = {
        let email = email.clone();
        let recipients = recipients.clone();
        let notification = notification.clone();
        tokio::spawn(async move { email.send_to_many(&recipients, &notification).await })
    };

    let (push_result, email_result) = tokio::join!(push_task, email_task);
    let push_result = push_result.expect("push delivery task panicked");
    let email_result = email_result.expect("email delivery task panicked");

    info!(
        notification_id = %notification.id,
        recipients = recipients.len(),
        push_sent = push_result.total_sent,
        email_sent = email_result.sent,
        email_total = email_result.total,
        "Notification delivery finished"
    );
}
