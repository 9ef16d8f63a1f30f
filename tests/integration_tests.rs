//! Integration tests for the Tasktide reminder service.
//!
//! These run against a real in-memory SQLite database with the actual
//! migrations applied, exercising the scan → dedup → fan-out path end to
//! end with the delivery channels disabled or stubbed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{Days, TimeZone, Utc};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use tasktide::database::models::{NotificationDbModel, NotificationKind, UserDbModel};
use tasktide::database::repositories::{
    NotificationRepository, PushSubscriptionRepository, ReminderTargetRepository,
    SqlxNotificationRepository, SqlxPushSubscriptionRepository, SqlxReminderTargetRepository,
    SqlxUserRepository, UserRepository,
};
use tasktide::database::{init_pool, run_migrations, DbPool};
use tasktide::notify::{
    EmailConfig, EmailEngine, NotificationDispatcher, NotifyRequest, PushMessage, PushPayload,
    PushResponse, PushTransport, WebPushConfig, WebPushEngine,
};
use tasktide::reminder::ReminderScheduler;
use tasktide::Result;

/// Helper to create a test database pool with migrations applied.
async fn setup_test_db() -> DbPool {
    let pool = init_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool).await.expect("Failed to run migrations");

    pool
}

async fn seed_user(pool: &DbPool, id: &str, name: &str, email: Option<&str>) {
    let users = SqlxUserRepository::new(pool.clone());
    let now = Utc::now().timestamp_millis();
    users
        .create(&UserDbModel {
            id: id.to_string(),
            display_name: name.to_string(),
            email: email.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("Failed to seed user");
}

async fn seed_task(
    pool: &DbPool,
    id: &str,
    title: &str,
    status: &str,
    priority: Option<&str>,
    due_at_ms: i64,
    assignees: &[&str],
) {
    let now = Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT INTO task (id, title, status, priority, due_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(status)
    .bind(priority)
    .bind(due_at_ms)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("Failed to seed task");

    for user_id in assignees {
        sqlx::query("INSERT INTO task_assignee (task_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await
            .expect("Failed to seed task assignee");
    }
}

async fn seed_event(
    pool: &DbPool,
    id: &str,
    title: &str,
    location: Option<&str>,
    starts_at_ms: i64,
    attendees: &[&str],
) {
    let now = Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT INTO event (id, title, location, starts_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(location)
    .bind(starts_at_ms)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("Failed to seed event");

    for user_id in attendees {
        sqlx::query("INSERT INTO event_attendee (event_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await
            .expect("Failed to seed event attendee");
    }
}

fn today_at_utc(hour: u32) -> i64 {
    let date = Utc::now().date_naive();
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).expect("valid time"))
        .timestamp_millis()
}

fn tomorrow_at_utc(hour: u32) -> i64 {
    let date = Utc::now().date_naive() + Days::new(1);
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).expect("valid time"))
        .timestamp_millis()
}

/// Scheduler wired against the test database with both delivery channels
/// disabled: records are still created, channel calls no-op.
struct Harness {
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: Arc<ReminderScheduler>,
}

fn build_harness(pool: &DbPool) -> Harness {
    let notifications: Arc<dyn NotificationRepository> =
        Arc::new(SqlxNotificationRepository::new(pool.clone()));
    let subscriptions: Arc<dyn PushSubscriptionRepository> =
        Arc::new(SqlxPushSubscriptionRepository::new(pool.clone()));
    let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(pool.clone()));
    let targets: Arc<dyn ReminderTargetRepository> =
        Arc::new(SqlxReminderTargetRepository::new(pool.clone()));

    let push = Arc::new(WebPushEngine::new(
        subscriptions,
        Arc::new(StubTransport::ok()),
        None,
    ));
    let email = EmailEngine::new(None, "https://tasktide.example", users, notifications.clone())
        .expect("disabled email engine");

    let dispatcher = Arc::new(NotificationDispatcher::new(
        notifications.clone(),
        push,
        Arc::new(email),
        chrono_tz::UTC,
    ));
    let scheduler = Arc::new(ReminderScheduler::new(
        targets,
        notifications.clone(),
        dispatcher.clone(),
        chrono_tz::UTC,
    ));

    Harness {
        dispatcher,
        scheduler,
    }
}

/// Transport stub: 410 for endpoints containing "dead", 201 otherwise.
struct StubTransport {
    calls: AtomicUsize,
}

impl StubTransport {
    fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PushTransport for StubTransport {
    async fn deliver(&self, message: &PushMessage) -> Result<PushResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = if message.endpoint.contains("dead") {
            410
        } else {
            201
        };
        Ok(PushResponse {
            status,
            body: String::new(),
        })
    }
}

async fn notification_count(pool: &DbPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM notification")
        .fetch_one(pool)
        .await
        .expect("Failed to count notifications")
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_the_schema() {
        let pool = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "users",
            "task",
            "task_assignee",
            "event",
            "event_attendee",
            "notification",
            "notification_email_delivery",
            "web_push_subscription",
        ] {
            assert!(table_names.contains(&expected), "{expected} table missing");
        }
    }

    #[tokio::test]
    async fn reminder_uniqueness_suppresses_duplicates() {
        let pool = setup_test_db().await;
        let repo = SqlxNotificationRepository::new(pool.clone());

        let recipients = vec!["7".to_string()];
        let make = || {
            NotificationDbModel::new(
                &recipients,
                "🔴 Task due tomorrow",
                "body",
                NotificationKind::Warning,
                Some((tasktide::database::models::RelatedKind::Task, "t-1")),
                Some(tasktide::database::models::ReminderCategory::TaskDueTomorrow),
                "2026-08-04",
            )
        };

        assert!(repo.create(&make()).await.unwrap());
        // Same (target, category, day) with a fresh id: silently suppressed.
        assert!(!repo.create(&make()).await.unwrap());
        assert_eq!(notification_count(&pool).await, 1);

        // A different category for the same target the same day still lands.
        let mut other = make();
        other.reminder_key = Some("task-due-today".to_string());
        assert!(repo.create(&other).await.unwrap());
    }

    #[tokio::test]
    async fn mark_email_sent_is_idempotent_per_recipient() {
        let pool = setup_test_db().await;
        let repo = SqlxNotificationRepository::new(pool.clone());

        let n = NotificationDbModel::new(
            &["7".to_string(), "9".to_string()],
            "title",
            "body",
            NotificationKind::Info,
            None,
            None,
            "2026-08-04",
        );
        assert!(repo.create(&n).await.unwrap());

        repo.mark_email_sent(&n.id, "7").await.unwrap();
        repo.mark_email_sent(&n.id, "7").await.unwrap();
        repo.mark_email_sent(&n.id, "9").await.unwrap();

        let deliveries: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_email_delivery WHERE notification_id = ?",
        )
        .bind(&n.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(deliveries, 2);

        let stored = repo.find_by_id(&n.id).await.unwrap().expect("stored row");
        assert!(stored.email_sent);
    }

    #[tokio::test]
    async fn subscription_upsert_is_unique_per_user_and_endpoint() {
        let pool = setup_test_db().await;
        let repo = SqlxPushSubscriptionRepository::new(pool.clone());

        let first = repo
            .upsert("7", "https://push.example/sub/a", "key-1", "auth-1")
            .await
            .unwrap();
        let second = repo
            .upsert("7", "https://push.example/sub/a", "key-2", "auth-2")
            .await
            .unwrap();

        // Re-registration refreshed key material in place.
        assert_eq!(first.id, second.id);
        assert_eq!(second.p256dh, "key-2");
        assert_eq!(repo.list_for_user("7").await.unwrap().len(), 1);

        // The same endpoint under another user is a separate row.
        repo.upsert("9", "https://push.example/sub/a", "key-3", "auth-3")
            .await
            .unwrap();
        assert_eq!(repo.list_for_user("9").await.unwrap().len(), 1);

        repo.delete("7", "https://push.example/sub/a").await.unwrap();
        assert!(repo.list_for_user("7").await.unwrap().is_empty());
        // Idempotent: deleting again is a no-op.
        repo.delete("7", "https://push.example/sub/a").await.unwrap();
    }
}

mod scheduler_tests {
    use super::*;

    #[tokio::test]
    async fn task_due_tomorrow_produces_exactly_one_record_per_day() {
        let pool = setup_test_db().await;
        seed_user(&pool, "7", "Alice", Some("alice@example.com")).await;
        seed_user(&pool, "9", "Bob", None).await;
        seed_task(
            &pool,
            "t-1",
            "Draft report",
            "pending",
            Some("high"),
            tomorrow_at_utc(14),
            &["7", "9"],
        )
        .await;

        let harness = build_harness(&pool);

        let stats = harness.scheduler.scan_task_reminders().await.unwrap();
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.failed, 0);

        let rows: Vec<NotificationDbModel> = sqlx::query_as("SELECT * FROM notification")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let n = &rows[0];
        assert!(n.title.contains("🔴"));
        assert_eq!(n.reminder_key.as_deref(), Some("task-due-tomorrow"));
        assert_eq!(n.kind, "warning");
        assert!(n.body.contains("Draft report"));
        let mut recipients = n.recipient_ids();
        recipients.sort();
        assert_eq!(recipients, vec!["7", "9"]);

        // An hour later, nothing changed: the scan stays silent.
        let stats = harness.scheduler.scan_task_reminders().await.unwrap();
        assert_eq!(stats.created, 0);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(notification_count(&pool).await, 1);

        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn unassigned_and_closed_tasks_are_ignored() {
        let pool = setup_test_db().await;
        seed_user(&pool, "7", "Alice", None).await;
        // Matches the date filter but has nobody to remind.
        seed_task(
            &pool,
            "t-orphan",
            "Orphan task",
            "pending",
            None,
            tomorrow_at_utc(9),
            &[],
        )
        .await;
        // Matches the date filter but is no longer open.
        seed_task(
            &pool,
            "t-done",
            "Finished task",
            "completed",
            None,
            tomorrow_at_utc(10),
            &["7"],
        )
        .await;

        let harness = build_harness(&pool);
        let stats = harness.scheduler.scan_task_reminders().await.unwrap();
        assert_eq!(stats.matched, 0);
        assert_eq!(stats.created, 0);
        assert_eq!(notification_count(&pool).await, 0);

        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn today_horizon_uses_the_urgent_severity() {
        let pool = setup_test_db().await;
        seed_user(&pool, "7", "Alice", None).await;
        seed_task(
            &pool,
            "t-1",
            "Pay invoices",
            "in_progress",
            Some("medium"),
            today_at_utc(23),
            &["7"],
        )
        .await;

        let harness = build_harness(&pool);
        let stats = harness.scheduler.scan_task_reminders().await.unwrap();
        assert_eq!(stats.created, 1);

        let n: NotificationDbModel = sqlx::query_as("SELECT * FROM notification")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n.reminder_key.as_deref(), Some("task-due-today"));
        assert_eq!(n.kind, "error");
        assert!(n.title.contains("🟡"));

        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn event_today_produces_one_celebratory_record() {
        let pool = setup_test_db().await;
        seed_user(&pool, "3", "Carol", Some("carol@example.com")).await;
        seed_event(
            &pool,
            "e-1",
            "Staff meeting",
            Some("Room 4"),
            today_at_utc(23),
            &["3"],
        )
        .await;

        let harness = build_harness(&pool);
        let stats = harness.scheduler.scan_event_reminders().await.unwrap();
        assert_eq!(stats.created, 1);

        let n: NotificationDbModel = sqlx::query_as("SELECT * FROM notification")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n.reminder_key.as_deref(), Some("event-due-today"));
        assert_eq!(n.kind, "success");
        assert!(n.body.contains("Room 4"));
        assert_eq!(n.recipient_ids(), vec!["3"]);

        // Idempotence across the manual trigger as well.
        let report = harness.scheduler.test_reminders().await.unwrap();
        assert_eq!(report.events.created, 0);
        assert_eq!(report.events.suppressed, 1);
        assert_eq!(notification_count(&pool).await, 1);

        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn manual_trigger_runs_both_routines() {
        let pool = setup_test_db().await;
        seed_user(&pool, "7", "Alice", None).await;
        seed_task(
            &pool,
            "t-1",
            "Draft report",
            "pending",
            Some("low"),
            tomorrow_at_utc(14),
            &["7"],
        )
        .await;
        seed_event(&pool, "e-1", "Standup", None, tomorrow_at_utc(9), &["7"]).await;

        let harness = build_harness(&pool);
        let report = harness.scheduler.test_reminders().await.unwrap();
        assert_eq!(report.tasks.created, 1);
        assert_eq!(report.events.created, 1);
        assert_eq!(notification_count(&pool).await, 2);

        // Draining the dispatcher must not lose the queued deliveries.
        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let pool = setup_test_db().await;
        let harness = build_harness(&pool);

        let first = harness.scheduler.start();
        assert!(first.is_some());
        assert!(harness.scheduler.start().is_none());

        harness.scheduler.stop();
        if let Some(handle) = first {
            handle.await.unwrap();
        }
        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn dispatcher_rejects_an_empty_audience() {
        let pool = setup_test_db().await;
        let harness = build_harness(&pool);

        let result = harness
            .dispatcher
            .notify(NotifyRequest {
                recipients: Vec::new(),
                title: "title".to_string(),
                body: "body".to_string(),
                kind: NotificationKind::Info,
                related: None,
                reminder: None,
            })
            .await;
        assert!(matches!(result, Err(tasktide::Error::Validation(_))));

        harness.dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn notifications_survive_dispatch_after_shutdown() {
        let pool = setup_test_db().await;
        let harness = build_harness(&pool);
        harness.dispatcher.shutdown().await;

        // The record is still persisted; only fan-out is skipped.
        let created = harness
            .dispatcher
            .notify(NotifyRequest {
                recipients: vec!["7".to_string()],
                title: "title".to_string(),
                body: "body".to_string(),
                kind: NotificationKind::Info,
                related: None,
                reminder: None,
            })
            .await
            .unwrap();
        assert!(created.is_some());
        assert_eq!(notification_count(&pool).await, 1);
    }
}

mod push_tests {
    use super::*;

    fn vapid_config() -> WebPushConfig {
        let signing_key = SigningKey::random(&mut OsRng);
        let public = signing_key.verifying_key().to_encoded_point(false);
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        WebPushConfig::new(
            b64.encode(public.as_bytes()),
            &b64.encode(signing_key.to_bytes()),
            "mailto:ops@tasktide.app",
        )
        .expect("valid generated keys")
    }

    /// Browser-side subscription key material (a real curve point plus a
    /// 16-byte auth secret), base64url encoded the way clients register it.
    fn client_keys() -> (String, String) {
        let secret = SigningKey::random(&mut OsRng);
        let public = secret.verifying_key().to_encoded_point(false);
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        (b64.encode(public.as_bytes()), b64.encode([7u8; 16]))
    }

    fn payload() -> PushPayload {
        PushPayload {
            title: "🎉 Event today".to_string(),
            body: "\"Staff meeting\" starts today at 10:00.".to_string(),
            url: "/calendar?event=e-1".to_string(),
            kind: "success".to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn gone_endpoint_is_pruned_without_blocking_the_rest() {
        let pool = setup_test_db().await;
        seed_user(&pool, "3", "Carol", None).await;

        let repo = Arc::new(SqlxPushSubscriptionRepository::new(pool.clone()));
        let (p256dh_a, auth_a) = client_keys();
        let (p256dh_b, auth_b) = client_keys();
        repo.upsert("3", "https://push.example/dead/1", &p256dh_a, &auth_a)
            .await
            .unwrap();
        repo.upsert("3", "https://push.example/live/2", &p256dh_b, &auth_b)
            .await
            .unwrap();

        let transport = Arc::new(StubTransport::ok());
        let engine = WebPushEngine::new(repo.clone(), transport.clone(), Some(vapid_config()));

        let receipt = engine.send_to_recipient("3", &payload()).await.unwrap();
        assert_eq!(receipt.sent, 1);
        // A confirmed-dead endpoint is pruned, not reported as a failure.
        assert_eq!(receipt.failed, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        let remaining = repo.list_for_user("3").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint, "https://push.example/live/2");
    }

    #[tokio::test]
    async fn recipient_without_subscriptions_sends_zero() {
        let pool = setup_test_db().await;
        let repo = Arc::new(SqlxPushSubscriptionRepository::new(pool.clone()));
        let transport = Arc::new(StubTransport::ok());
        let engine = WebPushEngine::new(repo, transport.clone(), Some(vapid_config()));

        let receipt = engine.send_to_recipient("nobody", &payload()).await.unwrap();
        assert_eq!(receipt.sent, 0);
        assert_eq!(receipt.failed, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fanout_aggregates_across_recipients() {
        let pool = setup_test_db().await;
        seed_user(&pool, "7", "Alice", None).await;
        seed_user(&pool, "9", "Bob", None).await;

        let repo = Arc::new(SqlxPushSubscriptionRepository::new(pool.clone()));
        let (p256dh, auth) = client_keys();
        repo.upsert("7", "https://push.example/live/7", &p256dh, &auth)
            .await
            .unwrap();

        let engine = WebPushEngine::new(repo, Arc::new(StubTransport::ok()), Some(vapid_config()));
        let fanout = engine
            .send_to_recipients(&["7".to_string(), "9".to_string()], &payload())
            .await;
        // Bob has no subscriptions; that neither fails nor blocks Alice.
        assert_eq!(fanout.total_sent, 1);
    }
}

mod email_tests {
    use super::*;

    #[tokio::test]
    async fn recipients_without_an_address_are_excluded_from_total() {
        let pool = setup_test_db().await;
        seed_user(&pool, "7", "Alice", Some("alice@example.com")).await;
        seed_user(&pool, "9", "Bob", None).await;

        let notifications: Arc<dyn NotificationRepository> =
            Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(pool.clone()));

        // A relay nothing listens on: sends fail fast, resolution still runs.
        let engine = EmailEngine::new(
            Some(EmailConfig {
                smtp_host: "127.0.0.1".to_string(),
                smtp_port: 1,
                smtp_username: None,
                smtp_password: None,
                from_address: "Tasktide <reminders@tasktide.example>".to_string(),
            }),
            "https://tasktide.example",
            users,
            notifications.clone(),
        )
        .unwrap();
        assert!(engine.is_enabled());

        let n = NotificationDbModel::new(
            &["7".to_string(), "9".to_string()],
            "🔴 Task due tomorrow",
            "\"Draft report\" is due tomorrow at 14:00.",
            NotificationKind::Warning,
            None,
            None,
            "2026-08-04",
        );
        assert!(notifications.create(&n).await.unwrap());

        let fanout = engine.send_to_many(&["7".to_string(), "9".to_string()], &n).await;
        // Bob has no address: not counted, not a failure. Alice's send fails
        // against the dead relay, so nothing is marked sent.
        assert_eq!(fanout.total, 1);
        assert_eq!(fanout.sent, 0);

        let stored = notifications.find_by_id(&n.id).await.unwrap().expect("row");
        assert!(!stored.email_sent);
    }
}
