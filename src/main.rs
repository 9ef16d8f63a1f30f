use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasktide::config::AppConfig;
use tasktide::database;
use tasktide::database::repositories::{
    NotificationRepository, PushSubscriptionRepository, ReminderTargetRepository,
    SqlxNotificationRepository, SqlxPushSubscriptionRepository, SqlxReminderTargetRepository,
    SqlxUserRepository, UserRepository,
};
use tasktide::notify::{EmailEngine, HttpPushTransport, NotificationDispatcher, WebPushEngine};
use tasktide::reminder::ReminderScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasktide=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let notifications: Arc<dyn NotificationRepository> =
        Arc::new(SqlxNotificationRepository::new(pool.clone()));
    let subscriptions: Arc<dyn PushSubscriptionRepository> =
        Arc::new(SqlxPushSubscriptionRepository::new(pool.clone()));
    let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(pool.clone()));
    let targets: Arc<dyn ReminderTargetRepository> =
        Arc::new(SqlxReminderTargetRepository::new(pool.clone()));

    if config.push.is_none() {
        tracing::info!("Web push disabled (no VAPID keys configured)");
    }
    if config.email.is_none() {
        tracing::info!("Email disabled (no SMTP relay configured)");
    }

    let push = Arc::new(WebPushEngine::new(
        subscriptions,
        Arc::new(HttpPushTransport::new()?),
        config.push.clone(),
    ));
    let email = Arc::new(EmailEngine::new(
        config.email.clone(),
        &config.base_url,
        users,
        notifications.clone(),
    )?);

    let dispatcher = Arc::new(NotificationDispatcher::new(
        notifications.clone(),
        push,
        email,
        config.timezone,
    ));
    let scheduler = Arc::new(ReminderScheduler::new(
        targets,
        notifications,
        dispatcher.clone(),
        config.timezone,
    ));

    // Diagnostic one-shot: run both scan routines synchronously and exit.
    if std::env::args().any(|a| a == "--test-reminders") {
        let report = scheduler.test_reminders().await?;
        tracing::info!(
            task_matched = report.tasks.matched,
            task_created = report.tasks.created,
            event_matched = report.events.matched,
            event_created = report.events.created,
            "Manual reminder run finished"
        );
        dispatcher.shutdown().await;
        return Ok(());
    }

    let scheduler_handle = scheduler.start();
    tracing::info!(timezone = %config.timezone, "Tasktide reminder service started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    scheduler.stop();
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    dispatcher.shutdown().await;

    Ok(())
}
