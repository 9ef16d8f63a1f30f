//! The reminder scheduler.
//!
//! Scans open tasks and events for the "due tomorrow" and "due today"
//! horizons, skips targets already reminded today, and hands qualifying
//! targets to the fan-out dispatcher. Runs once shortly after startup and
//! then on every wall-clock hour; a failed run is logged and swallowed so
//! the next run is unaffected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::database::models::{RelatedKind, ReminderTarget};
use crate::database::repositories::{NotificationRepository, ReminderTargetRepository};
use crate::database::time;
use crate::notify::{NotificationDispatcher, NotifyRequest};
use crate::reminder::{day_window_utc_ms, local_today, next_top_of_hour, Horizon};
use crate::Result;

/// Delay before the first scan, so a fresh deploy is not racing service
/// startup (database migrations, connection warm-up).
const STARTUP_WARMUP: Duration = Duration::from_secs(15);

/// Counters for one scan routine (both horizons).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Targets matching the date/status filters.
    pub matched: usize,
    /// Notifications actually created.
    pub created: usize,
    /// Targets skipped because today's reminder already exists.
    pub suppressed: usize,
    /// Targets whose processing failed (logged, scan continued).
    pub failed: usize,
}

/// Result of a manual run of both scan routines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderRunReport {
    pub tasks: ScanStats,
    pub events: ScanStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetOutcome {
    Created,
    /// Dedup pre-check found today's reminder.
    AlreadyNotified,
    /// The uniqueness guard caught a write race.
    Suppressed,
    NoRecipients,
}

/// The top-level reminder orchestrator.
pub struct ReminderScheduler {
    targets: Arc<dyn ReminderTargetRepository>,
    notifications: Arc<dyn NotificationRepository>,
    dispatcher: Arc<NotificationDispatcher>,
    timezone: Tz,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(
        targets: Arc<dyn ReminderTargetRepository>,
        notifications: Arc<dyn NotificationRepository>,
        dispatcher: Arc<NotificationDispatcher>,
        timezone: Tz,
    ) -> Self {
        Self {
            targets,
            notifications,
            dispatcher,
            timezone,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Begin the recurring cycle. Idempotent: the second and later calls do
    /// nothing and return `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Reminder scheduler already started");
            return None;
        }

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move {
            scheduler.run_loop().await;
            info!("Reminder scheduler stopped");
        }))
    }

    /// Request the loop to stop after the current run. In-flight scans always
    /// complete; only the waiting between runs is interruptible.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run_loop(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = sleep(STARTUP_WARMUP) => {}
        }
        self.run_scans().await;

        loop {
            let now = Utc::now();
            let next = next_top_of_hour(now);
            let wait = (next - now)
                .to_std()
                .unwrap_or_else(|_| Duration::from_secs(1));

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(wait) => {}
            }
            self.run_scans().await;
        }
    }

    /// One scheduled run: both routines, each isolated from the other, all
    /// errors absorbed.
    async fn run_scans(&self) {
        match self.scan_task_reminders().await {
            Ok(stats) => info!(
                matched = stats.matched,
                created = stats.created,
                suppressed = stats.suppressed,
                failed = stats.failed,
                "Task reminder scan finished"
            ),
            Err(e) => error!(error = %e, "Task reminder scan failed"),
        }

        match self.scan_event_reminders().await {
            Ok(stats) => info!(
                matched = stats.matched,
                created = stats.created,
                suppressed = stats.suppressed,
                failed = stats.failed,
                "Event reminder scan finished"
            ),
            Err(e) => error!(error = %e, "Event reminder scan failed"),
        }
    }

    /// Scan open tasks due tomorrow and today.
    pub async fn scan_task_reminders(&self) -> Result<ScanStats> {
        self.scan(RelatedKind::Task).await
    }

    /// Scan events occurring tomorrow and today.
    pub async fn scan_event_reminders(&self) -> Result<ScanStats> {
        self.scan(RelatedKind::Event).await
    }

    /// Manual/diagnostic trigger: re-run both routines synchronously.
    /// Unlike the scheduled cycle, failures surface to the caller.
    pub async fn test_reminders(&self) -> Result<ReminderRunReport> {
        let tasks = self.scan_task_reminders().await;
        let events = self.scan_event_reminders().await;
        Ok(ReminderRunReport {
            tasks: tasks?,
            events: events?,
        })
    }

    async fn scan(&self, kind: RelatedKind) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let today = local_today(self.timezone);
        // Dedup is keyed on the day the reminder is sent, not the day the
        // target is due: hourly re-runs the same day must stay silent.
        let today_key = time::day_key(Utc::now(), self.timezone);

        for horizon in [Horizon::Tomorrow, Horizon::Today] {
            let date = horizon.target_date(today);
            let (start_ms, end_ms) = day_window_utc_ms(date, self.timezone);

            let targets = match kind {
                RelatedKind::Task => self.targets.open_tasks_due_on(start_ms, end_ms).await?,
                RelatedKind::Event => self.targets.events_on(start_ms, end_ms).await?,
            };

            for target in targets {
                stats.matched += 1;
                match self.remind(horizon, &target, &today_key).await {
                    Ok(TargetOutcome::Created) => stats.created += 1,
                    Ok(TargetOutcome::AlreadyNotified | TargetOutcome::Suppressed) => {
                        stats.suppressed += 1
                    }
                    Ok(TargetOutcome::NoRecipients) => {}
                    Err(e) => {
                        stats.failed += 1;
                        warn!(
                            kind = %target.kind,
                            target_id = %target.id,
                            error = %e,
                            "Reminder processing failed; continuing scan"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn remind(
        &self,
        horizon: Horizon,
        target: &ReminderTarget,
        today_key: &str,
    ) -> Result<TargetOutcome> {
        if target.recipients.is_empty() {
            return Ok(TargetOutcome::NoRecipients);
        }

        let category = horizon.category_for(target.kind);
        if self
            .notifications
            .reminder_exists(target.kind, &target.id, category, today_key)
            .await?
        {
            return Ok(TargetOutcome::AlreadyNotified);
        }

        let (title, body) = build_message(horizon, target, self.timezone);
        let created = self
            .dispatcher
            .notify(NotifyRequest {
                recipients: target.recipients.clone(),
                title,
                body,
                kind: horizon.severity_for(target.kind),
                related: Some((target.kind, target.id.clone())),
                reminder: Some(category),
            })
            .await?;

        Ok(if created.is_some() {
            TargetOutcome::Created
        } else {
            TargetOutcome::Suppressed
        })
    }
}

/// Title and body of a reminder message, with the due time rendered in the
/// service zone.
fn build_message(horizon: Horizon, target: &ReminderTarget, tz: Tz) -> (String, String) {
    let at = time::ms_to_datetime(target.due_at_ms)
        .with_timezone(&tz)
        .format("%H:%M");

    match target.kind {
        RelatedKind::Task => {
            let glyph = target.priority.map(|p| p.glyph()).unwrap_or("⚪");
            (
                format!("{} Task due {}", glyph, horizon.phrase()),
                format!(
                    "\"{}\" is due {} at {}.",
                    target.title,
                    horizon.phrase(),
                    at
                ),
            )
        }
        RelatedKind::Event => {
            let title = match horizon {
                Horizon::Today => "🎉 Event today".to_string(),
                Horizon::Tomorrow => "📅 Event tomorrow".to_string(),
            };
            let place = target
                .location
                .as_deref()
                .map(|l| format!(" ({})", l))
                .unwrap_or_default();
            (
                title,
                format!(
                    "\"{}\" starts {} at {}{}.",
                    target.title,
                    horizon.phrase(),
                    at,
                    place
                ),
            )
        }
    }
}
