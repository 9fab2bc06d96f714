// Scheduler engine driving the periodic reminder tasks

use crate::clock::Clock;
use crate::config::SchedulerConfig as SchedulerSettings;
use crate::errors::{ScheduleError, SchedulerError};
use crate::reminders::{EscalationChecker, EscalationSummary, LogRetention, ReminderScanner, ScanSummary};
use crate::schedule::{next_fire_time, parse_cron_expression, parse_timezone};
use crate::telemetry;
use async_trait::async_trait;
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

/// Periodic tasks run by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderTask {
    MedicationReminders,
    EscalationCheck,
    LogCleanup,
}

impl ReminderTask {
    pub const ALL: [ReminderTask; 3] = [
        ReminderTask::MedicationReminders,
        ReminderTask::EscalationCheck,
        ReminderTask::LogCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderTask::MedicationReminders => "medication_reminders",
            ReminderTask::EscalationCheck => "escalation_check",
            ReminderTask::LogCleanup => "log_cleanup",
        }
    }

    fn index(&self) -> usize {
        match self {
            ReminderTask::MedicationReminders => 0,
            ReminderTask::EscalationCheck => 1,
            ReminderTask::LogCleanup => 2,
        }
    }
}

impl fmt::Display for ReminderTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderTask {
    type Err = String;

    /// Accepts the metric name or the short operator alias
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminders" | "medication_reminders" => Ok(ReminderTask::MedicationReminders),
            "escalations" | "escalation_check" => Ok(ReminderTask::EscalationCheck),
            "cleanup" | "log_cleanup" => Ok(ReminderTask::LogCleanup),
            _ => Err(format!("Unknown task: {}", s)),
        }
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub reminder_cron: String,
    pub escalation_cron: String,
    pub cleanup_cron: String,
    /// Zone the cron expressions are evaluated in
    pub timezone: Tz,
    /// Upper bound on a single run of any task
    pub run_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &SchedulerSettings) -> Result<Self, ScheduleError> {
        Ok(Self {
            reminder_cron: settings.reminder_cron.clone(),
            escalation_cron: settings.escalation_cron.clone(),
            cleanup_cron: settings.cleanup_cron.clone(),
            timezone: parse_timezone(&settings.timezone)?,
            run_timeout: Duration::from_secs(settings.run_timeout_seconds),
        })
    }

    pub fn cron_for(&self, task: ReminderTask) -> &str {
        match task {
            ReminderTask::MedicationReminders => &self.reminder_cron,
            ReminderTask::EscalationCheck => &self.escalation_cron,
            ReminderTask::LogCleanup => &self.cleanup_cron,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_cron: "0 */5 * * * *".to_string(),
            escalation_cron: "0 */10 * * * *".to_string(),
            cleanup_cron: "0 0 2 * * *".to_string(),
            timezone: chrono_tz::UTC,
            run_timeout: Duration::from_secs(240),
        }
    }
}

/// Outcome of one task run, returned to manual triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskReport {
    MedicationReminders(ScanSummary),
    EscalationCheck(EscalationSummary),
    LogCleanup { deleted: u64 },
}

impl TaskReport {
    /// Pushes delivered during the run
    pub fn sent(&self) -> u32 {
        match self {
            TaskReport::MedicationReminders(summary) => summary.sent,
            TaskReport::EscalationCheck(summary) => summary.escalated,
            TaskReport::LogCleanup { .. } => 0,
        }
    }

    /// Candidates that needed no push
    pub fn skipped(&self) -> u32 {
        match self {
            TaskReport::MedicationReminders(summary) => summary.skipped,
            TaskReport::EscalationCheck(summary) => summary.dose_logged,
            TaskReport::LogCleanup { .. } => 0,
        }
    }
}

/// Scheduler trait for periodic task operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run every periodic task until shutdown
    async fn start(&self) -> Result<(), SchedulerError>;

    /// Signal shutdown and wait for in-flight runs
    async fn stop(&self) -> Result<(), SchedulerError>;

    /// Run one task immediately; errors are returned rather than swallowed
    async fn run_task(&self, task: ReminderTask) -> Result<TaskReport, SchedulerError>;
}

/// Clears a task's in-progress flag when the run ends, even on timeout
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    scanner: Arc<ReminderScanner>,
    escalations: Arc<EscalationChecker>,
    retention: Arc<LogRetention>,
    clock: Arc<dyn Clock>,
    running: [AtomicBool; 3],
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        scanner: Arc<ReminderScanner>,
        escalations: Arc<EscalationChecker>,
        retention: Arc<LogRetention>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            config,
            scanner,
            escalations,
            retention,
            clock,
            running: Default::default(),
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    ///
    /// The value latches to `true` on `stop`, so receivers created after the
    /// signal still observe it.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_running(&self, task: ReminderTask) -> bool {
        self.running[task.index()].load(Ordering::SeqCst)
    }

    /// Run a task under its in-progress guard and the run timeout
    async fn execute(&self, task: ReminderTask) -> Result<TaskReport, SchedulerError> {
        let flag = &self.running[task.index()];
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning {
                task: task.to_string(),
            });
        }
        let _flag = RunningFlag(flag);

        let started = Instant::now();
        let result = timeout(self.config.run_timeout, self.run_once(task)).await;
        telemetry::record_task_duration(task.as_str(), started.elapsed().as_secs_f64());

        match result {
            Ok(report) => report,
            Err(_) => Err(SchedulerError::Timeout {
                task: task.to_string(),
                seconds: self.config.run_timeout.as_secs(),
            }),
        }
    }

    async fn run_once(&self, task: ReminderTask) -> Result<TaskReport, SchedulerError> {
        match task {
            ReminderTask::MedicationReminders => self
                .scanner
                .check_medication_reminders()
                .await
                .map(TaskReport::MedicationReminders),
            ReminderTask::EscalationCheck => self
                .escalations
                .check_escalation_reminders()
                .await
                .map(TaskReport::EscalationCheck),
            ReminderTask::LogCleanup => self
                .retention
                .cleanup_notification_logs()
                .await
                .map(|deleted| TaskReport::LogCleanup { deleted }),
        }
    }

    /// Timer loop for one task; errors from individual runs are logged only
    #[instrument(skip(self, task), fields(task = %task))]
    async fn run_loop(&self, task: ReminderTask) -> Result<(), SchedulerError> {
        let schedule = parse_cron_expression(self.config.cron_for(task))?;
        let mut shutdown_rx = self.shutdown_receiver();

        info!(cron = self.config.cron_for(task), timezone = %self.config.timezone, "Task scheduled");

        loop {
            let now = self.clock.now();
            let next = next_fire_time(&schedule, self.config.timezone, now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next_run = %next, "Waiting for next run");

            tokio::select! {
                _ = sleep(wait) => {
                    match self.execute(task).await {
                        Ok(report) => {
                            debug!(sent = report.sent(), skipped = report.skipped(), "Task run complete");
                        }
                        Err(SchedulerError::AlreadyRunning { .. }) => {
                            warn!("Previous run still in progress, skipping tick");
                        }
                        Err(e) => {
                            error!(error = %e, "Task run failed");
                        }
                    }
                }
                _ = async {
                    // The returned guard is not Send; drop it inside the branch
                    let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
                } => {
                    info!("Shutdown signal received, stopping task loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), SchedulerError> {
        info!("Starting scheduler engine");

        let results = join_all(ReminderTask::ALL.map(|task| self.run_loop(task))).await;

        info!("Scheduler engine stopped");
        results.into_iter().collect()
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), SchedulerError> {
        info!("Stopping scheduler engine");

        self.shutdown_tx.send_replace(true);

        // Let in-flight runs finish, bounded by the run timeout
        let deadline = Instant::now() + self.config.run_timeout;
        while ReminderTask::ALL.iter().any(|task| self.is_running(*task)) {
            if Instant::now() >= deadline {
                warn!("In-flight runs did not finish before shutdown");
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        info!("Scheduler engine stopped gracefully");
        Ok(())
    }

    #[instrument(skip(self, task), fields(task = %task))]
    async fn run_task(&self, task: ReminderTask) -> Result<TaskReport, SchedulerError> {
        info!("Manual task run requested");

        match self.execute(task).await {
            Ok(report) => {
                info!(sent = report.sent(), skipped = report.skipped(), "Manual task run complete");
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Manual task run failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::push::LogPushTransport;
    use crate::reminders::{NotificationDispatcher, ReminderOptions, ReminderStores};
    use crate::store::MemoryStore;

    fn engine(config: SchedulerConfig) -> SchedulerEngine {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let options = ReminderOptions::default();
        let stores = ReminderStores::from_shared(store.clone());

        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            Arc::new(LogPushTransport),
            clock.clone(),
            options.wall_clock_tz,
        ));
        let escalations = Arc::new(EscalationChecker::new(
            stores.clone(),
            dispatcher.clone(),
            clock.clone(),
            options,
        ));
        let scanner = Arc::new(ReminderScanner::new(
            stores,
            dispatcher,
            escalations.clone(),
            clock.clone(),
            options,
        ));
        let retention = Arc::new(LogRetention::new(store, clock.clone(), options.retention));

        SchedulerEngine::new(config, scanner, escalations, retention, clock)
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.cron_for(ReminderTask::MedicationReminders), "0 */5 * * * *");
        assert_eq!(config.cron_for(ReminderTask::EscalationCheck), "0 */10 * * * *");
        assert_eq!(config.cron_for(ReminderTask::LogCleanup), "0 0 2 * * *");
        assert_eq!(config.timezone, chrono_tz::UTC);
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let settings = crate::config::Settings::default();
        let config = SchedulerConfig::from_settings(&settings.scheduler).unwrap();
        assert_eq!(config.run_timeout, Duration::from_secs(240));

        let mut bad = settings.scheduler.clone();
        bad.timezone = "Mars/Base".to_string();
        assert!(SchedulerConfig::from_settings(&bad).is_err());
    }

    #[test]
    fn test_task_names() {
        assert_eq!("reminders".parse::<ReminderTask>(), Ok(ReminderTask::MedicationReminders));
        assert_eq!("escalations".parse::<ReminderTask>(), Ok(ReminderTask::EscalationCheck));
        assert_eq!("log_cleanup".parse::<ReminderTask>(), Ok(ReminderTask::LogCleanup));
        assert!("workouts".parse::<ReminderTask>().is_err());
        assert_eq!(ReminderTask::EscalationCheck.to_string(), "escalation_check");
    }

    #[tokio::test]
    async fn test_run_task_returns_report() {
        let engine = engine(SchedulerConfig::default());

        let report = engine.run_task(ReminderTask::MedicationReminders).await.unwrap();
        assert_eq!(report, TaskReport::MedicationReminders(ScanSummary::default()));

        let report = engine.run_task(ReminderTask::LogCleanup).await.unwrap();
        assert_eq!(report, TaskReport::LogCleanup { deleted: 0 });
        assert!(!engine.is_running(ReminderTask::LogCleanup));
    }

    #[tokio::test]
    async fn test_manual_trigger_during_run_is_rejected() {
        let engine = engine(SchedulerConfig::default());
        engine.running[ReminderTask::EscalationCheck.index()].store(true, Ordering::SeqCst);

        let err = engine
            .run_task(ReminderTask::EscalationCheck)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning { task } if task == "escalation_check"));

        // Other tasks are unaffected
        assert!(engine.run_task(ReminderTask::MedicationReminders).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_ends_start() {
        let engine = Arc::new(engine(SchedulerConfig::default()));
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        sleep(Duration::from_millis(100)).await;
        engine.stop().await.unwrap();

        let result = timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_stop_before_start_returns_promptly() {
        let engine = engine(SchedulerConfig::default());
        engine.stop().await.unwrap();

        let result = timeout(Duration::from_secs(2), engine.start()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_cron() {
        let config = SchedulerConfig {
            cleanup_cron: "whenever".to_string(),
            ..SchedulerConfig::default()
        };
        let engine = Arc::new(engine(config));
        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        sleep(Duration::from_millis(100)).await;
        engine.stop().await.unwrap();

        let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(SchedulerError::Schedule(_))));
    }
}
