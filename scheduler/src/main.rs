// Scheduler binary entry point
//
// `scheduler` runs the periodic reminder tasks until Ctrl+C.
// `scheduler run-once <reminders|escalations|cleanup>` runs one task and exits.

use anyhow::{bail, Context, Result};
use common::clock::{Clock, SystemClock};
use common::config::{PushMode, Settings};
use common::db::repositories::{
    DoseLogRepository, MedicationRepository, NotificationLogRepository, UserRepository,
};
use common::db::DbPool;
use common::push::{LogPushTransport, PushTransport, VapidCredentials, WebPushTransport};
use common::reminders::{
    EscalationChecker, LogRetention, NotificationDispatcher, ReminderOptions, ReminderScanner,
    ReminderStores,
};
use common::scheduler::{ReminderTask, Scheduler, SchedulerConfig, SchedulerEngine};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

enum Mode {
    Serve,
    RunOnce(ReminderTask),
}

fn parse_mode() -> Result<Mode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(Mode::Serve),
        [cmd, task] if cmd == "run-once" => {
            let task = task.parse::<ReminderTask>().map_err(anyhow::Error::msg)?;
            Ok(Mode::RunOnce(task))
        }
        _ => bail!("usage: scheduler [run-once <reminders|escalations|cleanup>]"),
    }
}

fn build_transport(settings: &Settings) -> Result<Arc<dyn PushTransport>> {
    let push = &settings.push;
    match push.mode {
        PushMode::Log => {
            info!("Push mode is log; notifications will not leave the process");
            Ok(Arc::new(LogPushTransport))
        }
        PushMode::WebPush => {
            let vapid = push
                .vapid_private_key_pem
                .as_deref()
                .map(|pem| VapidCredentials::from_pem(&push.vapid_subject, &push.vapid_public_key, pem))
                .transpose()
                .context("Invalid VAPID credentials")?;

            if vapid.is_none() {
                info!("No VAPID private key configured; sending unauthenticated push requests");
            }

            let transport =
                WebPushTransport::new(push.request_timeout_seconds, push.ttl_seconds, vapid)
                    .context("Failed to create web push transport")?;
            Ok(Arc::new(transport))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mode = parse_mode()?;

    let settings = Settings::load().context("Failed to load configuration")?;
    if let Err(e) = settings.validate() {
        bail!("Invalid configuration: {}", e);
    }

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    info!("Starting medication reminder scheduler");

    // One-shot runs exit before the exporter would be scraped
    if let (Mode::Serve, Some(port)) = (&mode, settings.observability.metrics_port) {
        telemetry::init_metrics(port)?;
    }

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool.run_migrations().await?;

    let stores = ReminderStores {
        users: Arc::new(UserRepository::new(db_pool.clone())),
        medications: Arc::new(MedicationRepository::new(db_pool.clone())),
        doses: Arc::new(DoseLogRepository::new(db_pool.clone())),
        logs: Arc::new(NotificationLogRepository::new(db_pool.clone())),
    };

    let options = ReminderOptions::from_config(&settings.reminders)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport = build_transport(&settings)?;

    let dispatcher = Arc::new(NotificationDispatcher::new(
        stores.users.clone(),
        transport,
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
        stores.clone(),
        dispatcher,
        escalations.clone(),
        clock.clone(),
        options,
    ));
    let retention = Arc::new(LogRetention::new(
        stores.logs.clone(),
        clock.clone(),
        options.retention,
    ));

    let scheduler_config = SchedulerConfig::from_settings(&settings.scheduler)?;
    let scheduler = Arc::new(SchedulerEngine::new(
        scheduler_config,
        scanner,
        escalations,
        retention,
        clock,
    ));

    let result = match mode {
        Mode::RunOnce(task) => run_once(scheduler.as_ref(), task).await,
        Mode::Serve => serve(scheduler).await,
    };

    db_pool.close().await;
    telemetry::shutdown_tracer();
    result
}

async fn run_once(scheduler: &SchedulerEngine, task: ReminderTask) -> Result<()> {
    info!(task = %task, "Running task once");
    let report = scheduler
        .run_task(task)
        .await
        .with_context(|| format!("Task '{}' failed", task))?;

    info!(
        task = %task,
        sent = report.sent(),
        skipped = report.skipped(),
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "Task finished"
    );
    Ok(())
}

async fn serve(scheduler: Arc<SchedulerEngine>) -> Result<()> {
    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    info!("Starting scheduler loops");
    scheduler.start().await.context("Scheduler error")?;

    info!("Scheduler stopped");
    Ok(())
}
