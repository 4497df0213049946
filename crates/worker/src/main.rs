//! Worker binary — the Worker process: a pool of `WORKER_CONCURRENCY`
//! slots pulling routed jobs by queue name off the Event Log and running
//! them to completion with a `reporter` bound to the task id.

mod job;
mod kernels;

use event_log::{EntryId, EventLog, InMemoryEventLog, RedisEventLog};
use kernels::compute_pi::ComputePiSettings;
use std::sync::Arc;
use task_pipeline::AsyncPublisher;
use task_types::{routing, EventId, TaskPayload, TaskStatus, TaskType};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::StreamSettings;
use reporter::Reporter;

const GROUP: &str = "workers";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stream_settings = StreamSettings::from_env()?;
    let pool_settings = config::WorkerPoolSettings::from_env()?;
    let compute_pi_settings = Arc::new(ComputePiSettings::from_env());

    let log: Arc<dyn EventLog> = build_event_log(&stream_settings).await?;
    let semaphore = Arc::new(Semaphore::new(pool_settings.concurrency));
    let cancel = CancellationToken::new();

    let destinations: Vec<&'static str> = [TaskType::ComputePi, TaskType::DocumentAnalysis]
        .into_iter()
        .map(routing::route_for)
        .filter(|route| pool_settings.queues.iter().any(|q| q == route.queue_hint))
        .map(|route| route.destination)
        .collect();

    if destinations.is_empty() {
        warn!(queues = ?pool_settings.queues, "no routes match the configured queues, worker is idle");
    }

    let mut handles = Vec::new();
    for destination in destinations {
        info!(destination, "starting consumer loop");
        let log = log.clone();
        let stream_settings = stream_settings.clone();
        let compute_pi_settings = compute_pi_settings.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(consume(
            destination,
            log,
            stream_settings,
            compute_pi_settings,
            semaphore,
            cancel,
        )));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping consumer loops");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn consume(
    destination: &'static str,
    log: Arc<dyn EventLog>,
    stream_settings: StreamSettings,
    compute_pi_settings: Arc<ComputePiSettings>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    if let Err(e) = log.ensure_group(destination, GROUP, "0").await {
        error!(destination, error = %e, "failed to create consumer group, consumer loop exiting");
        return;
    }
    let consumer = format!("worker-{}", EventId::new());

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = log.read_group(destination, GROUP, &consumer, stream_settings.count, stream_settings.block_ms) => r,
        };

        let entries = match read {
            Ok(entries) => entries,
            Err(e) => {
                warn!(destination, error = %e, "read_group failed, retrying");
                continue;
            }
        };

        for (entry_id, fields) in entries {
            let job = match job::decode(&fields) {
                Ok(job) => job,
                Err(e) => {
                    warn!(destination, entry_id = %entry_id, error = %e, "poison pill job, acking and dropping");
                    ack(&log, destination, &entry_id).await;
                    continue;
                }
            };

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let log = log.clone();
            let stream_name = stream_settings.stream_name.clone();
            let compute_pi_settings = compute_pi_settings.clone();
            let destination_owned = destination.to_string();
            tokio::spawn(async move {
                run_job(&job, log.clone(), stream_name, compute_pi_settings).await;
                if let Err(e) = log.ack(&destination_owned, GROUP, &entry_id).await {
                    warn!(destination = %destination_owned, entry_id = %entry_id, error = %e, "ack failed");
                }
                drop(permit);
            });
        }
    }
}

async fn ack(log: &Arc<dyn EventLog>, destination: &str, entry_id: &EntryId) {
    if let Err(e) = log.ack(destination, GROUP, entry_id).await {
        warn!(destination, entry_id = %entry_id, error = %e, "ack failed");
    }
}

/// Runs the job's kernel to completion, catching both a kernel-returned
/// error and a panicked kernel (`tokio::spawn`'s `JoinError`) and
/// publishing a final `FAILED` status in either case.
async fn run_job(
    job: &job::Job,
    log: Arc<dyn EventLog>,
    stream_name: String,
    compute_pi_settings: Arc<ComputePiSettings>,
) {
    let task_id = job.task_id;
    let publisher = AsyncPublisher::new(log, stream_name);
    let reporter = Reporter::new(publisher, task_id);

    let payload = job.payload.clone();
    let reporter_for_kernel = reporter.clone();
    let outcome = tokio::spawn(async move {
        match payload {
            TaskPayload::ComputePi { digits } => {
                kernels::compute_pi::run(digits, &reporter_for_kernel, &compute_pi_settings).await
            }
            TaskPayload::DocumentAnalysis { text, keywords } => {
                kernels::document_analysis::run(&text, &keywords, &reporter_for_kernel).await
            }
        }
    })
    .await;

    let failure_message = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!(%task_id, error = %e, "job kernel failed");
            Some(e.to_string())
        }
        Err(join_err) => {
            error!(%task_id, error = %join_err, "job kernel panicked");
            Some(format!("worker panicked: {join_err}"))
        }
    };

    if let Some(message) = failure_message {
        if let Err(e) = reporter.report_status(TaskStatus::failed(message)).await {
            warn!(%task_id, error = %e, "failed to publish FAILED status after job failure");
        }
    }
}

async fn build_event_log(settings: &StreamSettings) -> anyhow::Result<Arc<dyn EventLog>> {
    let backend = std::env::var("EVENT_LOG_BACKEND").unwrap_or_else(|_| "redis".to_string());
    match backend.as_str() {
        "redis" => Ok(Arc::new(RedisEventLog::connect(&settings.redis_url).await?)),
        "in-memory" => Ok(Arc::new(InMemoryEventLog::new())),
        other => anyhow::bail!("unknown EVENT_LOG_BACKEND: {other}"),
    }
}
