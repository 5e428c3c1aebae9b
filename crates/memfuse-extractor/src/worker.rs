// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background extraction worker pool.
//!
//! Workers poll the durable queue; per-session serialization is enforced
//! by the dequeue query itself. A failed job returns to the queue with
//! backoff until its attempt budget is spent, at which point a fail lesson
//! is recorded and user traffic is never affected. Shutdown finishes the
//! in-flight job, leaves the rest of the queue durable, and exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use memfuse_config::model::ExtractorConfig;
use memfuse_core::traits::EmbeddingAdapter;
use memfuse_core::types::{EmbeddingInput, Lesson, LessonStatus};
use memfuse_core::MemfuseError;
use memfuse_storage::models::now_iso;
use memfuse_storage::queries::{lessons, queue};
use memfuse_storage::{Database, ExtractionJob};

use crate::extractor::MemoryExtractor;

/// Pool of background extraction workers.
pub struct ExtractorWorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl ExtractorWorkerPool {
    /// Spawn the configured number of worker loops. Stale queue locks from
    /// a previous crash are reset before the first worker starts.
    pub async fn start(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingAdapter>,
        extractor: Arc<MemoryExtractor>,
        config: ExtractorConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, MemfuseError> {
        let reset = queue::reset_stale(&db).await?;
        if reset > 0 {
            info!(reset, "stale extraction jobs requeued after restart");
        }

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers.max(1) {
            let db = db.clone();
            let embedder = embedder.clone();
            let extractor = extractor.clone();
            let token = shutdown.clone();
            let poll_interval = Duration::from_millis(config.poll_interval_ms);
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, db, embedder, extractor, poll_interval, token).await;
            }));
        }

        Ok(Self { handles, shutdown })
    }

    /// Request shutdown and wait for every worker to finish its in-flight
    /// job and exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "extraction worker panicked");
            }
        }
        info!("extraction worker pool drained");
    }
}

async fn worker_loop(
    worker_id: usize,
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingAdapter>,
    extractor: Arc<MemoryExtractor>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "extraction worker started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let job = match queue::dequeue(&db).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }
            Err(e) => {
                error!(worker_id, error = %e, "queue dequeue failed");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        match extractor.process_job(&job).await {
            Ok(inserted) => {
                debug!(worker_id, job_id = job.id, inserted, "extraction job done");
                if let Err(e) = queue::ack(&db, job.id).await {
                    error!(job_id = job.id, error = %e, "failed to ack extraction job");
                }
            }
            Err(e) => {
                warn!(
                    worker_id,
                    job_id = job.id,
                    attempt = job.attempts + 1,
                    error = %e,
                    "extraction job failed"
                );
                if let Err(fail_err) = queue::fail(&db, job.id).await {
                    error!(job_id = job.id, error = %fail_err, "failed to fail extraction job");
                    continue;
                }
                // Exponential backoff between attempts of the same entry.
                let backoff = poll_interval * 2u32.saturating_pow(job.attempts.max(0) as u32);
                tokio::time::sleep(backoff).await;

                if job.attempts + 1 >= job.max_attempts {
                    record_give_up_lesson(&db, &embedder, &job, &e).await;
                }
            }
        }
    }
    debug!(worker_id, "extraction worker exited");
}

/// A permanently failed job becomes a fail lesson; never user-visible.
async fn record_give_up_lesson(
    db: &Database,
    embedder: &Arc<dyn EmbeddingAdapter>,
    job: &ExtractionJob,
    cause: &MemfuseError,
) {
    let goal_text = format!(
        "extract facts for session {} up to round {}",
        job.session_id, job.round_id
    );
    let embedding = match embedder
        .embed(EmbeddingInput {
            texts: vec![goal_text.clone()],
        })
        .await
    {
        Ok(output) => output.embeddings.into_iter().next().unwrap_or_default(),
        Err(e) => {
            error!(error = %e, "could not embed give-up lesson, skipping record");
            return;
        }
    };

    let lesson = Lesson {
        lesson_id: Uuid::new_v4().to_string(),
        trigger_embedding: embedding,
        goal_text,
        agent: "extractor".to_string(),
        status: LessonStatus::Fail,
        error: Some(cause.to_string()),
        fix_summary: None,
        working_params: None,
        created_at: now_iso(),
    };
    if let Err(e) = lessons::insert_lesson(db, &lesson).await {
        error!(error = %e, "failed to record extraction give-up lesson");
    }
}
