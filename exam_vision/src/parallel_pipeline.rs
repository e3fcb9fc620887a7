// THEORY:
// The `parallel_pipeline` module moves the slow stage of an upload off the
// caller's task. Ingestion still runs inline (it is cheap, and it is where
// invalid uploads are turned away), but analysis and the registry append run on
// a pool of workers:
//
//   submit() --ingest--> AnalysisJob --dispatcher--> worker N --spawn_blocking-->
//   ExamPipeline::complete() --oneshot--> JobTicket::wait()
//
// A single dispatcher hands jobs to the workers round-robin. Each worker runs
// one job at a time on the blocking thread pool, so at most `workers` analyses
// are in flight. Results come back on a per-job oneshot channel; the caller
// awaits the `JobTicket` whenever it likes. The registry still serializes id
// assignment, so ids stay contiguous however the workers interleave.

use crate::core_modules::exam_record::ExamRecord;
use crate::core_modules::image_asset::ImageAsset;
use crate::error::{ExamError, Result};
use crate::pipeline::{DashboardRow, ExamPipeline, UploadOutcome};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// An ingested original waiting for analysis.
pub struct AnalysisJob {
    pub original: ImageAsset,
    pub patient_alias: Option<String>,
    pub result_sender: oneshot::Sender<Result<ExamRecord>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<AnalysisJob>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the dispatcher and `worker_count` workers. Must run inside a tokio runtime.
    pub fn new(pipeline: Arc<ExamPipeline>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<AnalysisJob>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<AnalysisJob>())
            .unzip();

        // Spawn dispatcher
        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(job) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(job)) = worker_senders[worker_idx].send(job) {
                    let _ = job.result_sender.send(Err(ExamError::WorkerUnavailable));
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        // Spawn workers
        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, mut worker_receiver)| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    while let Some(job) = worker_receiver.recv().await {
                        let outcome = Self::run_job(pipeline.clone(), job.original, job.patient_alias).await;
                        let _ = job.result_sender.send(outcome);
                    }
                    debug!(worker_id, "analysis worker stopped");
                })
            })
            .collect();

        Self {
            task_sender,
            dispatcher,
            workers,
        }
    }

    async fn run_job(
        pipeline: Arc<ExamPipeline>,
        original: ImageAsset,
        patient_alias: Option<String>,
    ) -> Result<ExamRecord> {
        tokio::task::spawn_blocking(move || pipeline.complete(&original, patient_alias))
            .await
            .unwrap_or_else(|join_error| {
                error!(%join_error, "analysis job aborted");
                Err(ExamError::WorkerUnavailable)
            })
    }

    /// Queues an ingested original; the returned receiver yields the recorded exam.
    pub fn enqueue(
        &self,
        original: ImageAsset,
        patient_alias: Option<String>,
    ) -> Result<oneshot::Receiver<Result<ExamRecord>>> {
        let (result_sender, result_receiver) = oneshot::channel();
        let job = AnalysisJob {
            original,
            patient_alias,
            result_sender,
        };
        self.task_sender
            .send(job)
            .map_err(|_| ExamError::WorkerUnavailable)?;
        Ok(result_receiver)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs, lets queued jobs finish, and joins every task.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        if let Err(join_error) = self.dispatcher.await {
            error!(%join_error, "dispatcher ended abnormally");
        }
        for result in futures::future::join_all(self.workers).await {
            if let Err(join_error) = result {
                error!(%join_error, "analysis worker ended abnormally");
            }
        }
    }
}

enum TicketState {
    Discarded,
    Pending(oneshot::Receiver<Result<ExamRecord>>),
}

/// A handle on one submitted upload.
pub struct JobTicket {
    state: TicketState,
}

impl JobTicket {
    pub fn is_discarded(&self) -> bool {
        matches!(self.state, TicketState::Discarded)
    }

    /// Waits for the analysis to finish and the exam to be recorded.
    pub async fn wait(self) -> Result<UploadOutcome> {
        match self.state {
            TicketState::Discarded => Ok(UploadOutcome::Discarded),
            TicketState::Pending(receiver) => {
                let record = receiver.await.map_err(|_| ExamError::WorkerUnavailable)??;
                Ok(UploadOutcome::Stored(record))
            }
        }
    }
}

/// An `ExamPipeline` whose analysis stage runs on a worker pool.
pub struct ParallelPipeline {
    pipeline: Arc<ExamPipeline>,
    worker_pool: WorkerPool,
}

impl ParallelPipeline {
    /// Starts `config.workers` analysis workers. Must run inside a tokio runtime.
    pub fn new(pipeline: ExamPipeline) -> Self {
        let pipeline = Arc::new(pipeline);
        let worker_pool = WorkerPool::new(pipeline.clone(), pipeline.config().workers);
        Self {
            pipeline,
            worker_pool,
        }
    }

    /// Ingests the upload and queues its analysis.
    pub fn submit(&self, raw_bytes: &[u8], filename: &str) -> Result<JobTicket> {
        self.submit_as(raw_bytes, filename, None)
    }

    pub fn submit_as(
        &self,
        raw_bytes: &[u8],
        filename: &str,
        patient_alias: Option<String>,
    ) -> Result<JobTicket> {
        let original = match self.pipeline.ingest(raw_bytes, filename) {
            Ok(original) => original,
            Err(e) if e.is_silent() => {
                debug!(filename, reason = %e, "upload discarded");
                return Ok(JobTicket {
                    state: TicketState::Discarded,
                });
            }
            Err(e) => return Err(e),
        };
        let receiver = self.worker_pool.enqueue(original, patient_alias)?;
        Ok(JobTicket {
            state: TicketState::Pending(receiver),
        })
    }

    /// Submits and waits in one step.
    pub async fn upload(&self, raw_bytes: &[u8], filename: &str) -> Result<UploadOutcome> {
        self.submit(raw_bytes, filename)?.wait().await
    }

    pub fn dashboard(&self) -> Vec<DashboardRow> {
        self.pipeline.dashboard()
    }

    pub fn pipeline(&self) -> &Arc<ExamPipeline> {
        &self.pipeline
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}
