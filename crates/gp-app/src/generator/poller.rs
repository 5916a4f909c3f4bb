//! Fixed-cadence status polling, one timer per modality and job slot.
//!
//! [`PollScheduler::start`] spawns a task that asks the worker pool for the
//! status of one job every `period`. The task never touches modality state: it
//! reports terminal results as [`GenEvent`]s and exits before anyone applies
//! them. Status requests for a job run one at a time; ticks that elapse while a
//! request is outstanding are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use gp_core::{JobId, Modality};

use crate::events::{GenEvent, JobKind, PollOutcome};
use crate::generator::backend::GenBackend;
use crate::generator::backend::schemas::{JobStatusResponse, TaskStatus};

/// Cadence of status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A running timer. Dropping it does not stop the task; call [`PollHandle::stop`].
struct PollHandle {
    job_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

pub struct PollScheduler {
    backend: Arc<dyn GenBackend>,
    period: Duration,
    events_tx: UnboundedSender<GenEvent>,
    timers: HashMap<(Modality, JobKind), PollHandle>,
}

impl PollScheduler {
    pub fn new(backend: Arc<dyn GenBackend>, period: Duration, events_tx: UnboundedSender<GenEvent>) -> Self {
        Self {
            backend,
            period,
            events_tx,
            timers: HashMap::new(),
        }
    }

    /// Begin polling `job_id`, replacing whatever timer the slot had.
    pub fn start(&mut self, modality: Modality, kind: JobKind, job_id: JobId) {
        self.stop(modality, kind);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_job(
            Arc::clone(&self.backend),
            modality,
            kind,
            job_id.clone(),
            self.period,
            cancel.clone(),
            self.events_tx.clone(),
        ));

        tracing::debug!(%modality, ?kind, %job_id, "Polling started");
        self.timers.insert((modality, kind), PollHandle { job_id, cancel, task });
    }

    /// Stop the slot's timer, if any. Returns whether one was running.
    pub fn stop(&mut self, modality: Modality, kind: JobKind) -> bool {
        match self.timers.remove(&(modality, kind)) {
            Some(handle) => {
                tracing::debug!(%modality, ?kind, job_id = %handle.job_id, "Polling stopped");
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.stop();
        }
    }

    pub fn is_active(&self, modality: Modality, kind: JobKind) -> bool {
        self.timers.contains_key(&(modality, kind))
    }

    /// The job the slot's timer is polling
    pub fn active_job(&self, modality: Modality, kind: JobKind) -> Option<&JobId> {
        self.timers.get(&(modality, kind)).map(|h| &h.job_id)
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_job(
    backend: Arc<dyn GenBackend>,
    modality: Modality,
    kind: JobKind,
    job_id: JobId,
    period: Duration,
    cancel: CancellationToken,
    events_tx: UnboundedSender<GenEvent>,
) {
    let mut ticker = tokio::time::interval(period);
    // The request is awaited inside the loop, so a slow round trip swallows the
    // ticks that fall due meanwhile instead of stacking up requests.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = backend.job_status(&job_id) => result,
        };

        match result {
            Ok(resp) => {
                if let Some(outcome) = classify(resp) {
                    break outcome;
                }
                tracing::trace!(%modality, %job_id, "Job still running");
            }
            Err(e) => {
                tracing::warn!(%modality, %job_id, error = %e, "Status check failed");
                break PollOutcome::Errored { error: e.to_string() };
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    let _ = events_tx.send(GenEvent::JobStatus { modality, kind, job_id, outcome });
}

/// `None` while the job is still running.
fn classify(resp: JobStatusResponse) -> Option<PollOutcome> {
    match resp.task_status {
        TaskStatus::Success => Some(PollOutcome::Succeeded {
            result_uris: resp.result_data.unwrap_or_default(),
            log: resp.result_data_log,
        }),
        TaskStatus::Failure => Some(PollOutcome::Failed {
            reason: "worker reported FAILURE".to_string(),
        }),
        TaskStatus::Revoked => Some(PollOutcome::Failed {
            reason: "task was revoked".to_string(),
        }),
        TaskStatus::Pending | TaskStatus::Started | TaskStatus::Retry | TaskStatus::Unknown => None,
    }
}
