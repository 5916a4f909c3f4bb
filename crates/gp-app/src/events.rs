use std::path::PathBuf;
use gp_core::{JobId, Modality};
use crate::generator::backend::schemas::ResultDataLog;

/// Which of a modality's job slots a remote job occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Generation,
    /// Prompt suggestions for an input image
    Clip,
}

/// Results produced by background polling, delivered to the generator that owns
/// the modality stores.
#[derive(Debug, Clone)]
pub enum GenEvent {
    JobStatus {
        modality: Modality,
        kind: JobKind,
        /// The job this status was fetched for
        job_id: JobId,
        outcome: PollOutcome,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded {
        result_uris: Vec<String>,
        log: Option<ResultDataLog>,
    },
    /// The worker reported the task as failed or revoked
    Failed { reason: String },
    /// The status request itself failed
    Errored { error: String },
}

/// Notices for whoever presents the panel.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    JobQueued {
        modality: Modality,
        job_id: JobId,
        expected: u32,
    },
    JobComplete {
        modality: Modality,
        job_id: JobId,
        images: usize,
    },
    JobFailed {
        modality: Modality,
        job_id: JobId,
        error: String,
    },
    ImagesSaved {
        modality: Modality,
        job_id: JobId,
        paths: Vec<PathBuf>,
    },
    SaveFailed {
        modality: Modality,
        job_id: JobId,
        error: String,
    },
    ClipReady {
        modality: Modality,
        job_id: JobId,
        phrases: Vec<String>,
    },
    ClipFailed {
        modality: Modality,
        job_id: JobId,
        error: String,
    },
}
