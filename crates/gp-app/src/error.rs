use std::path::PathBuf;
use thiserror::Error;
use gp_core::{JobId, Modality, SnapshotError};
use crate::generator::backend::BackendError;
use crate::persistence::PersistError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid parameters: {0}")]
    Validation(#[from] SnapshotError),

    #[error("{0} already has a job in progress")]
    Busy(Modality),

    #[error("{0} is already interrogating an image")]
    ClipBusy(Modality),

    #[error("Could not read input folder {}: {source}", path.display())]
    InputFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error from backend: {0}")]
    Transport(#[from] BackendError),

    #[error("Status check for job {job_id} failed: {error}")]
    Poll { job_id: JobId, error: String },

    #[error("Job {job_id} failed on the worker: {reason}")]
    RemoteFailure { job_id: JobId, reason: String },

    #[error("Failed to save images: {0}")]
    Persistence(#[from] PersistError),

    #[error("{count} image(s) are not displayed in {modality}")]
    NotDisplayed { modality: Modality, count: usize },

    #[error("{0} does not take input images")]
    NoImageInputs(Modality),
}
