use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::job::JobId;

/// The images produced by one successfully completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputBatch {
    pub batch_id: String,
    pub source_job_id: JobId,
    pub image_uris: Vec<String>,
    pub prompt_used: String,
    pub created_at: DateTime<Utc>,
}

impl OutputBatch {
    pub fn len(&self) -> usize {
        self.image_uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_uris.is_empty()
    }
}

/// A modality's gallery plus the placeholders of the job in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalityOutputState {
    /// Placeholder tiles shown while a job runs
    pub pending_count: u32,
    pub total_count: usize,
    /// Newest first
    pub batches: Vec<OutputBatch>,
    /// A batch arrived that the user has not looked at yet
    pub unseen: bool,
}

impl ModalityOutputState {
    /// Prepend `batch` and grow the running total.
    pub fn record(&mut self, batch: OutputBatch) {
        self.total_count += batch.len();
        self.pending_count = 0;
        self.unseen = true;
        self.batches.insert(0, batch);
    }

    /// Every displayed image, newest batch first
    pub fn image_uris(&self) -> impl Iterator<Item = &str> {
        self.batches
            .iter()
            .flat_map(|b| b.image_uris.iter().map(String::as_str))
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.image_uris().any(|u| u == uri)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.pending_count == 0
    }
}
