use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::modality::Modality;
use crate::snapshot::ParameterSnapshot;

/// Identifier assigned by the worker pool when a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Polling,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Submitted | Self::Polling)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One remote generation request, tracked from submission until it is terminal.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: JobId,
    pub modality: Modality,
    pub status: JobStatus,
    pub snapshot: Arc<ParameterSnapshot>,
    /// Images the worker will return, derived once from the snapshot
    pub expected_count: u32,
    pub created_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(
        id: JobId,
        modality: Modality,
        snapshot: Arc<ParameterSnapshot>,
        expected_count: u32,
    ) -> Self {
        Self {
            id,
            modality,
            status: JobStatus::Submitted,
            snapshot,
            expected_count,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(JobStatus::Submitted.is_active());
        assert!(JobStatus::Polling.is_active());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Succeeded.is_active());
    }

    #[test]
    fn test_new_job_starts_submitted() {
        let job = GenerationJob::new(
            JobId::from("task-1"),
            Modality::TextToImage,
            Arc::new(ParameterSnapshot::default()),
            1,
        );
        assert_eq!(job.status, JobStatus::Submitted);
        assert_eq!(job.id.as_str(), "task-1");
    }
}
