//! Per-modality state machine.
//!
//! Each modality owns one [`ModalityStore`]. Nothing else holds its data; every
//! change goes through [`ModalityStore::dispatch`], and events that name a job
//! other than the active one are dropped as stale.

use gp_core::{GenerationJob, JobId, JobStatus, Modality, ModalityOutputState, OutputBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Busy,
}

#[derive(Debug, Clone, Default)]
pub struct ModalityState {
    pub phase: Phase,
    /// The job in flight; dropped once it reaches a terminal status
    pub active_job: Option<GenerationJob>,
    pub output: ModalityOutputState,
    /// Images handed over from another modality for the next snapshot
    pub staged_inputs: Vec<String>,
    pub last_error: Option<String>,
    pub clip: ClipState,
}

/// The CLIP slot: runs beside the generation job without blocking it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipState {
    pub active_job: Option<JobId>,
    /// Prompt suggestions from the last finished interrogation
    pub phrases: Vec<String>,
    pub last_error: Option<String>,
}

impl ClipState {
    pub fn is_busy(&self) -> bool {
        self.active_job.is_some()
    }
}

/// Split the worker's captions into individual prompt phrases.
pub fn prompt_phrases(captions: &[String]) -> Vec<String> {
    captions
        .iter()
        .flat_map(|caption| caption.split(", "))
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .map(str::to_string)
        .collect()
}

impl ModalityState {
    pub fn is_busy(&self) -> bool {
        self.phase == Phase::Busy
    }

    pub fn active_job_id(&self) -> Option<&JobId> {
        self.active_job.as_ref().map(|job| &job.id)
    }
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The worker accepted a job
    JobSubmitted(GenerationJob),
    /// Polling began for the job
    JobPolling(JobId),
    JobSucceeded { job_id: JobId, batch: OutputBatch },
    JobFailed { job_id: JobId, error: String },
    /// Drop every batch and count
    Reset,
    OutputViewed,
    StageInputs(Vec<String>),
    ClearStagedInputs,
    ClipSubmitted(JobId),
    ClipSucceeded { job_id: JobId, phrases: Vec<String> },
    ClipFailed { job_id: JobId, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The event named a job that is no longer active
    Stale,
    /// The event is not valid in the current phase
    Rejected,
}

#[derive(Debug)]
pub struct ModalityStore {
    modality: Modality,
    state: ModalityState,
}

impl ModalityStore {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            state: ModalityState::default(),
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn state(&self) -> &ModalityState {
        &self.state
    }

    pub fn dispatch(&mut self, event: StoreEvent) -> Transition {
        match event {
            StoreEvent::JobSubmitted(job) => {
                if self.state.is_busy() || job.modality != self.modality {
                    return Transition::Rejected;
                }
                self.state.output.pending_count = job.expected_count;
                self.state.last_error = None;
                self.state.phase = Phase::Busy;
                self.state.active_job = Some(job);
                Transition::Applied
            }
            StoreEvent::JobPolling(job_id) => match self.matching_job(&job_id) {
                Some(job) => {
                    job.status = JobStatus::Polling;
                    Transition::Applied
                }
                None => Transition::Stale,
            },
            StoreEvent::JobSucceeded { job_id, batch } => {
                if self.matching_job(&job_id).is_none() {
                    return Transition::Stale;
                }
                self.state.output.record(batch);
                self.finish_job();
                Transition::Applied
            }
            StoreEvent::JobFailed { job_id, error } => {
                if self.matching_job(&job_id).is_none() {
                    return Transition::Stale;
                }
                self.state.output.pending_count = 0;
                self.state.last_error = Some(error);
                self.finish_job();
                Transition::Applied
            }
            StoreEvent::Reset => {
                self.state = ModalityState::default();
                Transition::Applied
            }
            StoreEvent::OutputViewed => {
                self.state.output.unseen = false;
                Transition::Applied
            }
            StoreEvent::StageInputs(uris) => {
                self.state.staged_inputs = uris;
                Transition::Applied
            }
            StoreEvent::ClearStagedInputs => {
                self.state.staged_inputs.clear();
                Transition::Applied
            }
            StoreEvent::ClipSubmitted(job_id) => {
                if self.state.clip.is_busy() {
                    return Transition::Rejected;
                }
                self.state.clip.active_job = Some(job_id);
                self.state.clip.last_error = None;
                Transition::Applied
            }
            StoreEvent::ClipSucceeded { job_id, phrases } => {
                if self.state.clip.active_job.as_ref() != Some(&job_id) {
                    return Transition::Stale;
                }
                self.state.clip = ClipState { phrases, ..ClipState::default() };
                Transition::Applied
            }
            StoreEvent::ClipFailed { job_id, error } => {
                if self.state.clip.active_job.as_ref() != Some(&job_id) {
                    return Transition::Stale;
                }
                self.state.clip.active_job = None;
                self.state.clip.last_error = Some(error);
                Transition::Applied
            }
        }
    }

    fn matching_job(&mut self, job_id: &JobId) -> Option<&mut GenerationJob> {
        self.state
            .active_job
            .as_mut()
            .filter(|job| job.id == *job_id)
    }

    fn finish_job(&mut self) {
        self.state.active_job = None;
        self.state.phase = Phase::Idle;
    }
}
