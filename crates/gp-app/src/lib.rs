//! Job orchestration for the generation panel.
//!
//! [`Generator`] submits one job per modality to the remote worker pool, polls
//! it until it reaches a terminal status and folds the returned images into
//! that modality's gallery.

pub mod error;
pub mod events;
pub mod folder;
pub mod generator;
pub mod persistence;
pub mod state;

pub use error::AppError;
pub use events::{AppEvent, GenEvent, JobKind, PollOutcome};
pub use generator::Generator;
pub use generator::backend::config::GenBackendConfig;
pub use generator::backend::{BackendError, GenBackend, HttpBackend};
pub use state::{ClipState, ModalityState, Phase, Transition};
