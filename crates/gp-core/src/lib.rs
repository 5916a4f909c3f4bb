pub mod error;
pub mod job;
mod modality;
pub mod output;
pub mod snapshot;

pub use error::SnapshotError;
pub use job::{GenerationJob, JobId, JobStatus};
pub use modality::Modality;
pub use output::{ModalityOutputState, OutputBatch};
pub use snapshot::{
    ImageData, ImageFormat, ImageSource, InputImage, ModalityInputs, ParameterSnapshot,
    SaveSettings,
};
