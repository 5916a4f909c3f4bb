use thiserror::Error;
use crate::modality::Modality;

/// Reasons a snapshot cannot be submitted.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("parameter out of range: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("snapshot was built for {found}, not {expected}")]
    ModalityMismatch { expected: Modality, found: Modality },

    #[error("a prompt is required")]
    MissingPrompt,

    #[error("no source images were provided")]
    NoSourceImages,

    #[error("no input folder was provided")]
    EmptyInputPath,

    #[error("{images} images but {masks} masks")]
    MaskCountMismatch { images: usize, masks: usize },

    #[error("strength {0} is outside 0.0..=1.0")]
    StrengthOutOfRange(f32),

    #[error("guidance scale {0} is outside 1.0..=20.0")]
    GuidanceOutOfRange(f32),
}
