use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::error::SnapshotError;
use crate::modality::Modality;

pub const DEFAULT_MODEL: &str = "stable-diffusion-2";
pub const DEFAULT_SCHEDULER: &str = "DPM++ 2M";
pub const RANDOM_SEED: i64 = -1;

/// Every field needed to reproduce one generation request.
///
/// A snapshot is captured when the user presses generate and is never changed
/// afterwards: the job that owns it only hands out shared references, and a new
/// submission always builds a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ParameterSnapshot {
    #[validate(length(min = 1))]
    pub model: String,
    pub scheduler: Option<String>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    #[validate(range(min = 64, max = 4096))]
    pub width: u32,
    #[validate(range(min = 64, max = 4096))]
    pub height: u32,
    #[validate(range(min = 1, max = 100))]
    pub num_inference_steps: u32,
    #[validate(range(min = 1.0, max = 20.0))]
    pub guidance_scale: f32,
    /// `-1` asks the worker for a random seed
    pub seed: i64,
    #[validate(range(min = 1, max = 10))]
    pub batch_count: u32,
    #[validate(range(min = 1, max = 10))]
    pub batch_size: u32,
    pub inputs: ModalityInputs,
    /// Where finished images are written, if anywhere
    pub save: Option<SaveSettings>,
}

/// Inputs that only exist for some modalities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "kebab-case")]
pub enum ModalityInputs {
    TextToImage,
    ImageToImage {
        strength: f32,
        source: ImageSource,
    },
    /// `images` and `masks` pair up by position
    Inpainting {
        strength: f32,
        images: ImageSource,
        masks: ImageSource,
    },
    RemoveBackground {
        source: ImageSource,
    },
    Cleanup {
        images: ImageSource,
        masks: ImageSource,
    },
}

impl ModalityInputs {
    pub fn modality(&self) -> Modality {
        match self {
            Self::TextToImage => Modality::TextToImage,
            Self::ImageToImage { .. } => Modality::ImageToImage,
            Self::Inpainting { .. } => Modality::Inpainting,
            Self::RemoveBackground { .. } => Modality::RemoveBackground,
            Self::Cleanup { .. } => Modality::Cleanup,
        }
    }

    pub fn strength(&self) -> Option<f32> {
        match self {
            Self::ImageToImage { strength, .. } | Self::Inpainting { strength, .. } => Some(*strength),
            _ => None,
        }
    }

    /// Source images, or the init images of a masked modality
    pub fn image_source(&self) -> Option<&ImageSource> {
        match self {
            Self::TextToImage => None,
            Self::ImageToImage { source, .. } | Self::RemoveBackground { source } => Some(source),
            Self::Inpainting { images, .. } | Self::Cleanup { images, .. } => Some(images),
        }
    }

    pub fn mask_source(&self) -> Option<&ImageSource> {
        match self {
            Self::Inpainting { masks, .. } | Self::Cleanup { masks, .. } => Some(masks),
            _ => None,
        }
    }
}

/// Where source images come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Images picked one by one in the form
    Manual(Vec<InputImage>),
    /// Every image inside a local folder
    Folder(PathBuf),
}

impl ImageSource {
    /// Folder to enumerate in batch mode
    pub fn folder(&self) -> Option<&Path> {
        match self {
            Self::Folder(path) => Some(path),
            Self::Manual(_) => None,
        }
    }

    /// Hand-picked images; empty in folder mode
    pub fn manual(&self) -> &[InputImage] {
        match self {
            Self::Manual(images) => images,
            Self::Folder(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputImage {
    pub name: String,
    pub mime_type: String,
    pub data: ImageData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageData {
    Bytes(Vec<u8>),
    /// An image that already lives somewhere, e.g. an output of another modality
    Uri(String),
}

impl InputImage {
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = image_mime_type(&name).unwrap_or("application/octet-stream").to_string();
        Self { name, mime_type, data: ImageData::Bytes(data) }
    }

    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let name = uri
            .rsplit('/')
            .next()
            .and_then(|s| s.split(['?', '#']).next())
            .filter(|s| !s.is_empty())
            .unwrap_or("image.png")
            .to_string();
        let mime_type = image_mime_type(&name).unwrap_or("image/png").to_string();
        Self { name, mime_type, data: ImageData::Uri(uri) }
    }
}

/// MIME type for the image file extensions the panel accepts
pub fn image_mime_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpg,
    Jpeg,
    Bmp,
}

impl ImageFormat {
    pub fn extension(&self) -> &str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Bmp => "bmp",
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" => Ok(Self::Jpg),
            "jpeg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            _ => Err(format!("unsupported image format '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSettings {
    pub destination: PathBuf,
    pub format: ImageFormat,
    /// Bundle everything into one zip instead of loose files
    pub archive: bool,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self::new(ModalityInputs::TextToImage)
    }
}

impl ParameterSnapshot {
    /// Snapshot with the panel's default form values
    pub fn new(inputs: ModalityInputs) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            scheduler: Some(DEFAULT_SCHEDULER.to_string()),
            prompt: String::new(),
            negative_prompt: None,
            width: 512,
            height: 512,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            seed: RANDOM_SEED,
            batch_count: 1,
            batch_size: 1,
            inputs,
            save: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_batch(mut self, batch_count: u32, batch_size: u32) -> Self {
        self.batch_count = batch_count;
        self.batch_size = batch_size;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_save(mut self, save: SaveSettings) -> Self {
        self.save = Some(save);
        self
    }

    pub fn is_random_seed(&self) -> bool {
        self.seed == RANDOM_SEED
    }

    /// Number of images the worker will return for this snapshot.
    ///
    /// `input_files` is the number of resolved source images; it is ignored for
    /// modalities without source images.
    pub fn expected_count(&self, input_files: usize) -> u32 {
        let files = if self.inputs.modality().takes_images() {
            u32::try_from(input_files).unwrap_or(u32::MAX)
        } else {
            1
        };
        self.batch_count
            .saturating_mul(self.batch_size)
            .saturating_mul(files)
    }

    /// Reject snapshots the worker could not run for `modality`.
    pub fn check(&self, modality: Modality) -> Result<(), SnapshotError> {
        self.validate()?;

        // NaN slips past the range attribute
        if !(1.0..=20.0).contains(&self.guidance_scale) {
            return Err(SnapshotError::GuidanceOutOfRange(self.guidance_scale));
        }

        let found = self.inputs.modality();
        if found != modality {
            return Err(SnapshotError::ModalityMismatch { expected: modality, found });
        }

        if modality.requires_prompt() && self.prompt.trim().is_empty() {
            return Err(SnapshotError::MissingPrompt);
        }

        if let Some(strength) = self.inputs.strength() {
            if !(0.0..=1.0).contains(&strength) {
                return Err(SnapshotError::StrengthOutOfRange(strength));
            }
        }

        if let Some(images) = self.inputs.image_source() {
            check_source(images)?;
        }
        if let Some(masks) = self.inputs.mask_source() {
            check_source(masks)?;
        }

        // Folder sources are only counted once they are listed
        match (self.inputs.image_source(), self.inputs.mask_source()) {
            (Some(ImageSource::Manual(images)), Some(ImageSource::Manual(masks))) => {
                check_pairs(images.len(), masks.len())
            }
            _ => Ok(()),
        }
    }
}

fn check_source(source: &ImageSource) -> Result<(), SnapshotError> {
    match source {
        ImageSource::Manual(images) if images.is_empty() => Err(SnapshotError::NoSourceImages),
        ImageSource::Folder(path) if path.as_os_str().is_empty() => Err(SnapshotError::EmptyInputPath),
        _ => Ok(()),
    }
}

/// Every init image needs exactly one mask.
pub fn check_pairs(images: usize, masks: usize) -> Result<(), SnapshotError> {
    if images != masks {
        return Err(SnapshotError::MaskCountMismatch { images, masks });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(name: &str) -> InputImage {
        InputImage::from_bytes(name, vec![0x89, b'P', b'N', b'G'])
    }

    #[test]
    fn test_defaults_are_valid_text_to_image() {
        let snapshot = ParameterSnapshot::default().with_prompt("a lighthouse at dusk");
        assert!(snapshot.check(Modality::TextToImage).is_ok());
        assert!(snapshot.is_random_seed());
    }

    #[test]
    fn test_missing_prompt() {
        let snapshot = ParameterSnapshot::default();
        assert!(matches!(
            snapshot.check(Modality::TextToImage),
            Err(SnapshotError::MissingPrompt)
        ));
    }

    #[test]
    fn test_manual_mode_needs_images() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::ImageToImage {
            strength: 0.5,
            source: ImageSource::Manual(Vec::new()),
        })
        .with_prompt("oil painting");
        assert!(matches!(
            snapshot.check(Modality::ImageToImage),
            Err(SnapshotError::NoSourceImages)
        ));
    }

    #[test]
    fn test_folder_mode_needs_path() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::RemoveBackground {
            source: ImageSource::Folder(PathBuf::new()),
        });
        assert!(matches!(
            snapshot.check(Modality::RemoveBackground),
            Err(SnapshotError::EmptyInputPath)
        ));
    }

    #[test]
    fn test_masks_must_pair_with_images() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::Cleanup {
            images: ImageSource::Manual(vec![png("a.png"), png("b.png")]),
            masks: ImageSource::Manual(vec![png("a_mask.png")]),
        });
        assert!(matches!(
            snapshot.check(Modality::Cleanup),
            Err(SnapshotError::MaskCountMismatch { images: 2, masks: 1 })
        ));
    }

    #[test]
    fn test_out_of_range_fields() {
        let snapshot = ParameterSnapshot::default()
            .with_prompt("castle")
            .with_batch(11, 1);
        assert!(matches!(
            snapshot.check(Modality::TextToImage),
            Err(SnapshotError::Invalid(_))
        ));

        let snapshot = ParameterSnapshot::new(ModalityInputs::ImageToImage {
            strength: 1.5,
            source: ImageSource::Manual(vec![png("in.png")]),
        })
        .with_prompt("castle");
        assert!(matches!(
            snapshot.check(Modality::ImageToImage),
            Err(SnapshotError::StrengthOutOfRange(_))
        ));
    }

    #[test]
    fn test_masks_need_images() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::Inpainting {
            strength: 0.5,
            images: ImageSource::Manual(Vec::new()),
            masks: ImageSource::Manual(Vec::new()),
        })
        .with_prompt("a door");
        assert!(matches!(
            snapshot.check(Modality::Inpainting),
            Err(SnapshotError::NoSourceImages)
        ));
    }

    #[test]
    fn test_folder_pairs_are_counted_later() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::Inpainting {
            strength: 0.5,
            images: ImageSource::Folder("/data/init".into()),
            masks: ImageSource::Manual(vec![png("only_mask.png")]),
        })
        .with_prompt("a door");
        assert!(snapshot.check(Modality::Inpainting).is_ok());
        assert_eq!(snapshot.inputs.image_source().and_then(ImageSource::folder), Some(Path::new("/data/init")));
        assert_eq!(snapshot.inputs.mask_source().map(|m| m.manual().len()), Some(1));

        let snapshot = ParameterSnapshot::new(ModalityInputs::Cleanup {
            images: ImageSource::Manual(vec![png("a.png")]),
            masks: ImageSource::Folder(PathBuf::new()),
        });
        assert!(matches!(
            snapshot.check(Modality::Cleanup),
            Err(SnapshotError::EmptyInputPath)
        ));
    }

    #[test]
    fn test_guidance_must_be_a_number_in_range() {
        for bad in [f32::NAN, f32::INFINITY, 0.5, 20.5] {
            let mut snapshot = ParameterSnapshot::default().with_prompt("castle");
            snapshot.guidance_scale = bad;
            assert!(
                snapshot.check(Modality::TextToImage).is_err(),
                "guidance {bad} was accepted"
            );
        }

        let mut snapshot = ParameterSnapshot::default().with_prompt("castle");
        snapshot.guidance_scale = f32::NAN;
        assert!(matches!(
            snapshot.check(Modality::TextToImage),
            Err(SnapshotError::GuidanceOutOfRange(g)) if g.is_nan()
        ));
    }

    #[test]
    fn test_wrong_modality() {
        let snapshot = ParameterSnapshot::default().with_prompt("castle");
        assert!(matches!(
            snapshot.check(Modality::Inpainting),
            Err(SnapshotError::ModalityMismatch { expected: Modality::Inpainting, found: Modality::TextToImage })
        ));
    }

    #[test]
    fn test_expected_count() {
        let snapshot = ParameterSnapshot::default().with_batch(2, 2);
        assert_eq!(snapshot.expected_count(0), 4);

        let snapshot = ParameterSnapshot::new(ModalityInputs::ImageToImage {
            strength: 0.5,
            source: ImageSource::Manual(vec![png("a.png"), png("b.png"), png("c.png")]),
        })
        .with_batch(2, 3);
        assert_eq!(snapshot.expected_count(3), 18);
    }

    #[test]
    fn test_expected_count_saturates() {
        let snapshot = ParameterSnapshot::new(ModalityInputs::RemoveBackground {
            source: ImageSource::Folder("/huge".into()),
        })
        .with_batch(10, 10);
        assert_eq!(snapshot.expected_count(u32::MAX as usize), u32::MAX);
        assert_eq!(snapshot.expected_count(usize::MAX), u32::MAX);
    }

    #[test]
    fn test_input_image_from_uri() {
        let image = InputImage::from_uri("https://bucket.s3.amazonaws.com/out/7.jpeg?sig=abc");
        assert_eq!(image.name, "7.jpeg");
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data, ImageData::Uri("https://bucket.s3.amazonaws.com/out/7.jpeg?sig=abc".into()));
    }
}
