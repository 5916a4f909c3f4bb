use serde::{Deserialize, Serialize};

/// One generation pipeline. Every modality owns independent job and output state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    TextToImage,
    ImageToImage,
    Inpainting,
    RemoveBackground,
    Cleanup,
}

impl Modality {
    /// Name for display in UI
    pub fn name(&self) -> &str {
        match self {
            Self::TextToImage => "Text to Image",
            Self::ImageToImage => "Image to Image",
            Self::Inpainting => "Inpainting",
            Self::RemoveBackground => "Remove Background",
            Self::Cleanup => "Cleanup",
        }
    }

    /// Path segment used by the generation API
    pub fn id(&self) -> &str {
        match self {
            Self::TextToImage => "text-to-image",
            Self::ImageToImage => "image-to-image",
            Self::Inpainting => "inpainting",
            Self::RemoveBackground => "remove-background",
            Self::Cleanup => "cleanup",
        }
    }

    /// Whether the request is driven by a text prompt
    pub fn requires_prompt(&self) -> bool {
        matches!(self, Self::TextToImage | Self::ImageToImage | Self::Inpainting)
    }

    /// Whether the request consumes source images
    pub fn takes_images(&self) -> bool {
        !matches!(self, Self::TextToImage)
    }

    /// Whether each source image is paired with a mask
    pub fn takes_masks(&self) -> bool {
        matches!(self, Self::Inpainting | Self::Cleanup)
    }

    /// All available modalities
    pub fn all() -> [Modality; 5] {
        [
            Self::TextToImage,
            Self::ImageToImage,
            Self::Inpainting,
            Self::RemoveBackground,
            Self::Cleanup,
        ]
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|m| m.id() == s)
            .ok_or_else(|| format!("unknown modality '{s}'"))
    }
}
