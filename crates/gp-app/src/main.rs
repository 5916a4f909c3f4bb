use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, bail};
use clap::Parser;
use gp_app::persistence::DiskPersistence;
use gp_app::{AppEvent, GenBackendConfig, Generator, HttpBackend};
use gp_core::{ImageFormat, ImageSource, InputImage, Modality, ModalityInputs, ParameterSnapshot, SaveSettings};

const SAVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Submit one generation job and collect its images.
#[derive(Parser, Debug)]
#[command(name = "gp-app", about = "Submit a generation job and collect its images")]
struct Cli {
    /// Prompt text; the words are joined with spaces.
    prompt: Vec<String>,

    /// One of text-to-image, image-to-image, inpainting, remove-background, cleanup.
    #[arg(short, long, default_value = "text-to-image")]
    modality: Modality,

    #[arg(long, default_value_t = 1)]
    batch_count: u32,

    #[arg(long, default_value_t = 1)]
    batch_size: u32,

    /// Source image, or init image for masked modalities. Repeatable.
    #[arg(long = "image")]
    images: Vec<PathBuf>,

    /// Mask image, paired with `--image` by position. Repeatable.
    #[arg(long = "mask")]
    masks: Vec<PathBuf>,

    /// Use every image in this folder instead of `--image`.
    #[arg(long, conflicts_with = "images")]
    image_dir: Option<PathBuf>,

    /// Use every image in this folder instead of `--mask`.
    #[arg(long, conflicts_with = "masks")]
    mask_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 0.75)]
    strength: f32,

    /// Directory the finished images are written to.
    #[arg(long, default_value = "outputs")]
    out: PathBuf,

    /// png, jpg, jpeg or bmp.
    #[arg(long, default_value = "png")]
    format: ImageFormat,

    /// Write a single zip archive instead of loose files.
    #[arg(long)]
    zip: bool,

    /// Also print prompt suggestions for the first `--image`.
    #[arg(long)]
    suggest: bool,
}

impl Cli {
    fn prompt(&self) -> String {
        self.prompt.join(" ")
    }

    async fn inputs(&self) -> anyhow::Result<ModalityInputs> {
        let strength = self.strength;
        let inputs = match self.modality {
            Modality::TextToImage => ModalityInputs::TextToImage,
            Modality::ImageToImage => ModalityInputs::ImageToImage {
                strength,
                source: source(&self.images, self.image_dir.as_deref()).await?,
            },
            Modality::RemoveBackground => ModalityInputs::RemoveBackground {
                source: source(&self.images, self.image_dir.as_deref()).await?,
            },
            Modality::Inpainting => ModalityInputs::Inpainting {
                strength,
                images: source(&self.images, self.image_dir.as_deref()).await?,
                masks: source(&self.masks, self.mask_dir.as_deref()).await?,
            },
            Modality::Cleanup => ModalityInputs::Cleanup {
                images: source(&self.images, self.image_dir.as_deref()).await?,
                masks: source(&self.masks, self.mask_dir.as_deref()).await?,
            },
        };
        Ok(inputs)
    }

    fn snapshot(&self, inputs: ModalityInputs) -> ParameterSnapshot {
        ParameterSnapshot::new(inputs)
            .with_prompt(self.prompt())
            .with_batch(self.batch_count, self.batch_size)
            .with_save(SaveSettings {
                destination: self.out.clone(),
                format: self.format,
                archive: self.zip,
            })
    }
}

async fn source(files: &[PathBuf], dir: Option<&Path>) -> anyhow::Result<ImageSource> {
    if let Some(dir) = dir {
        return Ok(ImageSource::Folder(dir.to_path_buf()));
    }
    let mut images = Vec::with_capacity(files.len());
    for path in files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        images.push(InputImage::from_bytes(name, data));
    }
    Ok(ImageSource::Manual(images))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = GenBackendConfig::load()?;
    tracing::info!(api_url = %config.api_url, gpu_env = %config.gpu_env, "Using worker pool");

    let backend = HttpBackend::new(config).context("Failed to build HTTP client")?;
    let mut generator = Generator::new(Arc::new(backend))
        .with_persistence(Arc::new(DiskPersistence::new()));
    let mut notices = generator.subscribe();

    let modality = cli.modality;
    let inputs = cli.inputs().await?;
    let clip_image = match inputs.image_source() {
        Some(source) if cli.suggest => match source.manual().first() {
            Some(image) => Some(image.clone()),
            None => bail!("--suggest needs at least one --image"),
        },
        _ => None,
    };

    let job_id = generator.submit(modality, cli.snapshot(inputs)).await?;
    println!("Submitted job {job_id}");

    if let Some(image) = clip_image {
        generator.interrogate(modality, image).await?;
        let interrupted = tokio::select! {
            _ = generator.wait_clip(modality) => false,
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            generator.stop(modality);
            println!("Stopped waiting for job {job_id}");
            return Ok(());
        }
        let clip = &generator.state(modality).clip;
        match &clip.last_error {
            Some(error) => println!("No suggestions: {error}"),
            None => println!("Suggestions: {}", clip.phrases.join(", ")),
        }
    }

    let interrupted = tokio::select! {
        _ = generator.wait_idle(modality) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        generator.stop(modality);
        println!("Stopped waiting for job {job_id}");
        return Ok(());
    }

    let state = generator.state(modality);
    if let Some(error) = &state.last_error {
        bail!("{error}");
    }
    let Some(batch) = state.output.batches.first() else {
        bail!("Job {job_id} produced no batch");
    };
    println!("Batch {} ({} images)", batch.batch_id, batch.len());
    for uri in &batch.image_uris {
        println!("  {uri}");
    }
    if batch.is_empty() {
        return Ok(());
    }

    let saved = tokio::time::timeout(SAVE_TIMEOUT, async {
        loop {
            match notices.recv().await {
                Ok(AppEvent::ImagesSaved { paths, .. }) => return Ok(paths),
                Ok(AppEvent::SaveFailed { error, .. }) => return Err(anyhow::anyhow!(error)),
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    })
    .await
    .context("Timed out saving images")??;

    for path in saved {
        println!("Saved {}", path.display());
    }

    generator.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_prompt_words_are_joined() {
        let cli = Cli::try_parse_from(["gp-app", "a", "red", "fox"]).unwrap();
        assert_eq!(cli.prompt(), "a red fox");
        assert_eq!(cli.modality, Modality::TextToImage);
        assert_eq!((cli.batch_count, cli.batch_size), (1, 1));
        assert_eq!(cli.out, PathBuf::from("outputs"));
        assert_eq!(cli.format, ImageFormat::Png);
        assert!(!cli.zip);
    }

    #[test]
    fn test_flags_fill_the_snapshot() {
        let cli = Cli::try_parse_from([
            "gp-app",
            "--modality", "inpainting",
            "--batch-count", "2",
            "--batch-size", "3",
            "--image-dir", "/in/images",
            "--mask-dir", "/in/masks",
            "--out", "/tmp/out",
            "--format", "jpg",
            "--zip",
            "a", "cat",
        ])
        .unwrap();
        assert_eq!(cli.modality, Modality::Inpainting);

        let inputs = ModalityInputs::Inpainting {
            strength: cli.strength,
            images: ImageSource::Folder("/in/images".into()),
            masks: ImageSource::Folder("/in/masks".into()),
        };
        let snapshot = cli.snapshot(inputs);
        assert_eq!(snapshot.prompt, "a cat");
        assert_eq!((snapshot.batch_count, snapshot.batch_size), (2, 3));
        assert_eq!(
            snapshot.save,
            Some(SaveSettings {
                destination: "/tmp/out".into(),
                format: ImageFormat::Jpg,
                archive: true,
            })
        );
    }

    #[test]
    fn test_rejects_unknown_values() {
        assert!(Cli::try_parse_from(["gp-app", "--modality", "txt2img", "x"]).is_err());
        assert!(Cli::try_parse_from(["gp-app", "--format", "gif", "x"]).is_err());
        assert!(Cli::try_parse_from(["gp-app", "--image", "a.png", "--image-dir", "/in", "x"]).is_err());
    }

    #[tokio::test]
    async fn test_folder_flags_become_folder_sources() {
        let cli = Cli::try_parse_from(["gp-app", "-m", "remove-background", "--image-dir", "/in"]).unwrap();
        let inputs = cli.inputs().await.unwrap();
        assert_eq!(inputs.image_source(), Some(&ImageSource::Folder("/in".into())));
    }

    #[tokio::test]
    async fn test_image_files_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, b"png").unwrap();

        let cli = Cli::try_parse_from(["gp-app", "-m", "image-to-image", "--image", path.to_str().unwrap(), "x"]).unwrap();
        let inputs = cli.inputs().await.unwrap();
        let images = inputs.image_source().unwrap().manual();
        assert_eq!(images, &[InputImage::from_bytes("cat.png", b"png".to_vec())]);
    }
}
