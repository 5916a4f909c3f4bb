//! Saving finished images to disk.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use log::info;
use gp_core::ImageFormat;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("download of {uri} failed: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {uri} returned HTTP {status}")]
    Status { uri: String, status: u16 },

    #[error("could not decode {uri}: {source}")]
    Decode {
        uri: String,
        #[source]
        source: image::ImageError,
    },

    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("encoder task panicked")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait ImagePersistence: Send + Sync {
    /// Write each image as its own file. Returns the written paths.
    async fn save_images(
        &self,
        uris: &[String],
        destination: &Path,
        format: ImageFormat,
    ) -> Result<Vec<PathBuf>, PersistError>;

    /// Like [`ImagePersistence::save_images`], or one zip when `archive` is set.
    async fn save_images_archived(
        &self,
        uris: &[String],
        destination: &Path,
        format: ImageFormat,
        archive: bool,
    ) -> Result<Vec<PathBuf>, PersistError>;
}

/// Downloads (or reads) each image, re-encodes it and writes it under the destination.
pub struct DiskPersistence {
    client: reqwest::Client,
}

impl Default for DiskPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskPersistence {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, PersistError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let fetch_err = |source| PersistError::Fetch { uri: uri.to_string(), source };

            let response = self.client.get(uri).send().await.map_err(fetch_err)?;
            let status = response.status();
            if !status.is_success() {
                return Err(PersistError::Status {
                    uri: uri.to_string(),
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().await.map_err(fetch_err)?;
            return Ok(bytes.to_vec());
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Ok(tokio::fs::read(path).await?)
    }

    /// Fetch everything, then re-encode off the async threads.
    async fn encode_all(&self, uris: &[String], format: ImageFormat) -> Result<Vec<Vec<u8>>, PersistError> {
        let downloads = try_join_all(uris.iter().map(|uri| self.fetch(uri))).await?;
        let uris = uris.to_vec();

        tokio::task::spawn_blocking(move || {
            uris.iter()
                .zip(downloads)
                .map(|(uri, bytes)| encode(uri, &bytes, format))
                .collect::<Result<Vec<_>, _>>()
        })
        .await?
    }
}

fn encode(uri: &str, bytes: &[u8], format: ImageFormat) -> Result<Vec<u8>, PersistError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| PersistError::Decode {
        uri: uri.to_string(),
        source,
    })?;

    // JPEG has no alpha channel
    let decoded = match format {
        ImageFormat::Jpg | ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => decoded,
    };

    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, image_format(format))
        .map_err(PersistError::Encode)?;
    Ok(out.into_inner())
}

fn image_format(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpg | ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Bmp => image::ImageFormat::Bmp,
    }
}

fn file_stem() -> String {
    Utc::now().format("%Y%m%d_%H%M%S%3f").to_string()
}

#[async_trait]
impl ImagePersistence for DiskPersistence {
    async fn save_images(
        &self,
        uris: &[String],
        destination: &Path,
        format: ImageFormat,
    ) -> Result<Vec<PathBuf>, PersistError> {
        let encoded = self.encode_all(uris, format).await?;
        tokio::fs::create_dir_all(destination).await?;

        let stem = file_stem();
        let mut paths = Vec::with_capacity(encoded.len());
        for (index, bytes) in encoded.into_iter().enumerate() {
            let path = destination.join(format!("{stem}_{}.{}", index + 1, format.extension()));
            tokio::fs::write(&path, bytes).await?;
            paths.push(path);
        }

        info!("Saved {} images to {}", paths.len(), destination.display());
        Ok(paths)
    }

    async fn save_images_archived(
        &self,
        uris: &[String],
        destination: &Path,
        format: ImageFormat,
        archive: bool,
    ) -> Result<Vec<PathBuf>, PersistError> {
        if !archive {
            return self.save_images(uris, destination, format).await;
        }

        let encoded = self.encode_all(uris, format).await?;
        tokio::fs::create_dir_all(destination).await?;

        let stem = file_stem();
        let extension = format.extension().to_string();
        let zip_bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, PersistError> {
            let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
            let options = zip::write::SimpleFileOptions::default();
            for (index, bytes) in encoded.iter().enumerate() {
                writer.start_file(format!("{}.{extension}", index + 1), options)?;
                writer.write_all(bytes)?;
            }
            Ok(writer.finish()?.into_inner())
        })
        .await??;

        let path = destination.join(format!("{stem}.zip"));
        tokio::fs::write(&path, zip_bytes).await?;

        info!("Saved {} images to {}", uris.len(), path.display());
        Ok(vec![path])
    }
}
