use std::path::Path;
use async_trait::async_trait;
use log::debug;
use gp_core::InputImage;
use gp_core::snapshot::image_mime_type;

/// Enumerates the images of a batch-mode input folder.
#[async_trait]
pub trait FolderSource: Send + Sync {
    async fn list_files(&self, path: &Path) -> std::io::Result<Vec<InputImage>>;
}

/// Reads image files straight from the local file system, sorted by name.
#[derive(Debug, Default, Clone)]
pub struct LocalFolder;

#[async_trait]
impl FolderSource for LocalFolder {
    async fn list_files(&self, path: &Path) -> std::io::Result<Vec<InputImage>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if image_mime_type(&name).is_none() {
                debug!("Skipping non-image file {}", name);
                continue;
            }
            let data = tokio::fs::read(entry.path()).await?;
            files.push(InputImage::from_bytes(name, data));
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
