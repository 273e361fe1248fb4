use oct_shared::ImageId;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "dcm"];

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No file provided.")]
    MissingFile,
    #[error("Unsupported file type.")]
    UnsupportedType,
    #[error("File too large")]
    FileTooLarge,
    #[error("Image not found.")]
    NotFound,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An upload as it sits on disk.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub image_id: ImageId,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct UploadStore {
    upload_folder: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub fn new(upload_folder: impl Into<PathBuf>, max_size: usize) -> Self {
        Self {
            upload_folder: upload_folder.into(),
            max_size,
        }
    }

    pub fn generate_image_id() -> ImageId {
        let token = Uuid::new_v4().simple().to_string();
        ImageId::from_token(&token[..8])
    }

    pub fn is_allowed_file(filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, extension)) => {
                let extension = extension.to_ascii_lowercase();
                ALLOWED_EXTENSIONS.contains(&extension.as_str())
            }
            None => false,
        }
    }

    /// `<image_id>_<sanitized name>`; the id prefix is what lookups key on.
    pub fn build_saved_filename(image_id: &ImageId, original_filename: &str) -> String {
        let sanitized: String = sanitize_filename::sanitize(original_filename)
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        let sanitized = sanitized.trim_start_matches('.');
        if sanitized.is_empty() {
            format!("{}_upload", image_id)
        } else {
            format!("{}_{}", image_id, sanitized)
        }
    }

    pub fn validate_image_size(&self, size: usize) -> Result<(), StorageError> {
        if size > self.max_size {
            return Err(StorageError::FileTooLarge);
        }
        Ok(())
    }

    pub async fn save(
        &self,
        original_filename: &str,
        image_data: &[u8],
    ) -> Result<StoredImage, StorageError> {
        if original_filename.is_empty() || image_data.is_empty() {
            return Err(StorageError::MissingFile);
        }
        if !Self::is_allowed_file(original_filename) {
            return Err(StorageError::UnsupportedType);
        }
        self.validate_image_size(image_data.len())?;

        let image_id = Self::generate_image_id();
        let saved_name = Self::build_saved_filename(&image_id, original_filename);
        let path = self.upload_folder.join(saved_name);
        tokio::fs::write(&path, image_data).await?;

        log::info!(
            "Stored upload {} ({} bytes) at {}",
            image_id,
            image_data.len(),
            path.display()
        );
        Ok(StoredImage { image_id, path })
    }

    /// First file in the upload folder whose name starts with `<image_id>_`.
    pub async fn find(&self, image_id: &ImageId) -> Result<Option<StoredImage>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.upload_folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_", image_id);
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(Some(StoredImage {
                    image_id: image_id.clone(),
                    path: entry.path(),
                }));
            }
        }
        Ok(None)
    }

    pub async fn require(&self, image_id: &ImageId) -> Result<StoredImage, StorageError> {
        self.find(image_id).await?.ok_or(StorageError::NotFound)
    }
}

pub fn ensure_directories(directories: &[&Path]) -> io::Result<()> {
    for directory in directories {
        std::fs::create_dir_all(directory)?;
    }
    Ok(())
}
