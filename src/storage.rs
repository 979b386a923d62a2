//! Local object store for uploaded images. Objects live under
//! `<root>/images/<key>` and are served from `<public_base_url>/images/<key>`.

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::BoardError;

pub const BUCKET: &str = "images";

/// 1 MiB upload ceiling.
pub const MAX_IMAGE_BYTES: usize = 1_048_576;

pub struct ImageStore {
    root: PathBuf,
    public_base_url: String,
}

/// Check size and sniff the content; returns the extension to store under.
pub fn validate_image(bytes: &[u8]) -> Result<&'static str, BoardError> {
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(BoardError::ImageTooLarge {
            size: bytes.len(),
            max: MAX_IMAGE_BYTES,
        });
    }
    let format = image::guess_format(bytes)
        .map_err(|_| BoardError::InvalidImage("please choose an image file".to_string()))?;
    match format {
        ImageFormat::Png => Ok("png"),
        ImageFormat::Jpeg => Ok("jpg"),
        ImageFormat::Gif => Ok("gif"),
        ImageFormat::WebP => Ok("webp"),
        ImageFormat::Bmp => Ok("bmp"),
        other => Err(BoardError::InvalidImage(format!(
            "{other:?} images are not supported"
        ))),
    }
}

impl ImageStore {
    pub fn new(root: PathBuf, public_base_url: &str) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{BUCKET}/{key}", self.public_base_url)
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let key_path = Path::new(key);
        let clean = !key.is_empty()
            && key_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(anyhow!("Invalid object key: {key}"));
        }
        Ok(self.root.join(BUCKET).join(key_path))
    }

    /// Write an object. Without `upsert` an existing object is an error.
    pub fn upload(&self, key: &str, bytes: &[u8], upsert: bool) -> Result<()> {
        let path = self.path_for(key)?;
        if !upsert && path.exists() {
            return Err(anyhow!("Object already exists: {key}"));
        }
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("Invalid object key: {key}"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        // Write beside the target, then rename into place.
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move upload into {}", path.display()))?;

        debug!(key, size = bytes.len(), "Object stored");
        Ok(())
    }

    #[cfg(test)]
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Smallest byte string `image::guess_format` recognises as PNG.
    pub fn tiny_png() -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0u8; 32]);
        bytes
    }

    #[test]
    fn test_validate_image() {
        assert_eq!(validate_image(&tiny_png()).unwrap(), "png");
        assert_eq!(validate_image(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]).unwrap(), "jpg");
        assert_eq!(validate_image(b"GIF89a......").unwrap(), "gif");

        assert!(matches!(
            validate_image(b"%PDF-1.7"),
            Err(BoardError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_validate_image_size_limit() {
        let mut big = tiny_png();
        big.resize(MAX_IMAGE_BYTES + 1, 0);
        assert_eq!(
            validate_image(&big),
            Err(BoardError::ImageTooLarge {
                size: MAX_IMAGE_BYTES + 1,
                max: MAX_IMAGE_BYTES
            })
        );

        big.truncate(MAX_IMAGE_BYTES);
        assert!(validate_image(&big).is_ok());
    }

    #[test]
    fn test_upload_and_upsert() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf(), "https://cdn.test/");

        store.upload("7/avatar.png", b"one", false).unwrap();
        assert!(store.upload("7/avatar.png", b"two", false).is_err());
        assert_eq!(store.read("7/avatar.png").unwrap(), b"one");

        store.upload("7/avatar.png", b"two", true).unwrap();
        assert_eq!(store.read("7/avatar.png").unwrap(), b"two");
        assert!(dir.path().join("images/7/avatar.png").exists());
        assert!(!dir.path().join("images/7/avatar.part").exists());

        assert_eq!(store.public_url("7/avatar.png"), "https://cdn.test/images/7/avatar.png");
    }

    #[test]
    fn test_keys_cannot_escape_bucket() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf(), "https://cdn.test");
        assert!(store.upload("../secrets", b"x", true).is_err());
        assert!(store.upload("/etc/passwd", b"x", true).is_err());
        assert!(store.upload("", b"x", true).is_err());
    }
}
