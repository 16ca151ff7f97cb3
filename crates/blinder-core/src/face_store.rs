//! Content-addressed face storage.
//!
//! Metadata lives in `<workdir>/face.store`, pixels in `<workdir>/<id>.png`.

use crate::store::{KvStore, StoreError};
use crate::types::{FaceMeta, FaceRecord};
use image::{ImageFormat, RgbaImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

pub const FACE_STORE_DIR: &str = "face.store";
pub const IMAGE_EXT: &str = "png";

pub struct FaceStore {
    workdir: PathBuf,
    meta: KvStore<FaceMeta>,
}

impl FaceStore {
    pub async fn open(workdir: &Path) -> Result<Self, StoreError> {
        let meta = KvStore::open(workdir.join(FACE_STORE_DIR)).await?;
        Ok(Self {
            workdir: workdir.to_path_buf(),
            meta,
        })
    }

    /// Path of the image file for `id`. Pure; touches no storage.
    pub fn file_path(&self, id: &str) -> PathBuf {
        self.workdir.join(format!("{id}.{IMAGE_EXT}"))
    }

    /// Persist a face. Writing the same id twice changes nothing, except that
    /// a record carrying an embedding fills in one stored without it.
    ///
    /// An image file that is missing or does not decode is (re)written.
    pub async fn put(&self, face: &FaceRecord) -> Result<(), StoreError> {
        let path = self.file_path(&face.id);
        if load_image(&face.id, &path).await?.is_none() {
            write_image(&self.workdir, &path, &face.image).await?;
            tracing::debug!(id = %face.id, path = %path.display(), "face image written");
        }

        let stored = match &face.embedding {
            None => self.meta.put_if_absent(&face.id, &face.meta()).await?,
            Some(_) => match self.meta.get(&face.id).await? {
                Some(existing) if existing.embedding.is_some() => false,
                _ => {
                    self.meta.put(&face.id, &face.meta()).await?;
                    true
                }
            },
        };
        tracing::debug!(
            id = %face.id,
            stored,
            has_embedding = face.embedding.is_some(),
            "face put"
        );
        Ok(())
    }

    /// Metadata only, without reading the image file.
    pub async fn meta(&self, id: &str) -> Result<Option<FaceMeta>, StoreError> {
        self.meta.get(id).await
    }

    /// Load a full record. Missing metadata or a missing or undecodable
    /// image file all mean the face is absent.
    pub async fn get(&self, id: &str) -> Result<Option<FaceRecord>, StoreError> {
        let Some(meta) = self.meta.get(id).await? else {
            return Ok(None);
        };
        let Some(image) = load_image(id, &self.file_path(id)).await? else {
            return Ok(None);
        };
        Ok(Some(FaceRecord::from_parts(meta, image)))
    }

    /// Ids starting with `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.meta.keys_with_prefix(prefix).await
    }

    /// Every stored id, sorted.
    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        self.meta.keys().await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.meta.count().await
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.meta.close().await
    }

    /// Drop the metadata store. Image files go with the work directory.
    pub async fn destroy(&self) -> Result<(), StoreError> {
        self.meta.destroy().await
    }
}

/// Decode the PNG at `path`. `None` if it is missing or unreadable.
async fn load_image(id: &str, path: &Path) -> Result<Option<RgbaImage>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(id, path = %path.display(), "face image missing");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let decoded = tokio::task::spawn_blocking(move || {
        image::load_from_memory_with_format(&bytes, ImageFormat::Png).map(|img| img.to_rgba8())
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

    match decoded {
        Ok(image) => Ok(Some(image)),
        Err(e) => {
            tracing::warn!(id, path = %path.display(), error = %e, "face image unreadable");
            Ok(None)
        }
    }
}

/// Encode `image` as PNG into a temporary file in `dir`, then rename it over
/// `path`. Readers see either the old file or the complete new one.
async fn write_image(dir: &Path, path: &Path, image: &RgbaImage) -> Result<(), StoreError> {
    let dir = dir.to_path_buf();
    let path = path.to_path_buf();
    let image = image.clone();

    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".face-")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        tmp.write_all(png.get_ref())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, Rectangle};
    use image::{Rgba, RgbaImage};

    fn face(shade: u8) -> FaceRecord {
        let img = RgbaImage::from_pixel(4, 4, Rgba([shade, shade, shade, 255]));
        FaceRecord::from_crop(img, Rectangle { x: 1, y: 2, width: 4, height: 4 })
    }

    #[tokio::test]
    async fn test_put_get() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let f = face(10);
        store.put(&f).await.unwrap();

        let got = store.get(&f.id).await.unwrap().unwrap();
        assert_eq!(got.id, f.id);
        assert_eq!(got.location, f.location);
        assert_eq!(got.image, f.image);
        assert!(got.embedding.is_none());
        assert!(store.file_path(&f.id).exists());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        assert!(store.get("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_path_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let path = store.file_path("abc123");
        assert_eq!(path, tmp.path().join("abc123.png"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let f = face(20);
        store.put(&f).await.unwrap();
        store.put(&f).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_embedding_is_write_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let mut f = face(30);
        store.put(&f).await.unwrap();

        f.embedding = Some(Embedding::new(vec![1.0, 2.0]));
        store.put(&f).await.unwrap();
        assert_eq!(store.meta(&f.id).await.unwrap().unwrap().embedding, f.embedding);

        // Neither a bare record nor a different vector replaces it.
        let bare = face(30);
        store.put(&bare).await.unwrap();
        let mut other = face(30);
        other.embedding = Some(Embedding::new(vec![9.0, 9.0]));
        store.put(&other).await.unwrap();
        assert_eq!(store.meta(&f.id).await.unwrap().unwrap().embedding, f.embedding);
    }

    #[tokio::test]
    async fn test_missing_image_reads_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let f = face(40);
        store.put(&f).await.unwrap();
        std::fs::remove_file(store.file_path(&f.id)).unwrap();
        assert!(store.get(&f.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let a = face(1);
        let b = face(2);
        store.put(&a).await.unwrap();
        store.put(&b).await.unwrap();

        assert_eq!(store.list(&a.id[..12]).await.unwrap(), vec![a.id.clone()]);
        assert_eq!(store.list("").await.unwrap().len(), 2);
        assert!(store.list("not-hex").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_image_is_rewritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let f = face(50);
        let path = store.file_path(&f.id);
        std::fs::write(&path, b"").unwrap();

        store.put(&f).await.unwrap();
        let got = store.get(&f.id).await.unwrap().unwrap();
        assert_eq!(got.image, f.image);
    }

    #[tokio::test]
    async fn test_corrupt_image_reads_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        let f = face(60);
        store.put(&f).await.unwrap();
        std::fs::write(store.file_path(&f.id), b"\x89PNG\r\n").unwrap();

        assert!(store.get(&f.id).await.unwrap().is_none());
        store.put(&f).await.unwrap();
        assert!(store.get(&f.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).await.unwrap();
        store.put(&face(70)).await.unwrap();
        store.put(&face(71)).await.unwrap();

        let stray: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(stray.is_empty());
    }
}
