//! On-disk storage for uploaded content.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest sanitised name kept on disk, leaving room for the uuid prefix
/// within the usual 255 byte file name limit.
const MAX_NAME_BYTES: usize = 200;

/// Uploaded file as written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Full path of the stored file
    pub path: PathBuf,
    /// Bytes written
    pub size: u64,
}

/// Writes uploads below `<root>/uploads`.
#[derive(Debug, Clone)]
pub struct FileStore {
    uploads_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the given workspace directory.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            uploads_dir: root.as_ref().join("uploads"),
        }
    }

    /// Directory uploads are written to.
    #[must_use]
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Write an upload under a unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn store(&self, filename: &str, bytes: &[u8]) -> Result<StoredFile> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;

        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename));
        let path = self.uploads_dir.join(stored_name);
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!("Stored upload {} ({} bytes)", path.display(), bytes.len());
        Ok(StoredFile {
            path,
            size: bytes.len() as u64,
        })
    }

    /// Open a stored file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContentNotFound`] if the file is gone.
    pub async fn open(&self, path: &Path) -> Result<tokio::fs::File> {
        tokio::fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ContentNotFound(file_label(path))
            } else {
                Error::Io(e)
            }
        })
    }
}

/// Reduce a client-supplied name to a single safe path component.
///
/// Long names are cut to [`MAX_NAME_BYTES`] on a char boundary, keeping
/// the extension.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('.');

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        truncate_name(&cleaned, MAX_NAME_BYTES)
    }
}

fn truncate_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot < max / 2 => name.split_at(dot),
        _ => (name, ""),
    };

    let mut end = (max - ext.len()).min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &stem[..end], ext)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\shot.png"), "shot.png");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename("a\u{0}b"), "a_b");
    }

    #[test]
    fn test_long_names_are_cut_keeping_extension() {
        let long = format!("{}.png", "a".repeat(240));
        let name = sanitize_filename(&long);
        assert_eq!(name.len(), MAX_NAME_BYTES);
        assert!(name.ends_with(".png"));

        let wide = "é".repeat(150);
        let name = sanitize_filename(&wide);
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.chars().all(|c| c == 'é'));

        let no_stem_ext = format!("a.{}", "b".repeat(300));
        assert_eq!(sanitize_filename(&no_stem_ext).len(), MAX_NAME_BYTES);
    }

    #[tokio::test]
    async fn test_store_long_name() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let long = format!("{}.png", "a".repeat(240));
        let stored = store.store(&long, b"0123456789").await.unwrap();
        assert!(stored.path.file_name().unwrap().len() < 255);
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_store_and_open() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let stored = store.store("hello.txt", b"0123456789").await.unwrap();
        assert_eq!(stored.size, 10);
        assert!(stored.path.starts_with(store.uploads_dir()));
        assert!(stored
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-hello.txt"));

        let content = tokio::fs::read(&stored.path).await.unwrap();
        assert_eq!(content, b"0123456789");
        assert!(store.open(&stored.path).await.is_ok());
    }

    #[tokio::test]
    async fn test_same_name_stored_twice() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let a = store.store("same.txt", b"a").await.unwrap();
        let b = store.store("same.txt", b"b").await.unwrap();
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn test_open_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let result = store.open(&dir.path().join("uploads/missing")).await;
        assert!(matches!(result, Err(Error::ContentNotFound(_))));
    }
}
