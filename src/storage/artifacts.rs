//! Final artifact destination.
//!
//! Reassembled files are streamed into a scratch file, checked, then
//! exposed under the public artifacts directory with a single rename, so
//! the destination path is never observed half-written.  The scratch
//! directory must live on the same filesystem as the artifacts directory.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Longest stored-name suffix kept from the original file name, in bytes.
const MAX_NAME_BYTES: usize = 200;

/// Owns the directory that finished artifacts are published to.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    scratch_dir: PathBuf,
    public_prefix: String,
}

impl ArtifactStore {
    /// Create the store, creating both directories if needed.
    pub fn new(
        dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        public_prefix: &str,
    ) -> anyhow::Result<Self> {
        let dir = dir.into();
        let scratch_dir = scratch_dir.into();
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&scratch_dir)?;
        Ok(Self {
            dir,
            scratch_dir,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        })
    }

    /// Directory artifacts are published into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// URL prefix artifacts are served under, without a trailing `/`.
    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Filesystem path for a stored name.
    pub fn path_of(&self, stored_name: &str) -> PathBuf {
        self.dir.join(stored_name)
    }

    /// Public address for a stored name, e.g. `/uploads/1718000000000_a.pdf`.
    pub fn public_path(&self, stored_name: &str) -> String {
        format!("{}/{}", self.public_prefix, stored_name)
    }

    /// Pick a `<unix-millis>_<name>` stored name not already taken.
    ///
    /// Collisions between concurrent publishers remain possible; this only
    /// avoids clobbering an artifact that already exists.
    pub fn unique_name(&self, original_name: &str) -> String {
        let name = sanitize_file_name(original_name);
        let mut millis = chrono::Utc::now().timestamp_millis();
        loop {
            let candidate = format!("{millis}_{name}");
            if !self.path_of(&candidate).exists() {
                return candidate;
            }
            millis += 1;
        }
    }

    /// Open a scratch file to stream an artifact into.
    pub async fn begin(&self) -> std::io::Result<ArtifactWriter> {
        let tmp_path = self
            .scratch_dir
            .join(format!("artifact-{}", uuid::Uuid::new_v4()));
        let file = tokio::fs::File::create(&tmp_path).await?;
        Ok(ArtifactWriter {
            file: Some(file),
            tmp_path,
            written: 0,
            hasher: Sha256::new(),
            committed: false,
        })
    }
}

/// Result of publishing an artifact.
#[derive(Debug, Clone)]
pub struct CommittedArtifact {
    pub stored_name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the published bytes.
    pub sha256: String,
}

/// Streams bytes into a scratch file.  Dropping an uncommitted writer
/// removes the scratch file.
pub struct ArtifactWriter {
    file: Option<tokio::fs::File>,
    tmp_path: PathBuf,
    written: u64,
    hasher: Sha256,
    committed: bool,
}

impl ArtifactWriter {
    /// Append `data` to the scratch file.
    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("artifact writer already closed"))?;
        file.write_all(data).await?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// fsync the scratch file and rename it to `stored_name` in `store`.
    pub async fn commit(
        mut self,
        store: &ArtifactStore,
        stored_name: &str,
    ) -> std::io::Result<CommittedArtifact> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        let final_path = store.path_of(stored_name);
        tokio::fs::rename(&self.tmp_path, &final_path).await?;
        self.committed = true;

        let hasher = std::mem::take(&mut self.hasher);
        Ok(CommittedArtifact {
            stored_name: stored_name.to_string(),
            path: final_path,
            size: self.written,
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Drop the scratch file without publishing.
    pub async fn discard(mut self) {
        self.file.take();
        if tokio::fs::remove_file(&self.tmp_path).await.is_ok() {
            self.committed = true;
        }
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Make a client-supplied file name safe to use as a single path component.
///
/// Path separators and control characters become `_`, leading dots are
/// stripped, and the result is capped at 200 bytes.  Empty results fall
/// back to `upload`.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim().trim_start_matches('.');

    let mut out = String::new();
    for c in trimmed.chars() {
        if out.len() + c.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        out.push(c);
    }
    if out.is_empty() {
        "upload".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(
            dir.path().join("public"),
            dir.path().join("scratch"),
            "/uploads/",
        )
        .unwrap();
        (dir, store)
    }

    #[test]
    fn test_sanitize_plain_name_unchanged() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("ภาพ 1.png"), "ภาพ 1.png");
    }

    #[test]
    fn test_sanitize_strips_traversal() {
        let name = sanitize_file_name("../../etc/passwd");
        assert!(!name.contains('/'));
        assert!(!name.starts_with('.'));
        assert_eq!(sanitize_file_name("..\\win.ini"), "_win.ini");
    }

    #[test]
    fn test_sanitize_empty_and_dots() {
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name("..."), "upload");
        assert_eq!(sanitize_file_name("a\0b"), "a_b");
    }

    #[test]
    fn test_sanitize_caps_length_on_char_boundary() {
        let long = "é".repeat(300);
        let out = sanitize_file_name(&long);
        assert!(out.len() <= MAX_NAME_BYTES);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_unique_name_has_timestamp_prefix() {
        let (_dir, store) = test_store();
        let name = store.unique_name("photo.jpg");
        let (millis, rest) = name.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(rest, "photo.jpg");
        assert_eq!(store.public_path(&name), format!("/uploads/{name}"));
    }

    #[test]
    fn test_unique_name_skips_existing() {
        let (_dir, store) = test_store();
        let first = store.unique_name("a.txt");
        std::fs::write(store.path_of(&first), b"taken").unwrap();
        let second = store.unique_name("a.txt");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_commit_publishes_and_hashes() {
        let (_dir, store) = test_store();
        let mut writer = store.begin().await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(writer.written(), 11);

        let committed = writer.commit(&store, "1_hello.txt").await.unwrap();
        assert_eq!(committed.size, 11);
        assert_eq!(std::fs::read(&committed.path).unwrap(), b"hello world");
        assert_eq!(
            committed.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_discard_and_drop_leave_no_scratch() {
        let (dir, store) = test_store();

        let mut writer = store.begin().await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.discard().await;

        let mut dropped = store.begin().await.unwrap();
        dropped.write(b"partial").await.unwrap();
        drop(dropped);

        let leftovers = std::fs::read_dir(dir.path().join("scratch")).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }
}
