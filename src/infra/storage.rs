use anyhow::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;

use crate::domain::media::{MediaKind, StorageArea, StoredFile};

const TEMP_DIR: &str = "tmp";

/// Content-addressed local storage rooted at a single directory.
///
/// Public files live under `images/`, `videos/` and `thumbnails/`. Anything in
/// progress lives under `tmp/`, which is never reachable through `/files`.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AreaUsage {
    pub count: u64,
    pub bytes: u64,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self> {
        let root = root.into();
        for area in StorageArea::ALL {
            let dir = root.join(area.dir_name());
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let tmp = root.join(TEMP_DIR);
        fs::create_dir_all(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;

        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn area_dir(&self, area: StorageArea) -> PathBuf {
        self.root.join(area.dir_name())
    }

    pub fn url_for(&self, area: StorageArea, filename: &str) -> String {
        format!(
            "{}/files/{}/{}",
            self.public_base_url,
            area.dir_name(),
            filename
        )
    }

    /// Resolves a client-supplied filename inside an area, refusing traversal.
    pub fn resolve(&self, area: StorageArea, filename: &str) -> Option<PathBuf> {
        sanitize_filename(filename).map(|name| self.area_dir(area).join(name))
    }

    pub fn temp_file(&self, name: &str) -> TempFile {
        TempFile::new(self.root.join(TEMP_DIR).join(name))
    }

    /// Writes `bytes` to a temporary name and renames it into the area.
    pub async fn write_atomic(
        &self,
        area: StorageArea,
        filename: &str,
        bytes: &[u8],
    ) -> io::Result<PathBuf> {
        let staged = self.temp_file(&format!("{}.part", filename));
        fs::write(staged.path(), bytes).await?;
        self.promote(staged, area, filename).await
    }

    /// Moves a finished temporary file into its public area.
    pub async fn promote(
        &self,
        staged: TempFile,
        area: StorageArea,
        filename: &str,
    ) -> io::Result<PathBuf> {
        let target = self.area_dir(area).join(filename);
        fs::rename(staged.path(), &target).await?;
        staged.disarm();
        Ok(target)
    }

    pub async fn exists(&self, area: StorageArea, filename: &str) -> bool {
        match self.resolve(area, filename) {
            Some(path) => fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Returns `Ok(false)` when the file was not there to begin with.
    pub async fn remove(&self, area: StorageArea, filename: &str) -> io::Result<bool> {
        let Some(path) = self.resolve(area, filename) else {
            return Ok(false);
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Newest first.
    pub async fn list(&self, kind: MediaKind) -> io::Result<Vec<StoredFile>> {
        let area = kind.area();
        let mut files = Vec::new();
        let mut entries = fs::read_dir(self.area_dir(area)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(error = ?err, path = %entry.path().display(), "failed to stat stored file");
                    continue;
                }
            };
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.starts_with('.') {
                continue;
            }
            let modified_at = metadata
                .modified()
                .map(OffsetDateTime::from)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);

            files.push(StoredFile {
                id: file_stem(&filename).to_string(),
                kind,
                path: format!("{}/{}", area.dir_name(), filename),
                url: self.url_for(area, &filename),
                filename,
                size: metadata.len(),
                modified_at,
            });
        }
        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(files)
    }

    pub async fn usage(&self, area: StorageArea) -> io::Result<AreaUsage> {
        let mut usage = AreaUsage::default();
        let mut entries = fs::read_dir(self.area_dir(area)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                usage.count += 1;
                usage.bytes += metadata.len();
            }
        }
        Ok(usage)
    }

    /// Removes leftovers of interrupted uploads. Returns how many were removed.
    pub async fn sweep_temp(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(self.root.join(TEMP_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(error = ?err, path = %path.display(), "failed to remove stale temp file")
                }
            }
        }
        Ok(removed)
    }
}

/// A file under `tmp/` that is deleted on drop unless it was promoted.
///
/// Dropping the owning task (client disconnect, timeout) therefore cleans up.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Removes the file now. `true` when nothing is left on disk.
    pub async fn discard(mut self) -> bool {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                tracing::warn!(error = ?err, path = %self.path.display(), "failed to remove temp file");
                false
            }
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(error = ?err, path = %self.path.display(), "failed to remove temp file");
            }
        }
    }
}

/// Accepts a single path component made of `[A-Za-z0-9._-]`, not starting with a dot.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    if name.is_empty() || name.len() > 255 || name.starts_with('.') {
        return None;
    }
    let allowed = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    allowed.then_some(name)
}

pub fn file_stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
}
