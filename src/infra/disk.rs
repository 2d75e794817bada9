use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Source of filesystem space figures for the storage root.
pub trait SpaceProbe: Send + Sync {
    fn available(&self) -> io::Result<u64>;
    fn total(&self) -> io::Result<u64>;
}

/// Queries the real filesystem that holds `root`.
#[derive(Debug, Clone)]
pub struct FsSpaceProbe {
    root: PathBuf,
}

impl FsSpaceProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SpaceProbe for FsSpaceProbe {
    fn available(&self) -> io::Result<u64> {
        fs2::available_space(&self.root)
    }

    fn total(&self) -> io::Result<u64> {
        fs2::total_space(&self.root)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
}

impl DiskUsage {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.free)
    }
}

/// Admission control on free disk space.
#[derive(Clone)]
pub struct DiskGuard {
    probe: Arc<dyn SpaceProbe>,
    min_free_bytes: u64,
}

impl DiskGuard {
    pub fn new(probe: Arc<dyn SpaceProbe>, min_free_bytes: u64) -> Self {
        Self {
            probe,
            min_free_bytes,
        }
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    /// True only if writing `required_bytes` still leaves more than the floor free.
    /// A failed filesystem query counts as zero free space.
    pub async fn has_capacity(&self, required_bytes: u64) -> bool {
        let free = self.free_bytes().await;
        match free.checked_sub(required_bytes) {
            Some(remaining) => remaining > self.min_free_bytes,
            None => false,
        }
    }

    pub async fn usage(&self) -> DiskUsage {
        let probe = self.probe.clone();
        let result = tokio::task::spawn_blocking(move || {
            Ok::<_, io::Error>(DiskUsage {
                total: probe.total()?,
                free: probe.available()?,
            })
        })
        .await;

        match result {
            Ok(Ok(usage)) => usage,
            Ok(Err(err)) => {
                tracing::warn!(error = ?err, "failed to query disk usage");
                DiskUsage::default()
            }
            Err(err) => {
                tracing::warn!(error = ?err, "disk usage query panicked");
                DiskUsage::default()
            }
        }
    }

    async fn free_bytes(&self) -> u64 {
        let probe = self.probe.clone();
        match tokio::task::spawn_blocking(move || probe.available()).await {
            Ok(Ok(free)) => free,
            Ok(Err(err)) => {
                tracing::warn!(error = ?err, "failed to query free disk space");
                0
            }
            Err(err) => {
                tracing::warn!(error = ?err, "free space query panicked");
                0
            }
        }
    }
}
