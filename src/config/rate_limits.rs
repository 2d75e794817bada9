/// Global upload admission limit: at most `max_uploads` per `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRateLimit {
    pub max_uploads: u32,
    pub window_seconds: u64,
}

impl Default for UploadRateLimit {
    fn default() -> Self {
        Self {
            max_uploads: 100,
            window_seconds: 900,
        }
    }
}
