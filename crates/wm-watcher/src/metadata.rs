//! Filesystem metadata queries used to classify change records.

use async_trait::async_trait;
use camino::Utf8Path;
use wm_core::FileStat;

/// Answers metadata queries for absolute paths.
///
/// Implementations must report a vanished file as an error of kind
/// [`std::io::ErrorKind::NotFound`]; the processor treats that as a benign
/// race and emits nothing.
#[async_trait]
pub trait MetadataSource: Send + Sync + 'static {
    /// Returns `lstat`-style metadata for `path`.
    async fn stat(&self, path: &Utf8Path) -> std::io::Result<FileStat>;
}

/// Queries the local filesystem through tokio.
///
/// Symlinks are not followed, so a link to a directory is reported as a
/// symlink and its changes are not suppressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioMetadata;

#[async_trait]
impl MetadataSource for TokioMetadata {
    async fn stat(&self, path: &Utf8Path) -> std::io::Result<FileStat> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        Ok(FileStat::from(&metadata))
    }
}
