//! Detects a finished download in a directory.
//!
//! [`DownloadTracker`] holds the decision logic over successive directory
//! snapshots; [`DownloadWatcher`] feeds it by polling the file system.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_stream::wrappers::ReadDirStream;
use tokio_util::sync::CancellationToken;

use crate::error::{BrowserError, Result};

/// Suffixes browsers use for downloads still in progress.
pub const TEMP_SUFFIXES: [&str; 4] = [".crdownload", ".part", ".tmp", ".download"];

/// File name to size for the regular files of a directory.
pub type Snapshot = BTreeMap<PathBuf, u64>;

pub fn is_temporary(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    TEMP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

pub async fn snapshot_dir(dir: &Path) -> io::Result<Snapshot> {
    let mut entries = ReadDirStream::new(tokio::fs::read_dir(dir).await?);
    let mut snapshot = Snapshot::new();
    while let Some(entry) = entries.next().await {
        let entry = entry?;
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Removed between listing and stat
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if metadata.is_file() {
            snapshot.insert(entry.path(), metadata.len());
        }
    }
    Ok(snapshot)
}

/// Files present before an export was triggered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadBaseline {
    files: HashSet<PathBuf>,
}

impl DownloadBaseline {
    pub async fn snapshot(dir: &Path) -> io::Result<Self> {
        let snapshot = snapshot_dir(dir).await?;
        Ok(Self::from_paths(snapshot.into_keys()))
    }

    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: paths.into_iter().collect(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Decides, one snapshot at a time, when a new file has finished downloading.
///
/// Every new non-temporary file is tracked with its last seen size, so a stray or
/// still-growing file cannot hide a finished one.
#[derive(Debug, Clone)]
pub struct DownloadTracker {
    baseline: DownloadBaseline,
    candidates: BTreeMap<PathBuf, u64>,
}

impl DownloadTracker {
    pub fn new(baseline: DownloadBaseline) -> Self {
        Self {
            baseline,
            candidates: BTreeMap::new(),
        }
    }

    pub fn is_tracking(&self, path: &Path) -> bool {
        self.candidates.contains_key(path)
    }

    /// Feed the next poll. Returns the first file whose non-zero size held across two polls.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Option<PathBuf> {
        let vanished: Vec<PathBuf> = self
            .candidates
            .keys()
            .filter(|path| !snapshot.contains_key(*path))
            .cloned()
            .collect();
        if !vanished.is_empty() {
            for path in &vanished {
                log::info!(
                    "Download candidate {} disappeared, refreshing baseline",
                    path.display()
                );
                self.candidates.remove(path);
            }
            self.refresh_baseline(snapshot);
        }

        let mut confirmed = None;
        for (path, &size) in snapshot {
            if self.baseline.contains(path) || is_temporary(path) {
                continue;
            }
            match self.candidates.insert(path.clone(), size) {
                Some(last_size) if size > 0 && size == last_size => {
                    if confirmed.is_none() {
                        confirmed = Some(path.clone());
                    }
                }
                Some(_) => {}
                None => {
                    log::debug!("Tracking download candidate {} ({} bytes)", path.display(), size)
                }
            }
        }
        confirmed
    }

    /// Shrink the baseline to what is still on disk, keeping new finished files eligible.
    fn refresh_baseline(&mut self, snapshot: &Snapshot) {
        let files = snapshot
            .keys()
            .filter(|path| self.baseline.contains(path) || is_temporary(path))
            .cloned();
        self.baseline = DownloadBaseline::from_paths(files);
    }
}

/// Polls a directory until a new, size-stable, non-temporary file shows up.
#[derive(Debug, Clone)]
pub struct DownloadWatcher {
    poll_interval: Duration,
    cancel: Option<CancellationToken>,
}

impl Default for DownloadWatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl DownloadWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// `Ok(None)` when the timeout passes without a confirmed file.
    /// The only error is [`BrowserError::Cancelled`].
    pub async fn wait_for_new_file(
        &self,
        dir: &Path,
        baseline: DownloadBaseline,
        timeout: Duration,
    ) -> Result<Option<PathBuf>> {
        let deadline = Instant::now() + timeout;
        let mut tracker = DownloadTracker::new(baseline);
        log::info!(
            "Watching {} for a new download (timeout {:?})",
            dir.display(),
            timeout
        );

        loop {
            if self.is_cancelled() {
                return Err(BrowserError::Cancelled);
            }

            match snapshot_dir(dir).await {
                Ok(snapshot) => {
                    if let Some(path) = tracker.observe(&snapshot) {
                        log::info!("Download complete: {}", path.display());
                        return Ok(Some(path));
                    }
                }
                Err(e) => log::warn!("Cannot list {}: {}", dir.display(), e),
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!("No finished download in {} after {:?}", dir.display(), timeout);
                return Ok(None);
            }

            let pause = self.poll_interval.min(deadline - now);
            match &self.cancel {
                Some(token) => tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = token.cancelled() => return Err(BrowserError::Cancelled),
                },
                None => tokio::time::sleep(pause).await,
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, u64)]) -> Snapshot {
        entries
            .iter()
            .map(|(name, size)| (PathBuf::from(format!("/dl/{}", name)), *size))
            .collect()
    }

    #[test]
    fn test_temporary_suffixes() {
        assert!(is_temporary(Path::new("/dl/video.mp4.crdownload")));
        assert!(is_temporary(Path::new("/dl/video.PART")));
        assert!(!is_temporary(Path::new("/dl/video.mp4")));
    }

    #[test]
    fn test_temp_file_replaced_by_final_file() {
        let baseline = DownloadBaseline::from_paths([PathBuf::from("/dl/old.mp4")]);
        let mut tracker = DownloadTracker::new(baseline);

        assert_eq!(tracker.observe(&snap(&[("old.mp4", 9), ("x.crdownload", 100)])), None);
        assert_eq!(tracker.observe(&snap(&[("old.mp4", 9), ("x.crdownload", 400)])), None);
        assert_eq!(tracker.observe(&snap(&[("old.mp4", 9), ("x.mp4", 800)])), None);
        assert_eq!(
            tracker.observe(&snap(&[("old.mp4", 9), ("x.mp4", 800)])),
            Some(PathBuf::from("/dl/x.mp4"))
        );
    }

    #[test]
    fn test_growing_file_is_not_confirmed() {
        let mut tracker = DownloadTracker::new(DownloadBaseline::default());
        assert_eq!(tracker.observe(&snap(&[("a.mp4", 10)])), None);
        assert_eq!(tracker.observe(&snap(&[("a.mp4", 20)])), None);
        assert_eq!(tracker.observe(&snap(&[("a.mp4", 30)])), None);
        assert_eq!(
            tracker.observe(&snap(&[("a.mp4", 30)])),
            Some(PathBuf::from("/dl/a.mp4"))
        );
    }

    #[test]
    fn test_empty_file_never_confirms() {
        let mut tracker = DownloadTracker::new(DownloadBaseline::default());
        for _ in 0..4 {
            assert_eq!(tracker.observe(&snap(&[("a.mp4", 0)])), None);
        }
    }

    #[test]
    fn test_vanished_candidate_is_replaced() {
        let mut tracker = DownloadTracker::new(DownloadBaseline::default());
        assert_eq!(tracker.observe(&snap(&[("draft.mp4", 50)])), None);
        assert!(tracker.is_tracking(Path::new("/dl/draft.mp4")));

        // Renamed by the site between polls
        assert_eq!(tracker.observe(&snap(&[("final.mp4", 50)])), None);
        assert!(!tracker.is_tracking(Path::new("/dl/draft.mp4")));
        assert!(tracker.is_tracking(Path::new("/dl/final.mp4")));
        assert_eq!(
            tracker.observe(&snap(&[("final.mp4", 50)])),
            Some(PathBuf::from("/dl/final.mp4"))
        );
    }

    #[test]
    fn test_stray_file_does_not_hide_finished_download() {
        let mut tracker = DownloadTracker::new(DownloadBaseline::default());
        let poll = snap(&[("a_stray.mp4", 0), ("export.mp4", 800)]);

        assert_eq!(tracker.observe(&poll), None);
        assert_eq!(tracker.observe(&poll), Some(PathBuf::from("/dl/export.mp4")));
    }

    #[test]
    fn test_growing_file_sorted_first_does_not_block() {
        let mut tracker = DownloadTracker::new(DownloadBaseline::default());
        assert_eq!(tracker.observe(&snap(&[("a.mp4", 10), ("b.mp4", 500)])), None);
        assert_eq!(
            tracker.observe(&snap(&[("a.mp4", 20), ("b.mp4", 500)])),
            Some(PathBuf::from("/dl/b.mp4"))
        );
    }
}
