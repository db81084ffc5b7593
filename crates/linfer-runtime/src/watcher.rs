//! Polling directory watcher
//!
//! Scans a directory on a fixed interval and reports files that appeared
//! or disappeared since the previous scan. Dotfiles are skipped so the
//! temporary files of an in-progress atomic write never fire.

use linfer_core::error::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

pub struct DirectoryWatcher {
    dir: PathBuf,
    interval: Duration,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { dir: dir.into(), interval }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start polling on the current runtime.
    ///
    /// Files present when this is called are recorded as known and never
    /// reported. The task ends when the receiver is dropped.
    pub fn spawn(self) -> Result<(JoinHandle<()>, mpsc::UnboundedReceiver<WatchEvent>)> {
        let mut known = scan_blocking(&self.dir)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let current = match scan(&self.dir).await {
                    Ok(current) => current,
                    Err(e) => {
                        log::warn!("Watch error on {}: {}", self.dir.display(), e);
                        continue;
                    }
                };

                let created = current.difference(&known).map(|p| (WatchEventKind::Create, p));
                let removed = known.difference(&current).map(|p| (WatchEventKind::Remove, p));
                for (kind, path) in created.chain(removed) {
                    log::trace!("{:?} {}", kind, path.display());
                    if tx.send(WatchEvent { kind, path: path.clone() }).is_err() {
                        return;
                    }
                }
                known = current;
            }
        });
        Ok((handle, rx))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn scan_blocking(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !is_hidden(&entry.file_name()) && entry.file_type()?.is_file() {
            files.insert(entry.path());
        }
    }
    Ok(files)
}

async fn scan(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !is_hidden(&entry.file_name()) && entry.file_type().await?.is_file() {
            files.insert(entry.path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<WatchEvent>) -> WatchEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no watch event within 5s")
            .expect("watcher stopped")
    }

    #[tokio::test]
    async fn test_reports_created_and_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.pb"), b"old").unwrap();

        let (handle, mut rx) =
            DirectoryWatcher::new(dir.path(), Duration::from_millis(20)).spawn().unwrap();

        std::fs::write(dir.path().join(".2.pb.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("2.pb"), b"new").unwrap();
        let event = next_event(&mut rx).await;
        let created = dir.path().join("2.pb");
        assert_eq!(event, WatchEvent { kind: WatchEventKind::Create, path: created });

        std::fs::remove_file(dir.path().join("1.pb")).unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, WatchEventKind::Remove);
        assert_eq!(event.path, dir.path().join("1.pb"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_missing_dir_fails_at_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(DirectoryWatcher::new(missing, Duration::from_millis(20)).spawn().is_err());
    }
}
