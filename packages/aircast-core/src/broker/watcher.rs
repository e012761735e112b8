//! Broker XML file watcher with debounce.
//!
//! Watches the config file's parent directory (editors replace files by
//! rename, which breaks direct file watches) and coalesces bursts of
//! change events with a short quiet-period debounce before invoking the
//! re-parse callback.

use std::path::Path;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Quiet period that must elapse before a change burst is reported.
const DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(400);

/// A running config watch. Dropping it stops the watch and releases the
/// OS watch handle.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ConfigWatcher {
    /// Starts watching `config_path` for content changes.
    ///
    /// `on_change` runs on the debounce task after each coalesced burst.
    /// Must be called within a tokio runtime.
    pub fn spawn(
        config_path: &Path,
        on_change: impl Fn() + Send + Sync + 'static,
    ) -> notify::Result<Self> {
        let watch_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config_path.to_path_buf());
        let file_name = config_path.file_name().map(std::ffi::OsStr::to_os_string);

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let Ok(event) = res else { return };
                if !event.kind.is_modify() && !event.kind.is_create() {
                    return;
                }
                // Only react to our file; the directory watch sees siblings.
                let ours = match &file_name {
                    Some(name) => event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(name.as_os_str())),
                    None => true,
                };
                if ours {
                    let _ = tx.send(());
                }
            })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let path_display = config_path.display().to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    received = rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                        // Coalesce the burst: keep absorbing events until the
                        // file has been quiet for the debounce period.
                        loop {
                            match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                                Ok(Some(())) => continue,
                                Ok(None) => return,
                                Err(_) => break,
                            }
                        }
                        log::info!("[Broker] Config file changed: {}", path_display);
                        on_change();
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn reports_a_change_after_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icecast.xml");
        std::fs::write(&path, "<icecast><port>8000</port></icecast>").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let _watcher = ConfigWatcher::spawn(&path, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        // Give the OS watch a moment to arm, then touch the file.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, "<icecast><port>8200</port></icecast>").unwrap();

        // The coalesced report must land well within the 2s contract.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(fired.load(Ordering::SeqCst) >= 1, "watcher never fired");
    }

    #[tokio::test]
    async fn sibling_files_do_not_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icecast.xml");
        std::fs::write(&path, "<icecast/>").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let _watcher = ConfigWatcher::spawn(&path, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
