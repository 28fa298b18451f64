//! PAC backing-file watcher.
//!
//! Watches the directory containing the PAC document and invokes the
//! registered notifier once per raw filesystem event touching the file
//! (create, modify, rename, delete). No coalescing happens here; rapid
//! edit bursts are the consumer's problem, consistent with raw
//! filesystem-event semantics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Callback invoked on every backing-file event.
pub type ChangeNotifier = Arc<dyn Fn() + Send + Sync>;

/// Start watching `path` for changes.
///
/// The returned watcher must be kept alive for events to keep flowing;
/// dropping it unregisters the watch. The parent directory is watched
/// non-recursively and events are filtered by file name, so the watch
/// survives editors that replace the file via rename.
pub fn watch(path: &Path, notifier: ChangeNotifier) -> Result<RecommendedWatcher, notify::Error> {
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| notify::Error::generic("PAC path has no file name"))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_change(&event.kind) {
                    return;
                }
                let matches = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if matches {
                    tracing::debug!(kind = ?event.kind, "PAC document changed on disk");
                    notifier();
                }
            }
            Err(e) => tracing::error!(error = %e, "PAC watch error"),
        },
        notify::Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = ?path, "PAC document watcher started");
    Ok(watcher)
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
