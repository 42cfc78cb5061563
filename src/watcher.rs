use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

/// A markdown note changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Modified(PathBuf),
    /// `from` is `None` when the platform only reports the new name
    Renamed { from: Option<PathBuf>, to: PathBuf },
}

impl ChangeEvent {
    /// Path the note lives at after the change
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Modified(path) => path,
            ChangeEvent::Renamed { to, .. } => to,
        }
    }
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "md")
}

/// Map a raw notify event to the note changes it describes. Removals are ignored.
pub fn classify_event(event: &Event) -> Vec<ChangeEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let (from, to) = (&event.paths[0], &event.paths[1]);
            if is_markdown(to) {
                vec![ChangeEvent::Renamed {
                    from: Some(from.clone()),
                    to: to.clone(),
                }]
            } else {
                Vec::new()
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter(|p| is_markdown(p))
            .map(|p| ChangeEvent::Renamed {
                from: None,
                to: p.clone(),
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(_)) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| is_markdown(p))
            .map(|p| ChangeEvent::Modified(p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Keeps the notify watcher alive; dropping it stops the stream.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `root` recursively and forward note changes to the returned channel.
pub fn watch_vault(root: &Path) -> Result<(VaultWatcher, mpsc::UnboundedReceiver<ChangeEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in classify_event(&event) {
                    let _ = tx.send(change);
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    debug!(root = %root.display(), "watching vault");

    Ok((VaultWatcher { _watcher: watcher }, rx))
}

#[derive(Default)]
struct DebounceState {
    next_id: u64,
    closed: bool,
    pending: HashMap<PathBuf, (u64, JoinHandle<()>)>,
}

/// Delayed tasks keyed by note path. Scheduling a task for a path that already has one
/// pending cancels the older task, so only the last one in a burst runs.
#[derive(Clone, Default)]
pub struct Debouncer {
    state: Arc<Mutex<DebounceState>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless another task is scheduled for `key` first. Errors
    /// are logged and go no further. Does nothing once the debouncer is closed.
    pub fn schedule<F>(&self, key: PathBuf, delay: Duration, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut state = self.state.lock().expect("debouncer mutex");
        if state.closed {
            debug!(path = %key.display(), "debouncer closed; task dropped");
            return;
        }
        state.next_id += 1;
        let id = state.next_id;

        let shared = Arc::clone(&self.state);
        let path = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                // Once started the task can no longer be cancelled
                let mut state = shared.lock().expect("debouncer mutex");
                if state.pending.get(&path).map(|(pending_id, _)| *pending_id) == Some(id) {
                    state.pending.remove(&path);
                }
            }
            if let Err(e) = task.await {
                warn!(path = %path.display(), error = %e, "delayed task failed");
            }
        });

        if let Some((_, previous)) = state.pending.insert(key.clone(), (id, handle)) {
            previous.abort();
            debug!(path = %key.display(), "rescheduled pending task");
        }
    }

    /// Cancel every task that has not started yet and refuse new ones.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("debouncer mutex");
        state.closed = true;
        for (_, (_, handle)) in state.pending.drain() {
            handle.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("debouncer mutex").closed
    }

    pub fn pending(&self) -> usize {
        self.state.lock().expect("debouncer mutex").pending.len()
    }
}
