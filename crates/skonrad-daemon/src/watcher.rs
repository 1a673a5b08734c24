//! Filesystem watcher for one registered directory.
//!
//! Wraps a `notify` watcher behind a debounced poll interface: raw events land
//! in a pending map and are released once a file has been quiet for the
//! debounce window, so a file still being written is only reported after the
//! writes settle. The watcher is a passive source; the directory context polls
//! it and is the single consumer of its events.
//!
//! Only direct children of the root are reported. The database files and the
//! dot-directories holding embeddings and thumbnails are ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use skonrad_core::DB_FILE_NAME;

/// Default debounce duration (500ms).
const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// A change to one file under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingKind {
    Created,
    Deleted,
    Moved { from: PathBuf },
}

struct PendingEvent {
    kind: PendingKind,
    last_seen: Instant,
}

/// Debounced watcher over a single directory (non-recursive).
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    root: PathBuf,
    pending: HashMap<PathBuf, PendingEvent>,
    debounce: Duration,
}

impl DirectoryWatcher {
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_debounce(root, Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    pub fn with_debounce(root: &Path, debounce: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;
        Ok(Self {
            _watcher: watcher,
            rx,
            root: root.to_path_buf(),
            pending: HashMap::new(),
            debounce,
        })
    }

    /// Drain raw events and return those quiet for at least the debounce
    /// window, in last-seen order.
    pub fn poll_events(&mut self) -> Vec<FileEvent> {
        let now = Instant::now();
        while let Ok(result) = self.rx.try_recv() {
            match result {
                Ok(event) => self.process_raw_event(event, now),
                Err(err) => tracing::warn!("watcher error: {err}"),
            }
        }

        let mut ready: Vec<(Instant, PathBuf, PendingKind)> = Vec::new();
        self.pending.retain(|path, pending| {
            if now.duration_since(pending.last_seen) >= self.debounce {
                ready.push((pending.last_seen, path.clone(), pending.kind.clone()));
                false
            } else {
                true
            }
        });
        ready.sort_by_key(|(last_seen, _, _)| *last_seen);
        ready
            .into_iter()
            .map(|(_, path, kind)| match kind {
                PendingKind::Created => FileEvent::Created(path),
                PendingKind::Deleted => FileEvent::Deleted(path),
                PendingKind::Moved { from } => FileEvent::Moved { from, to: path },
            })
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn process_raw_event(&mut self, event: Event, now: Instant) {
        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    self.push(path, PendingKind::Created, now);
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    self.push(path, PendingKind::Deleted, now);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    let from = from.clone();
                    let to = to.clone();
                    match (self.should_index(&from), self.should_index(&to)) {
                        (true, true) => {
                            self.pending.remove(&from);
                            self.pending.insert(
                                to,
                                PendingEvent {
                                    kind: PendingKind::Moved { from },
                                    last_seen: now,
                                },
                            );
                        }
                        (true, false) => self.push(from, PendingKind::Deleted, now),
                        (false, true) => self.push(to, PendingKind::Created, now),
                        (false, false) => {}
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.push(path, PendingKind::Deleted, now);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    self.push(path, PendingKind::Created, now);
                }
            }
            // in-place data changes do not re-index
            _ => {}
        }
    }

    fn push(&mut self, path: PathBuf, kind: PendingKind, now: Instant) {
        if !self.should_index(&path) {
            return;
        }
        match self.pending.get_mut(&path) {
            Some(existing) => {
                match merge_pending_kinds(&existing.kind, &kind) {
                    Some(merged) => {
                        existing.kind = merged;
                        existing.last_seen = now;
                    }
                    // create followed by delete cancels out
                    None => {
                        self.pending.remove(&path);
                    }
                }
            }
            None => {
                self.pending.insert(path, PendingEvent { kind, last_seen: now });
            }
        }
    }

    /// Direct children of the root only; database files, dot-entries (the
    /// embeddings and thumbnails caches) and temp siblings are ignored.
    fn should_index(&self, path: &Path) -> bool {
        if path.parent() != Some(self.root.as_path()) {
            return false;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        !is_ignored_name(name)
    }
}

fn is_ignored_name(name: &str) -> bool {
    name == DB_FILE_NAME || name.starts_with(&format!("{DB_FILE_NAME}-"))
}

/// Combine an already-pending kind with a newer one for the same path.
/// `None` means the events cancel out and the entry should be dropped.
fn merge_pending_kinds(existing: &PendingKind, new: &PendingKind) -> Option<PendingKind> {
    match (existing, new) {
        (PendingKind::Created, PendingKind::Deleted) => None,
        (_, new) => Some(new.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_create_then_delete_cancels() {
        assert_eq!(
            merge_pending_kinds(&PendingKind::Created, &PendingKind::Deleted),
            None
        );
    }

    #[test]
    fn test_merge_delete_then_create_is_create() {
        assert_eq!(
            merge_pending_kinds(&PendingKind::Deleted, &PendingKind::Created),
            Some(PendingKind::Created)
        );
    }

    #[test]
    fn test_should_index_filters_database_and_dot_entries() {
        let dir = TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(dir.path()).unwrap();

        assert!(watcher.should_index(&dir.path().join("cat.png")));
        assert!(!watcher.should_index(&dir.path().join(DB_FILE_NAME)));
        assert!(!watcher.should_index(&dir.path().join(format!("{DB_FILE_NAME}-journal"))));
        assert!(!watcher.should_index(&dir.path().join(".embeddings")));
        assert!(!watcher.should_index(&dir.path().join(".thumbnails")));
        assert!(!watcher.should_index(&dir.path().join(".embeddings/cat.png.emb")));
        assert!(!watcher.should_index(&dir.path().join("sub/nested.png")));
    }

    #[test]
    fn test_created_event_released_after_debounce() {
        let dir = TempDir::new().unwrap();
        let mut watcher =
            DirectoryWatcher::with_debounce(dir.path(), Duration::from_millis(0)).unwrap();
        let path = dir.path().join("cat.png");

        let now = Instant::now();
        watcher.process_raw_event(
            Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(path.clone()),
            now,
        );
        assert!(watcher.has_pending());

        let events = watcher.poll_events();
        assert_eq!(events, vec![FileEvent::Created(path)]);
        assert!(!watcher.has_pending());
    }

    #[test]
    fn test_rename_within_root_becomes_move() {
        let dir = TempDir::new().unwrap();
        let mut watcher =
            DirectoryWatcher::with_debounce(dir.path(), Duration::from_millis(0)).unwrap();
        let from = dir.path().join("old.png");
        let to = dir.path().join("new.png");

        watcher.process_raw_event(
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(from.clone())
                .add_path(to.clone()),
            Instant::now(),
        );

        assert_eq!(watcher.poll_events(), vec![FileEvent::Moved { from, to }]);
    }
}
