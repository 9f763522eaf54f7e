use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Result, ViewerError};

/// Filesystem change relevant to the index, with root-relative paths.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FileEvent {
    Added(String),
    Removed(String),
    Renamed { from: String, to: String },
}

/// Watches one root directory; raw notify events arrive on a background
/// thread and are normalized onto a channel the viewer drains on tick.
pub struct DirWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<FileEvent>,
}

impl DirWatcher {
    pub fn watch(root: &Path, recursive: bool) -> Result<Self> {
        let (tx, rx) = unbounded::<FileEvent>();
        let root_buf = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    forward(&root_buf, event, &tx);
                }
            },
            Config::default(),
        )
        .map_err(|e| ViewerError::Watch(e.to_string()))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(root, mode)
            .map_err(|e| ViewerError::Watch(e.to_string()))?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Drains every event observed so far without blocking.
    pub fn try_events(&self) -> impl Iterator<Item = FileEvent> + '_ {
        self.rx.try_iter()
    }
}

fn forward(root: &Path, event: Event, tx: &Sender<FileEvent>) {
    for ev in translate(root, event) {
        let _ = tx.send(ev);
    }
}

/// Maps a raw notify event to zero or more core events. Unpaired rename
/// halves degrade to remove/add so the index still converges.
fn translate(root: &Path, event: Event) -> Vec<FileEvent> {
    let rel = |p: &PathBuf| -> Option<String> {
        p.strip_prefix(root)
            .ok()
            .map(|r| r.to_string_lossy().to_string())
    };

    match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => event
            .paths
            .iter()
            .filter_map(rel)
            .map(FileEvent::Added)
            .collect(),

        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => event
            .paths
            .iter()
            .filter_map(rel)
            .map(FileEvent::Removed)
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (event.paths.first(), event.paths.get(1)) {
                (Some(from), Some(to)) => match (rel(from), rel(to)) {
                    (Some(from), Some(to)) => vec![FileEvent::Renamed { from, to }],
                    // Renamed across the watch root boundary.
                    (Some(from), None) => vec![FileEvent::Removed(from)],
                    (None, Some(to)) => vec![FileEvent::Added(to)],
                    (None, None) => Vec::new(),
                },
                _ => Vec::new(),
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().filter_map(rel).map(FileEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().filter_map(rel).map(FileEvent::Added).collect()
        }

        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut ev = Event::new(kind);
        for p in paths {
            ev = ev.add_path(PathBuf::from(p));
        }
        ev
    }

    #[test]
    fn create_and_remove_map_to_relative_paths() {
        let root = Path::new("/pics");

        let added = translate(root, event(EventKind::Create(CreateKind::File), &["/pics/a.png"]));
        assert_eq!(added, [FileEvent::Added("a.png".into())]);

        let removed = translate(
            root,
            event(EventKind::Remove(RemoveKind::Any), &["/pics/sub/b.png"]),
        );
        assert_eq!(removed, [FileEvent::Removed("sub/b.png".into())]);
    }

    #[test]
    fn paired_rename_keeps_both_names() {
        let root = Path::new("/pics");
        let renamed = translate(
            root,
            event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/pics/old.png", "/pics/new.png"],
            ),
        );
        assert_eq!(
            renamed,
            [FileEvent::Renamed {
                from: "old.png".into(),
                to: "new.png".into(),
            }]
        );
    }

    #[test]
    fn rename_leaving_the_root_degrades_to_remove() {
        let root = Path::new("/pics");
        let out = translate(
            root,
            event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/pics/old.png", "/elsewhere/new.png"],
            ),
        );
        assert_eq!(out, [FileEvent::Removed("old.png".into())]);
    }

    #[test]
    fn foreign_paths_are_ignored() {
        let root = Path::new("/pics");
        let out = translate(
            root,
            event(EventKind::Create(CreateKind::File), &["/other/a.png"]),
        );
        assert!(out.is_empty());
    }
}
