use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::config::ViewerOptions;
use crate::error::{Result, ViewerError};
use crate::evict::Evictor;
use crate::image_entry::{Image, RotateDirection};
use crate::index::{list_files, FileEntry, FileIndex, ImageKey};
use crate::prefetch::prefetch_window;
use crate::sched::{Priority, Scheduler, TaskContext, TaskId};
use crate::signal::{Signal, Subscription};
use crate::sort::SortKey;
use crate::watch::{DirWatcher, FileEvent};
use crate::ViewerContext;

const SCAN_WORKERS: usize = 2;

/* ───────────────────────── display state ────────────────────────── */

/// What is (or is about to be) on screen: an index into the file list
/// plus a snapshot of the entry it referred to when chosen.
#[derive(Clone, Default)]
struct DisplayState {
    index: Option<usize>,
    dir_hash: u32,
    rel_path: String,
}

/// How a list replacement re-points the current selection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ReindexAction {
    /// Keep the index as-is, clamped to the new size.
    DoNothing,
    /// Find the current file in the new list; fall back to a neighbor.
    KeepCurrentFile,
    /// Back to the first entry.
    Reset,
}

struct ViewerState {
    index: FileIndex,
    recursive: bool,
    current: DisplayState,
    pending: DisplayState,
    pending_dirty: bool,
    current_image: Option<Image>,
    store: HashMap<ImageKey, Image>,
    last_window: Vec<ImageKey>,
    watcher: Option<DirWatcher>,
    scan_task: Option<TaskId>,
}

// Lock order: viewer state → evictor queue → per-image data. The state
// lock is never held across a decoder join.
struct ViewerShared {
    ctx: Arc<ViewerContext>,
    options: ViewerOptions,
    scheduler: Scheduler,
    evictor: Evictor,
    scanning: AtomicBool,
    first_scan_complete: AtomicBool,
    state: Mutex<ViewerState>,
    image_changed: Signal<Option<Image>>,
    filelist_changed: Signal<usize>,
}

/// The image management core: owns the file index, the image store and
/// the eviction queue, and turns navigation into a reconciled prefetch
/// window. Drive it by calling [`tick`](Viewer::tick) from the UI loop.
pub struct Viewer {
    shared: Arc<ViewerShared>,
}

/* ───────────────────────── construction ─────────────────────────── */

impl Viewer {
    pub fn new(options: ViewerOptions) -> Self {
        Self::with_context(options, ViewerContext::new())
    }

    pub fn with_context(options: ViewerOptions, ctx: Arc<ViewerContext>) -> Self {
        let recursive = options.recursive_scan;
        let index = FileIndex::new(PathBuf::new(), options.sort_key, options.sort_reverse);
        Self {
            shared: Arc::new(ViewerShared {
                ctx,
                options,
                scheduler: Scheduler::new(SCAN_WORKERS),
                evictor: Evictor::new(),
                scanning: AtomicBool::new(false),
                first_scan_complete: AtomicBool::new(false),
                state: Mutex::new(ViewerState {
                    index,
                    recursive,
                    current: DisplayState::default(),
                    pending: DisplayState::default(),
                    pending_dirty: false,
                    current_image: None,
                    store: HashMap::new(),
                    last_window: Vec::new(),
                    watcher: None,
                    scan_task: None,
                }),
                image_changed: Signal::new(),
                filelist_changed: Signal::new(),
            }),
        }
    }

    pub fn on_image_changed<F>(&self, callback: F) -> Subscription<Option<Image>>
    where
        F: Fn(&Option<Image>) + Send + 'static,
    {
        self.shared.image_changed.subscribe(callback)
    }

    pub fn on_filelist_changed<F>(&self, callback: F) -> Subscription<usize>
    where
        F: Fn(&usize) + Send + 'static,
    {
        self.shared.filelist_changed.subscribe(callback)
    }

    fn lock_state(&self) -> MutexGuard<'_, ViewerState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /* ─────────────────── entry points ─────────────────── */

    /// Points the viewer at a file or directory. A file argument shows up
    /// immediately as a one-entry preview while the full scan runs in the
    /// background; inside an already-indexed recursive root this is just
    /// a navigation.
    pub fn set_viewer_path(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ViewerError::PathNotFound(path.to_path_buf()));
        }

        let file_path = path.is_file().then(|| path.to_path_buf());
        let dir = match &file_path {
            Some(file) => file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or(std::env::current_dir()?),
            None => path.to_path_buf(),
        };
        let dir = dir.canonicalize().unwrap_or(dir);

        {
            let mut st = self.lock_state();
            let same_root = st.index.root() == dir;
            let inside_recursive = st.recursive
                && !st.index.root().as_os_str().is_empty()
                && dir.starts_with(st.index.root());

            if same_root || inside_recursive {
                // Already covered by the active index: navigate, no rescan.
                drop(st);
                match &file_path {
                    Some(file) => self.jump_to_filename(file),
                    None => {
                        if !same_root {
                            self.jump_to_directory(&dir);
                        }
                    }
                }
                return Ok(());
            }

            if let Some(task) = st.scan_task.take() {
                drop(st);
                self.shared.scheduler.cancel(task, true);
                st = self.lock_state();
            }

            self.shared.first_scan_complete.store(false, Ordering::SeqCst);
            st.index = FileIndex::new(
                dir.clone(),
                st.index.sort_key(),
                st.index.reverse(),
            );

            st.watcher = match DirWatcher::watch(&dir, st.recursive) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!("file watch unavailable for {}: {e}", dir.display());
                    None
                }
            };

            let mut action = ReindexAction::KeepCurrentFile;
            match &file_path {
                Some(file) if self.shared.options.extension_allowed(&file.to_string_lossy()) => {
                    // One-entry preview so the user sees something now.
                    if let Some(rel) = st.index.strip_root(&file.canonicalize().unwrap_or_else(|_| file.clone()))
                    {
                        let entry = FileEntry::for_path(st.index.root(), &rel);
                        st.index.rebuild(vec![entry]);
                        set_pending(&mut st, Some(0));
                    }
                }
                _ => action = ReindexAction::Reset,
            }

            let task = self.submit_scan(dir, false, action, Priority::Critical);
            st.scan_task = Some(task);
        }

        Ok(())
    }

    /// Applies the pending navigation and reconciles the prefetch window.
    /// Call once per UI frame.
    pub fn tick(&self) {
        self.process_watch_events();

        let emit = {
            let mut st = self.lock_state();
            if !st.pending_dirty {
                None
            } else {
                // The cheap-restart heuristic for the previous image only
                // makes sense within the same directory root.
                let previous_index = if st.pending.index.is_some()
                    && st.pending.dir_hash != st.current.dir_hash
                {
                    None
                } else {
                    st.current.index
                };
                if st.pending.index.is_some() {
                    st.current = std::mem::take(&mut st.pending);
                }
                self.reconcile_prefetch(&mut st, previous_index);
                st.pending_dirty = false;
                Some(st.current_image.clone())
            }
        };

        if let Some(image) = emit {
            self.shared.image_changed.emit(&image);
        }
    }

    /* ─────────────────── navigation ─────────────────── */

    pub fn jump_to_index(&self, index: usize) {
        let mut st = self.lock_state();
        if st.index.is_empty() {
            return;
        }
        let index = index.min(st.index.len() - 1);
        set_pending(&mut st, Some(index));
    }

    /// Jumps to a file by absolute or root-relative path; falls back to
    /// the first entry when it is not in the list.
    pub fn jump_to_filename(&self, path: &Path) {
        let mut st = self.lock_state();
        if st.index.is_empty() {
            return;
        }
        let rel = relative_to_index(&st.index, path);
        let target = rel.and_then(|r| st.index.position_of(&r)).unwrap_or(0);
        set_pending(&mut st, Some(target));
    }

    /// Jumps to the first entry inside the given directory prefix.
    pub fn jump_to_directory(&self, path: &Path) {
        let mut st = self.lock_state();
        if st.index.is_empty() {
            return;
        }
        let target = relative_to_index(&st.index, path)
            .and_then(|r| {
                let prefix = if r.is_empty() || r.ends_with('/') {
                    r
                } else {
                    format!("{r}/")
                };
                st.index.first_with_prefix(&prefix)
            })
            .unwrap_or(0);
        set_pending(&mut st, Some(target));
    }

    pub fn next_image(&self) {
        self.change_image(1);
    }

    pub fn previous_image(&self) {
        self.change_image(-1);
    }

    /// Steps by `delta` with modular wrap-around.
    pub fn change_image(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        let mut st = self.lock_state();
        let len = st.index.len();
        if len == 0 {
            return;
        }
        // Base on the freshest navigation so rapid steps accumulate
        // between ticks.
        let base = if st.pending_dirty {
            st.pending.index
        } else {
            st.current.index
        }
        .unwrap_or(0);
        let target = (base as i64 + delta).rem_euclid(len as i64) as usize;
        set_pending(&mut st, Some(target));
    }

    /* ─────────────────── current image ops ─────────────────── */

    /// Unloads the current image and deletes its file. The list update
    /// arrives through the watcher; without one the removal is applied
    /// directly.
    pub fn delete_current(&self) -> Result<()> {
        let (image, absolute, rel, watched) = {
            let st = self.lock_state();
            let Some(image) = st.current_image.clone() else {
                return Ok(());
            };
            let rel = st.current.rel_path.clone();
            let absolute = st.index.absolute_path(&rel);
            (image, absolute, rel, st.watcher.is_some())
        };

        image.unload();
        std::fs::remove_file(&absolute)?;
        if !watched {
            self.apply_events(vec![FileEvent::Removed(rel)]);
        }
        Ok(())
    }

    pub fn rotate_current(&self, direction: RotateDirection) {
        let image = self.lock_state().current_image.clone();
        if let Some(image) = image {
            image.rotate(direction);
        }
    }

    /* ─────────────────── sorting / scan modes ─────────────────── */

    pub fn set_sorting(&self, key: SortKey, reverse: bool) {
        let emit = {
            let mut st = self.lock_state();
            if st.index.sort_key() == key && st.index.reverse() == reverse {
                return;
            }
            st.index.set_sorting(key, reverse);
            if st.index.is_empty() {
                return;
            }

            // The selection follows the file, silently.
            let previous_index = st.current.index;
            if let Some(pos) = {
                let rel = st.current.rel_path.clone();
                st.index.position_of(&rel)
            } {
                st.current.index = Some(pos);
            }
            self.reconcile_prefetch(&mut st, previous_index);
            st.index.len()
        };
        self.shared.filelist_changed.emit(&emit);
    }

    pub fn sort_key(&self) -> SortKey {
        self.lock_state().index.sort_key()
    }

    pub fn sort_reverse(&self) -> bool {
        self.lock_state().index.reverse()
    }

    pub fn is_recursive_scan(&self) -> bool {
        self.lock_state().recursive
    }

    /// Re-runs the scan for the current root, keeping the index position
    /// as-is (clamped if the list shrank).
    pub fn refresh(&self) {
        let mut st = self.lock_state();
        let root = st.index.root().to_path_buf();
        if root.as_os_str().is_empty() {
            return;
        }
        if let Some(task) = st.scan_task.take() {
            drop(st);
            self.shared.scheduler.cancel(task, true);
            st = self.lock_state();
        }
        let task = self.submit_scan(root, true, ReindexAction::DoNothing, Priority::Critical);
        st.scan_task = Some(task);
    }

    /// Switches recursive enumeration on or off; with `immediate_rescan`
    /// the active root is rescanned right away.
    pub fn set_recursive_scan(&self, enabled: bool, immediate_rescan: bool) {
        let mut st = self.lock_state();
        if st.recursive == enabled {
            return;
        }
        st.recursive = enabled;

        let root = st.index.root().to_path_buf();
        if root.as_os_str().is_empty() || !immediate_rescan {
            return;
        }

        if let Some(task) = st.scan_task.take() {
            drop(st);
            self.shared.scheduler.cancel(task, true);
            st = self.lock_state();
        }

        st.watcher = DirWatcher::watch(&root, enabled).ok();
        self.shared.first_scan_complete.store(false, Ordering::SeqCst);
        let task = self.submit_scan(root, true, ReindexAction::KeepCurrentFile, Priority::Critical);
        st.scan_task = Some(task);
    }

    /* ─────────────────── accessors ─────────────────── */

    pub fn current_index(&self) -> Option<usize> {
        self.lock_state().current.index
    }

    pub fn num_images(&self) -> usize {
        self.lock_state().index.len()
    }

    pub fn current_image(&self) -> Option<Image> {
        self.lock_state().current_image.clone()
    }

    /// The current file's path; root-relative unless `absolute`.
    pub fn current_filepath(&self, absolute: bool) -> Option<PathBuf> {
        let st = self.lock_state();
        st.current.index?;
        let rel = &st.current.rel_path;
        Some(if absolute {
            st.index.absolute_path(rel)
        } else {
            PathBuf::from(rel)
        })
    }

    pub fn root_path(&self) -> PathBuf {
        self.lock_state().index.root().to_path_buf()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    pub fn is_first_scan_complete(&self) -> bool {
        self.shared.first_scan_complete.load(Ordering::SeqCst)
    }

    /// One line per stored image, sorted, for a diagnostics overlay.
    pub fn stats(&self) -> String {
        let mut lines: Vec<String> = {
            let st = self.lock_state();
            st.store.values().map(|img| img.stats()).collect()
        };
        lines.sort();
        lines.join("\n")
    }

    #[cfg(test)]
    pub(crate) fn window_keys(&self) -> Vec<ImageKey> {
        self.lock_state().last_window.clone()
    }

    #[cfg(test)]
    pub(crate) fn eviction_pending(&self, key: ImageKey) -> bool {
        self.shared.evictor.contains(key)
    }

    #[cfg(test)]
    pub(crate) fn stored_image(&self, rel: &str) -> Option<Image> {
        let st = self.lock_state();
        let key = st.index.key_for(rel);
        st.store.get(&key).cloned()
    }

    /* ─────────────────── watch events ─────────────────── */

    fn process_watch_events(&self) {
        let events: Vec<FileEvent> = {
            let st = self.lock_state();
            match &st.watcher {
                Some(watcher) => watcher.try_events().collect(),
                None => Vec::new(),
            }
        };
        if !events.is_empty() {
            self.apply_events(events);
        }
    }

    /// Applies index change events in arrival order. Also the seam tests
    /// use to drive the watch path deterministically.
    pub(crate) fn apply_events(&self, events: Vec<FileEvent>) {
        let mut list_emits: Vec<usize> = Vec::new();
        let mut to_unload: Vec<Image> = Vec::new();

        {
            let mut st = self.lock_state();
            let previous_index = st.current.index;
            let mut ensure_needed = false;

            for event in events {
                match event {
                    FileEvent::Added(name) => {
                        if !self.shared.options.extension_allowed(&name)
                            || st.index.position_of(&name).is_some()
                        {
                            continue;
                        }
                        debug!("watch: added {name}");
                        let entry = FileEntry::for_path(st.index.root(), &name);
                        st.index.insert_sorted(entry);
                        ensure_needed = true;
                        list_emits.push(st.index.len());
                    }

                    FileEvent::Removed(name) => {
                        if !self.shared.options.extension_allowed(&name) {
                            continue;
                        }
                        let Some(pos) = st.index.remove(&name) else {
                            continue;
                        };
                        debug!("watch: removed {name}");

                        let key = st.index.key_for(&name);
                        self.shared.evictor.cancel(key);
                        if let Some(image) = st.store.remove(&key) {
                            to_unload.push(image);
                        }

                        if st.current.rel_path == name {
                            if st.index.is_empty() {
                                set_pending(&mut st, None);
                                st.current = DisplayState::default();
                            } else {
                                // Prefer the next survivor in sort order.
                                let target = pos.min(st.index.len() - 1);
                                set_pending(&mut st, Some(target));
                            }
                        } else {
                            ensure_needed = true;
                        }
                        list_emits.push(st.index.len());
                    }

                    FileEvent::Renamed { from, to } => {
                        let from_allowed = self.shared.options.extension_allowed(&from);
                        let to_allowed = self.shared.options.extension_allowed(&to);
                        match (from_allowed, to_allowed) {
                            (true, true) => {
                                debug!("watch: renamed {from} -> {to}");
                                if st.index.rename(&from, &to) {
                                    ensure_needed = true;
                                }
                                if st.current.rel_path == from {
                                    st.current.rel_path = to.clone();
                                }
                                if st.pending_dirty && st.pending.rel_path == from {
                                    st.pending.rel_path = to;
                                }
                            }
                            (true, false) => {
                                // Renamed out of the viewable set.
                                drop(st);
                                self.apply_events(vec![FileEvent::Removed(from)]);
                                st = self.lock_state();
                            }
                            (false, true) => {
                                drop(st);
                                self.apply_events(vec![FileEvent::Added(to)]);
                                st = self.lock_state();
                            }
                            (false, false) => {}
                        }
                    }
                }
            }

            if ensure_needed {
                ensure_image_index(&mut st);
                // A silent repoint still shifts the window's indices;
                // reconcile now so nothing lingers outside it. A raised
                // navigation leaves this to the next tick instead.
                if !st.pending_dirty {
                    self.reconcile_prefetch(&mut st, previous_index);
                }
            }
        }

        for image in to_unload {
            image.unload();
        }
        for len in list_emits {
            self.shared.filelist_changed.emit(&len);
        }
    }

    /* ─────────────────── prefetch reconciliation ─────────────────── */

    /// The central algorithm: derives the window around the current
    /// index, gets every member loading (or resumed), and reclassifies
    /// images entering/leaving the window against the eviction queue in
    /// one atomic step.
    fn reconcile_prefetch(&self, st: &mut ViewerState, previous_index: Option<usize>) {
        let options = &self.shared.options;
        let len = st.index.len();

        let window = match st.current.index {
            Some(current) if len > 0 => prefetch_window(
                current,
                len,
                options.prefetch_forward,
                options.prefetch_backward,
            ),
            _ => Vec::new(),
        };

        if window.is_empty() {
            st.current_image = None;
        }

        let mut window_keys: Vec<ImageKey> = Vec::with_capacity(window.len());
        for slot in &window {
            let Some(entry) = st.index.entry(slot.index) else {
                continue;
            };
            let rel_path = entry.rel_path.clone();
            let key = st.index.key_for(&rel_path);
            window_keys.push(key);

            let absolute = st.index.absolute_path(&rel_path);
            let image = st
                .store
                .entry(key)
                .or_insert_with(|| Image::new(absolute, key, options, self.shared.ctx.clone()))
                .clone();

            let is_current = Some(slot.index) == st.current.index;
            if is_current {
                st.current_image = Some(image.clone());
            }

            if image.has_error() {
                continue;
            }

            if image.is_unloaded() {
                image.start_loading(!is_current);
            } else if is_current && image.is_suspended() {
                image.resume();
            } else if Some(slot.index) == previous_index && !is_current {
                // Its first frames are still buffered; rewind cheaply.
                image.restart(true);
            }

            image.set_active(is_current);
        }

        let previous: HashSet<ImageKey> = st.last_window.iter().copied().collect();
        let now: HashSet<ImageKey> = window_keys.iter().copied().collect();

        let mut entering: Vec<ImageKey> = Vec::new();
        for key in &window_keys {
            if !previous.contains(key) {
                entering.push(*key);
                if let Some(image) = st.store.get(key) {
                    if !image.is_unloaded() {
                        image.restart(true);
                    }
                }
            }
        }

        let mut leaving: Vec<Image> = Vec::new();
        for key in &st.last_window {
            if !now.contains(key) {
                if let Some(image) = st.store.get(key) {
                    if !image.is_unloaded() {
                        image.suspend();
                        leaving.push(image.clone());
                    }
                }
            }
        }

        self.shared
            .evictor
            .reclassify(&entering, leaving, options.eviction_delay);

        st.last_window = window_keys;
    }

    /* ─────────────────── scanning ─────────────────── */

    fn submit_scan(
        &self,
        dir: PathBuf,
        allow_full_recursive: bool,
        action: ReindexAction,
        priority: Priority,
    ) -> TaskId {
        let shared = self.shared.clone();
        self.shared.scheduler.submit(priority, move |task| {
            scan_filelist(&shared, &dir, allow_full_recursive, action, task);
        })
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.shared.ctx.request_quit();
        let task = self.lock_state().scan_task.take();
        if let Some(task) = task {
            self.shared.scheduler.cancel(task, true);
        }
        let images: Vec<Image> = {
            let st = self.lock_state();
            st.store.values().cloned().collect()
        };
        for image in images {
            image.unload();
        }
    }
}

/* ───────────────────────── free helpers ─────────────────────────── */

fn set_pending(st: &mut ViewerState, index: Option<usize>) {
    match index {
        Some(i) if i < st.index.len() => {
            st.pending = DisplayState {
                index: Some(i),
                dir_hash: st.index.root_hash(),
                rel_path: st.index.entry(i).map(|e| e.rel_path.clone()).unwrap_or_default(),
            };
        }
        _ => {
            st.pending = DisplayState::default();
        }
    }
    st.pending_dirty = true;
}

/// Re-points the freshest display state at its file by identity after a
/// list mutation, without raising a navigation. Falls back to a nearby
/// index if the file vanished.
fn ensure_image_index(st: &mut ViewerState) {
    if st.index.is_empty() {
        set_pending(st, None);
        st.current = DisplayState::default();
        return;
    }

    let use_pending = st.pending_dirty && st.pending.index.is_some();
    let (rel_path, old_index) = if use_pending {
        (st.pending.rel_path.clone(), st.pending.index)
    } else {
        (st.current.rel_path.clone(), st.current.index)
    };

    match st.index.position_of(&rel_path) {
        Some(pos) => {
            if use_pending {
                st.pending.index = Some(pos);
            } else {
                st.current.index = Some(pos);
            }
        }
        None => {
            let fallback = old_index
                .unwrap_or(0)
                .saturating_sub(1)
                .min(st.index.len() - 1);
            set_pending(st, Some(fallback));
        }
    }
}

fn relative_to_index(index: &FileIndex, path: &Path) -> Option<String> {
    if path.is_absolute() {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        index.strip_root(&canonical)
    } else {
        Some(path.to_string_lossy().to_string())
    }
}

/// Clears the scanning flag on every exit path.
struct ScanFlagGuard<'a>(&'a AtomicBool);

impl<'a> ScanFlagGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ScanFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The directory scan task. Publishes one sorted list when done; a
/// cancelled or superseded scan leaves the published list untouched.
fn scan_filelist(
    shared: &Arc<ViewerShared>,
    dir: &Path,
    allow_full_recursive: bool,
    action: ReindexAction,
    task: &TaskContext,
) {
    if shared.ctx.is_quitting() {
        return;
    }

    if !dir.is_dir() {
        warn!("scan root vanished: {}", dir.display());
        {
            let mut st = match shared.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            st.index.rebuild(Vec::new());
            set_pending(&mut st, None);
            st.current = DisplayState::default();
        }
        shared.filelist_changed.emit(&0);
        return;
    }

    let _scanning = ScanFlagGuard::set(&shared.scanning);

    let recursive_enabled = match shared.state.lock() {
        Ok(st) => st.recursive,
        Err(poisoned) => poisoned.into_inner().recursive,
    };
    let mut scan_recursive = allow_full_recursive && recursive_enabled;

    let entries = loop {
        let mut templist: Vec<FileEntry> = Vec::new();
        for listed in list_files(dir, scan_recursive) {
            if shared.ctx.is_quitting() || task.is_cancelled() {
                debug!("scan cancelled for {}", dir.display());
                return;
            }
            if shared.options.extension_allowed(&listed.rel_path) {
                templist.push(FileEntry::from_listed(dir, listed));
            }
        }

        // A shallow pass that found nothing retries recursively before
        // publishing an empty list.
        if templist.is_empty() && recursive_enabled && !scan_recursive {
            scan_recursive = true;
            continue;
        }
        break templist;
    };

    if shared.ctx.is_quitting() || task.is_cancelled() {
        return;
    }

    let published_len = {
        let mut st = match shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        st.index.rebuild(entries);
        let len = st.index.len();

        match action {
            ReindexAction::DoNothing => {
                if let Some(current) = st.current.index {
                    let clamped = if len == 0 { None } else { Some(current.min(len - 1)) };
                    set_pending(&mut st, clamped);
                }
            }
            ReindexAction::KeepCurrentFile => {
                if len == 0 {
                    set_pending(&mut st, None);
                    st.current = DisplayState::default();
                } else {
                    let use_pending = st.pending_dirty && st.pending.index.is_some();
                    let (rel, old_index) = if use_pending {
                        (st.pending.rel_path.clone(), st.pending.index)
                    } else {
                        (st.current.rel_path.clone(), st.current.index)
                    };
                    let target = st.index.position_of(&rel).unwrap_or_else(|| {
                        old_index.unwrap_or(0).saturating_sub(1).min(len - 1)
                    });
                    set_pending(&mut st, Some(target));
                }
            }
            ReindexAction::Reset => {
                set_pending(&mut st, if len == 0 { None } else { Some(0) });
            }
        }
        len
    };

    shared.filelist_changed.emit(&published_len);

    if shared.ctx.is_quitting() {
        return;
    }

    // Two-phase first scan: the shallow pass published fast, the full
    // recursive pass replaces it at normal priority.
    if !allow_full_recursive && recursive_enabled {
        let chained_dir = dir.to_path_buf();
        let chained = shared.clone();
        let chained_inner = chained.clone();
        let id = chained.scheduler.submit(Priority::Normal, move |task| {
            scan_filelist(&chained_inner, &chained_dir, true, ReindexAction::KeepCurrentFile, task);
        });
        if let Ok(mut st) = shared.state.lock() {
            st.scan_task = Some(id);
        }
    } else {
        if let Ok(mut st) = shared.state.lock() {
            st.scan_task = None;
        }
        shared.first_scan_complete.store(true, Ordering::SeqCst);
    }
}
