use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::warn;
use rayon::slice::ParallelSliceMut;
use walkdir::WalkDir;

use crate::sort::{compare_entries, sort_entries, SortKey};

/* ───────────────────────── hashing / identity ───────────────────── */

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over the UTF-8 bytes of `s`, continuing from `seed`.
#[inline]
pub fn hash32_seeded(seed: u32, s: &str) -> u32 {
    let mut h = seed;
    for b in s.as_bytes() {
        h ^= u32::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

#[inline]
pub fn hash32(s: &str) -> u32 {
    hash32_seeded(FNV_OFFSET, s)
}

/// Stable identity of an image across list reorderings: the root directory
/// hash combined with the relative path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ImageKey(pub u32);

impl ImageKey {
    #[inline]
    pub fn new(root_hash: u32, rel_path: &str) -> Self {
        ImageKey(hash32_seeded(root_hash, rel_path))
    }
}

/* ───────────────────────── entries ──────────────────────────────── */

/// One viewer-visible file. Identity is the relative path.
#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Path relative to the index root, `/`-separated.
    pub rel_path: String,
    /// Hash of the containing directory's absolute path.
    pub dir_hash: u32,
    pub modified: Option<SystemTime>,
    /// Lowercased extension; what the type sort orders by.
    pub type_string: String,
}

impl FileEntry {
    /// Builds an entry for a root-relative path, statting the file for
    /// its modified time. A file that is already gone simply has none.
    pub fn for_path(root: &Path, rel_path: &str) -> Self {
        let abs = root.join(rel_path);
        let modified = std::fs::metadata(&abs).ok().and_then(|m| m.modified().ok());
        let type_string = abs
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let dir_abs = abs
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| root.to_path_buf());
        FileEntry {
            rel_path: rel_path.to_string(),
            dir_hash: hash32(&dir_abs.to_string_lossy()),
            modified,
            type_string,
        }
    }

    pub fn from_listed(root: &Path, listed: ListedFile) -> Self {
        let parent = Path::new(&listed.rel_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir_abs = root.join(parent);
        FileEntry {
            dir_hash: hash32(&dir_abs.to_string_lossy()),
            type_string: listed.type_string,
            modified: listed.modified,
            rel_path: listed.rel_path,
        }
    }
}

/* ───────────────────────── file index ───────────────────────────── */

/// Sorted list of viewer-visible files under one root. Entries stay in
/// strict sort order through every mutation.
pub struct FileIndex {
    root: PathBuf,
    root_hash: u32,
    entries: Vec<FileEntry>,
    sort_key: SortKey,
    reverse: bool,
}

impl FileIndex {
    pub fn new(root: PathBuf, sort_key: SortKey, reverse: bool) -> Self {
        let root_hash = hash32(&root.to_string_lossy());
        Self {
            root,
            root_hash,
            entries: Vec::new(),
            sort_key,
            reverse,
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn root_hash(&self) -> u32 {
        self.root_hash
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entry(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    #[inline]
    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    #[inline]
    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    #[inline]
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    pub fn key_for(&self, rel_path: &str) -> ImageKey {
        ImageKey::new(self.root_hash, rel_path)
    }

    pub fn absolute_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Replaces the whole list, sorting it. Recursive scans can hand over
    /// very large lists, so this sort runs on the rayon pool.
    pub fn rebuild(&mut self, mut entries: Vec<FileEntry>) {
        let (key, reverse) = (self.sort_key, self.reverse);
        entries.par_sort_by(|a, b| compare_entries(a, b, key, reverse));
        self.entries = entries;
    }

    pub fn set_sorting(&mut self, key: SortKey, reverse: bool) {
        self.sort_key = key;
        self.reverse = reverse;
        sort_entries(&mut self.entries, key, reverse);
    }

    pub fn position_of(&self, rel_path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.rel_path == rel_path)
    }

    /// First entry whose path begins with the given directory prefix.
    pub fn first_with_prefix(&self, dir_prefix: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.rel_path.starts_with(dir_prefix))
    }

    /// Inserts at the sort position; returns the index it landed at.
    pub fn insert_sorted(&mut self, entry: FileEntry) -> usize {
        let pos = self
            .entries
            .partition_point(|e| compare_entries(e, &entry, self.sort_key, self.reverse).is_lt());
        self.entries.insert(pos, entry);
        pos
    }

    /// Removes by identity; returns the index it held.
    pub fn remove(&mut self, rel_path: &str) -> Option<usize> {
        let pos = self.position_of(rel_path)?;
        self.entries.remove(pos);
        Some(pos)
    }

    /// Renames in place and restores sort order. Returns true if the old
    /// path was present.
    pub fn rename(&mut self, old_rel: &str, new_rel: &str) -> bool {
        let Some(pos) = self.position_of(old_rel) else {
            return false;
        };
        self.entries[pos].rel_path = new_rel.to_string();
        sort_entries(&mut self.entries, self.sort_key, self.reverse);
        true
    }

    /// Strips the index root from an absolute path, if it is underneath.
    pub fn strip_root(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().to_string())
    }
}

/* ───────────────────────── directory listing ────────────────────── */

/// One file the lister observed, before extension filtering.
#[derive(Debug)]
pub struct ListedFile {
    pub rel_path: String,
    pub modified: Option<SystemTime>,
    pub type_string: String,
}

/// Streams the files under `root`. Hidden (dot) entries are skipped, and a
/// directory entry that fails to stat is logged and dropped rather than
/// aborting the walk.
pub fn list_files(
    root: &Path,
    recursive: bool,
) -> impl Iterator<Item = ListedFile> + '_ {
    let mut walker = WalkDir::new(root).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        // depth 0 is the root itself; pruning it would hide everything.
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!("skipping unreadable entry: {err}");
                    return None;
                }
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let rel_path = entry
                .path()
                .strip_prefix(root)
                .ok()?
                .to_string_lossy()
                .to_string();
            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
            let type_string = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            Some(ListedFile {
                rel_path,
                modified,
                type_string,
            })
        })
}

#[inline]
fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            rel_path: path.to_string(),
            dir_hash: 0,
            modified: None,
            type_string: path.rsplit('.').next().unwrap_or("").to_string(),
        }
    }

    fn index_with(paths: &[&str]) -> FileIndex {
        let mut idx = FileIndex::new(PathBuf::from("/pics"), SortKey::Name, false);
        idx.rebuild(paths.iter().map(|p| entry(p)).collect());
        idx
    }

    #[test]
    fn rebuild_sorts_naturally() {
        let idx = index_with(&["img10.png", "img2.png", "img1.png"]);
        let names: Vec<_> = idx.entries().iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(names, ["img1.png", "img2.png", "img10.png"]);
    }

    #[test]
    fn insert_lands_at_sort_position() {
        let mut idx = index_with(&["a.png", "c.png", "d.png"]);
        let pos = idx.insert_sorted(entry("b.png"));
        assert_eq!(pos, 1);
        let names: Vec<_> = idx.entries().iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(names, ["a.png", "b.png", "c.png", "d.png"]);
    }

    #[test]
    fn remove_reports_prior_position() {
        let mut idx = index_with(&["a.png", "b.png", "c.png"]);
        assert_eq!(idx.remove("b.png"), Some(1));
        assert_eq!(idx.remove("b.png"), None);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn rename_resorts_and_keeps_identity() {
        let mut idx = index_with(&["a.png", "m.png", "z.png"]);
        assert!(idx.rename("m.png", "zz.png"));
        assert_eq!(idx.position_of("zz.png"), Some(2));
        assert!(!idx.rename("missing.png", "x.png"));
    }

    #[test]
    fn prefix_lookup_finds_first_in_directory() {
        let idx = index_with(&["a/one.png", "b/one.png", "b/two.png"]);
        assert_eq!(idx.first_with_prefix("b/"), Some(1));
        assert_eq!(idx.first_with_prefix("c/"), None);
    }

    #[test]
    fn keys_are_stable_and_distinct() {
        let idx = index_with(&["a.png", "b.png"]);
        assert_eq!(idx.key_for("a.png"), idx.key_for("a.png"));
        assert_ne!(idx.key_for("a.png"), idx.key_for("b.png"));
    }

    #[test]
    fn lister_respects_depth_and_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("top.png"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.png"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/deep.png"), b"x").unwrap();

        let mut shallow: Vec<_> = list_files(dir.path(), false)
            .map(|f| f.rel_path)
            .collect();
        shallow.sort();
        assert_eq!(shallow, ["top.png"]);

        let mut deep: Vec<_> = list_files(dir.path(), true).map(|f| f.rel_path).collect();
        deep.sort();
        assert_eq!(deep, ["sub/deep.png", "top.png"]);
    }
}
