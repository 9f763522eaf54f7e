use std::time::Duration;

use crate::sort::SortKey;

/// Extensions the stock decode backends can handle (lowercase, no dot).
pub fn default_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "bmp", "gif", "tiff", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Tuneables for the viewer core. Persisting these is the caller's problem.
#[derive(Debug, Clone)]
pub struct ViewerOptions {
    pub recursive_scan: bool,
    pub sort_key: SortKey,
    pub sort_reverse: bool,
    /// Lowercase extensions without the dot; compared case-insensitively.
    pub allowed_extensions: Vec<String>,
    pub prefetch_forward: usize,
    pub prefetch_backward: usize,
    /// Grace between an image leaving the prefetch window and its unload.
    pub eviction_delay: Duration,
    pub frame_ring_capacity: usize,
    /// Longest side of the generated thumbnail, in pixels.
    pub thumbnail_max_edge: u32,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            recursive_scan: true,
            sort_key: SortKey::Name,
            sort_reverse: false,
            allowed_extensions: default_extensions(),
            prefetch_forward: 2,
            prefetch_backward: 2,
            eviction_delay: Duration::from_millis(2000),
            frame_ring_capacity: 20,
            thumbnail_max_edge: 256,
        }
    }
}

impl ViewerOptions {
    pub fn extension_allowed(&self, name: &str) -> bool {
        let ext = match name.rsplit_once('.') {
            Some((_, e)) if !e.is_empty() => e.to_ascii_lowercase(),
            _ => return false,
        };
        self.allowed_extensions.iter().any(|a| *a == ext)
    }
}
