//! Image management core for an interactive viewer: turns "the user is
//! looking at image N in directory D" into a bounded, prefetched,
//! concurrently decoded and eventually evicted set of frames.
//!
//! The [`Viewer`] orchestrates a sorted [`index::FileIndex`], a store of
//! [`Image`]s each owning a background decoder and frame ring, and a
//! delayed eviction queue. Rendering, windowing and input live elsewhere;
//! a UI drives this crate by calling [`Viewer::tick`] every frame and
//! pulling frames off [`Viewer::current_image`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod index;
pub mod prefetch;
pub mod ring;
pub mod signal;
pub mod sort;
pub mod watch;

mod decode;
mod evict;
mod image_entry;
mod sched;
mod viewer;

pub use config::{default_extensions, ViewerOptions};
pub use decode::DecoderKind;
pub use error::{Result, ViewerError};
pub use image_entry::{Image, ImageMeta, LoaderState, RotateDirection};
pub use index::{FileEntry, FileIndex, ImageKey};
pub use ring::{Frame, PixelBuf};
pub use sort::SortKey;
pub use viewer::Viewer;
pub use watch::FileEvent;

/// Shared process context handed to every component at construction.
/// Setting the quit flag makes all background loops wind down promptly.
pub struct ViewerContext {
    quitting: AtomicBool,
}

impl ViewerContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            quitting: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    pub fn request_quit(&self) {
        self.quitting.store(true, Ordering::SeqCst);
    }
}
