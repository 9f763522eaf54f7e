use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;

use crate::config::ViewerOptions;
use crate::decode::{self, Decoder, DecoderKind};
use crate::index::ImageKey;
use crate::ring::{Frame, FrameRing, PixelBuf};
use crate::ViewerContext;

/* ───────────────────────── loader states ────────────────────────── */

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoaderState {
    Unloaded = 0,
    Loading = 1,
    Complete = 2,
    Suspended = 3,
    Unloading = 4,
    Error = 5,
}

impl LoaderState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::Complete,
            3 => Self::Suspended,
            4 => Self::Unloading,
            5 => Self::Error,
            _ => Self::Unloaded,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unloaded => "Unloaded",
            Self::Loading => "Loading",
            Self::Complete => "Complete",
            Self::Suspended => "Suspended",
            Self::Unloading => "Unloading",
            Self::Error => "Error",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

/// Decoded image properties; filled in by the worker once sniffed/opened.
#[derive(Clone, Copy, Debug)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    /// Total frames when known; animations learn this at end of stream.
    pub frame_count: Option<usize>,
}

/* ───────────────────────── image ────────────────────────────────── */

/// One viewer image: a filepath plus its decoder, frame ring, loader
/// state and thumbnail. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Image {
    inner: Arc<ImageInner>,
}

pub(crate) struct ImageInner {
    filepath: PathBuf,
    key: ImageKey,
    thumbnail_max_edge: u32,
    ctx: Arc<ViewerContext>,
    state: AtomicU8,
    active: AtomicBool,
    data: Mutex<ImageData>,
}

struct ImageData {
    /// Sniffed once on the first load; immutable afterwards.
    kind: Option<DecoderKind>,
    decoder: Option<Decoder>,
    meta: Option<ImageMeta>,
    error: Option<String>,
    ring: FrameRing,
    /// Frame number currently at the ring front.
    ring_base: usize,
    /// Restart generation, kept in step with the producer's. A frame
    /// decoded before a restart carries the old epoch and is dropped
    /// instead of landing in the freshly cleared ring.
    epoch: u64,
    frame_elapsed: Duration,
    thumbnail: Option<Arc<PixelBuf>>,
    /// Clockwise quarter turns applied to frames as they publish.
    rotation: u8,
}

impl Image {
    pub fn new(
        filepath: PathBuf,
        key: ImageKey,
        options: &ViewerOptions,
        ctx: Arc<ViewerContext>,
    ) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                filepath,
                key,
                thumbnail_max_edge: options.thumbnail_max_edge,
                ctx,
                state: AtomicU8::new(LoaderState::Unloaded as u8),
                active: AtomicBool::new(false),
                data: Mutex::new(ImageData {
                    kind: None,
                    decoder: None,
                    meta: None,
                    error: None,
                    ring: FrameRing::with_capacity(options.frame_ring_capacity),
                    ring_base: 0,
                    epoch: 0,
                    frame_elapsed: Duration::ZERO,
                    thumbnail: None,
                    rotation: 0,
                }),
            }),
        }
    }

    #[inline]
    pub fn filepath(&self) -> &Path {
        &self.inner.filepath
    }

    #[inline]
    pub fn key(&self) -> ImageKey {
        self.inner.key
    }

    #[inline]
    pub fn state(&self) -> LoaderState {
        LoaderState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_unloaded(&self) -> bool {
        self.state() == LoaderState::Unloaded
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.state() == LoaderState::Suspended
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.state() == LoaderState::Error
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Whether the display side has anything to draw right now.
    pub fn is_displayable(&self) -> bool {
        let Ok(data) = self.inner.data.lock() else {
            return false;
        };
        !data.ring.is_empty()
    }

    /* ───────────────── lifecycle ───────────────── */

    /// Unloaded → Loading. No-op (returns false) from any other state, so
    /// repeated calls are harmless.
    pub fn start_loading(&self, suspend_when_full: bool) -> bool {
        if self
            .inner
            .state
            .compare_exchange(
                LoaderState::Unloaded as u8,
                LoaderState::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        let Ok(mut data) = self.inner.data.lock() else {
            return false;
        };
        let kind = *data
            .kind
            .get_or_insert_with(|| decode::sniff_kind(&self.inner.filepath));
        data.epoch = 0;
        data.decoder = Some(Decoder::start(
            Arc::downgrade(&self.inner),
            self.inner.filepath.clone(),
            kind,
            suspend_when_full,
            self.inner.thumbnail_max_edge,
            self.inner.ctx.clone(),
        ));
        true
    }

    /// Any state → Unloading → Unloaded. Joins the worker cooperatively;
    /// safe to call from the evictor thread. Drops frames, thumbnail,
    /// metadata and any recorded error.
    pub fn unload(&self) {
        let from = self.state();
        if from == LoaderState::Unloaded || from == LoaderState::Unloading {
            return;
        }
        if self
            .inner
            .state
            .compare_exchange(
                from as u8,
                LoaderState::Unloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        // The worker needs the data lock to retire, so take the decoder
        // out first and join without holding it.
        let decoder = self.inner.data.lock().ok().and_then(|mut d| d.decoder.take());
        if let Some(mut decoder) = decoder {
            decoder.stop();
        }

        if let Ok(mut data) = self.inner.data.lock() {
            data.ring.clear();
            data.ring_base = 0;
            data.epoch = 0;
            data.frame_elapsed = Duration::ZERO;
            data.meta = None;
            data.thumbnail = None;
            data.error = None;
            data.rotation = 0;
        }
        self.inner
            .state
            .store(LoaderState::Unloaded as u8, Ordering::Release);
    }

    pub fn reload(&self) {
        self.unload();
        self.start_loading(false);
    }

    /// Resets playback to frame zero. Cheap when frame zero is still
    /// buffered (or the whole animation is resident); otherwise the
    /// producer refills from the start.
    pub fn restart(&self, suspend_when_full: bool) -> bool {
        // The on-screen image never parks itself on a full ring.
        let suspend_when_full = suspend_when_full && !self.is_active();
        match self.state() {
            LoaderState::Unloaded | LoaderState::Unloading | LoaderState::Error => return false,
            _ => {}
        }
        let Ok(mut data) = self.inner.data.lock() else {
            return false;
        };

        let total = data.meta.and_then(|m| m.frame_count);

        // Whole animation resident: rotate the ring back around to zero.
        if let Some(total) = total {
            if self.state() == LoaderState::Complete && total <= data.ring.len() {
                while data.ring_base != 0 {
                    data.ring.rotate();
                    data.ring_base = (data.ring_base + 1) % total;
                }
                data.frame_elapsed = Duration::ZERO;
                if let Some(decoder) = &data.decoder {
                    decoder.set_suspend_when_full(suspend_when_full);
                }
                return true;
            }
        }

        // Frame zero still at the front: nothing to re-decode.
        if data.ring_base == 0 && !data.ring.is_empty() {
            data.frame_elapsed = Duration::ZERO;
            if let Some(decoder) = &data.decoder {
                decoder.set_suspend_when_full(suspend_when_full);
            }
            return true;
        }

        // Producer-side restart. Loading goes in first so a fast worker
        // can immediately flip it to Complete.
        data.ring.clear();
        data.ring_base = 0;
        data.frame_elapsed = Duration::ZERO;
        self.inner
            .state
            .store(LoaderState::Loading as u8, Ordering::Release);
        let should_restart = matches!(&data.decoder, Some(decoder) if !decoder.is_finished());
        if should_restart {
            data.epoch += 1;
            data.decoder.as_ref().unwrap().restart(suspend_when_full);
        } else {
            data.epoch = 0;
            data.decoder = Some(Decoder::start(
                Arc::downgrade(&self.inner),
                self.inner.filepath.clone(),
                data.kind.unwrap_or(DecoderKind::Static),
                suspend_when_full,
                self.inner.thumbnail_max_edge,
                self.inner.ctx.clone(),
            ));
        }
        true
    }

    /// Asks the producer to pause at the next frame boundary.
    pub fn suspend(&self) {
        if let Ok(data) = self.inner.data.lock() {
            if let Some(decoder) = &data.decoder {
                decoder.suspend();
            }
        }
        let _ = self.inner.state.compare_exchange(
            LoaderState::Loading as u8,
            LoaderState::Suspended as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.inner.state.compare_exchange(
            LoaderState::Complete as u8,
            LoaderState::Suspended as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Undoes `suspend`; the state returns to Loading or Complete
    /// depending on how far the producer got.
    pub fn resume(&self) {
        if self.state() != LoaderState::Suspended {
            return;
        }
        let Ok(data) = self.inner.data.lock() else {
            return;
        };
        let finished = match &data.decoder {
            Some(decoder) => {
                decoder.resume();
                let (produced, total) = decoder.progress();
                decoder.is_finished() || total.map(|t| produced >= t).unwrap_or(false)
            }
            None => true,
        };
        drop(data);
        let to = if finished {
            LoaderState::Complete
        } else {
            LoaderState::Loading
        };
        let _ = self.inner.state.compare_exchange(
            LoaderState::Suspended as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Marks whether this image is on screen. The active image's producer
    /// never suspends on a full ring.
    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Relaxed);
        if let Ok(data) = self.inner.data.lock() {
            if let Some(decoder) = &data.decoder {
                decoder.set_suspend_when_full(!active);
            }
        }
    }

    /* ───────────────── playback ───────────────── */

    /// The frame to display right now, if any has been published.
    pub fn current_frame(&self) -> Option<Frame> {
        self.inner.data.lock().ok()?.ring.front().cloned()
    }

    /// Consumer-side step to the next frame; wraps to zero when the whole
    /// animation is resident. Returns true if the frame changed.
    pub fn advance_to_next_frame(&self) -> bool {
        let Ok(mut data) = self.inner.data.lock() else {
            return false;
        };
        let total = data.meta.and_then(|m| m.frame_count);
        if total == Some(1) {
            return false;
        }

        if let Some(total) = total {
            if total > 1
                && self.state() == LoaderState::Complete
                && total <= data.ring.len()
            {
                data.ring.rotate();
                data.ring_base = (data.ring_base + 1) % total;
                data.frame_elapsed = Duration::ZERO;
                return true;
            }
        }

        // Streaming: never consume the only visible frame.
        if data.ring.len() <= 1 {
            return false;
        }
        data.ring.advance();
        data.ring_base += 1;
        data.frame_elapsed = Duration::ZERO;
        if let Some(decoder) = &data.decoder {
            decoder.notify_space();
        }
        true
    }

    /// Accumulates display time against the front frame's duration and
    /// advances when it is up. Returns true if the frame changed.
    pub fn update_frame_time(&self, delta: Duration) -> bool {
        let due = {
            let Ok(mut data) = self.inner.data.lock() else {
                return false;
            };
            let Some(front) = data.ring.front() else {
                return false;
            };
            let duration = front.duration;
            if duration.is_zero() {
                return false;
            }
            data.frame_elapsed += delta;
            data.frame_elapsed >= duration
        };
        if due {
            self.advance_to_next_frame()
        } else {
            false
        }
    }

    /// Fraction of the animation played, by frame position.
    pub fn animation_progress(&self) -> f32 {
        let Ok(data) = self.inner.data.lock() else {
            return 0.0;
        };
        match data.meta.and_then(|m| m.frame_count) {
            Some(total) if total > 1 => data.ring_base as f32 / (total - 1) as f32,
            _ => 0.0,
        }
    }

    pub fn current_frame_index(&self) -> usize {
        self.inner.data.lock().map(|d| d.ring_base).unwrap_or(0)
    }

    /* ───────────────── queries ───────────────── */

    pub fn size(&self) -> Option<(u32, u32)> {
        let data = self.inner.data.lock().ok()?;
        data.meta.map(|m| (m.width, m.height))
    }

    pub fn has_alpha(&self) -> bool {
        self.inner
            .data
            .lock()
            .ok()
            .and_then(|d| d.meta.map(|m| m.has_alpha))
            .unwrap_or(false)
    }

    pub fn is_animated(&self) -> bool {
        let Ok(data) = self.inner.data.lock() else {
            return false;
        };
        match data.meta.and_then(|m| m.frame_count) {
            Some(total) => total > 1,
            None => data.kind == Some(DecoderKind::Animated),
        }
    }

    pub fn frames_buffered(&self) -> usize {
        self.inner.data.lock().map(|d| d.ring.len()).unwrap_or(0)
    }

    pub fn frames_total(&self) -> Option<usize> {
        self.inner.data.lock().ok()?.meta.and_then(|m| m.frame_count)
    }

    pub fn error_text(&self) -> Option<String> {
        self.inner.data.lock().ok()?.error.clone()
    }

    /// Small downscaled snapshot of the first decoded frame; built once
    /// per load on the decoder thread, dropped on unload.
    pub fn thumbnail(&self) -> Option<Arc<PixelBuf>> {
        self.inner.data.lock().ok()?.thumbnail.clone()
    }

    /// Rotates buffered frames, thumbnail and metadata a quarter turn;
    /// frames published from now on are rotated the same way.
    pub fn rotate(&self, direction: RotateDirection) {
        let Ok(mut data) = self.inner.data.lock() else {
            return;
        };
        let clockwise = direction == RotateDirection::Clockwise;
        data.rotation = (data.rotation + if clockwise { 1 } else { 3 }) % 4;

        let turn = if clockwise { 1 } else { 3 };
        data.ring.map_in_place(|frame| Frame {
            pixels: Arc::new(decode::rotate_quarter_turns(&frame.pixels, turn)),
            duration: frame.duration,
        });
        if let Some(thumb) = data.thumbnail.take() {
            data.thumbnail = Some(Arc::new(decode::rotate_quarter_turns(&thumb, turn)));
        }
        if let Some(meta) = &mut data.meta {
            std::mem::swap(&mut meta.width, &mut meta.height);
        }
    }

    /// One status line for diagnostics overlays.
    pub fn stats(&self) -> String {
        let buffered = self.frames_buffered();
        let total = self
            .frames_total()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!(
            "{}  {}  {buffered}/{total}",
            self.inner.filepath.display(),
            self.state().label()
        )
    }
}

/* ───────────────────────── worker-facing side ───────────────────── */

/// Outcome of offering a decoded frame to the ring.
pub(crate) enum Publish {
    Stored { first: bool },
    /// Ring is full; the frame comes back to the worker.
    Full(Frame),
    /// The frame predates a restart; the worker should reopen.
    Stale,
    /// The image is unloading or errored; the worker should exit.
    Stop,
}

pub(crate) fn worker_offer_frame(inner: &Arc<ImageInner>, frame: Frame, epoch: u64) -> Publish {
    match LoaderState::from_u8(inner.state.load(Ordering::Acquire)) {
        LoaderState::Unloading | LoaderState::Unloaded | LoaderState::Error => {
            return Publish::Stop;
        }
        _ => {}
    }
    let Ok(mut data) = inner.data.lock() else {
        return Publish::Stop;
    };
    if data.epoch != epoch {
        return Publish::Stale;
    }
    if data.ring.is_full() {
        return Publish::Full(frame);
    }

    let frame = if data.rotation != 0 {
        Frame {
            pixels: Arc::new(decode::rotate_quarter_turns(&frame.pixels, data.rotation)),
            duration: frame.duration,
        }
    } else {
        frame
    };

    match data.ring.stage(frame) {
        Ok(()) => data.ring.publish(),
        Err(frame) => return Publish::Full(frame),
    }
    let first = data.ring_base == 0 && data.ring.len() == 1 && data.thumbnail.is_none();
    Publish::Stored { first }
}

pub(crate) fn worker_first_frame(inner: &Arc<ImageInner>) -> Option<Frame> {
    let data = inner.data.lock().ok()?;
    if data.ring_base == 0 {
        data.ring.front().cloned()
    } else {
        None
    }
}

pub(crate) fn worker_store_thumbnail(inner: &Arc<ImageInner>, thumb: Arc<PixelBuf>) {
    if let Ok(mut data) = inner.data.lock() {
        if data.thumbnail.is_none() {
            data.thumbnail = Some(thumb);
        }
    }
}

pub(crate) fn worker_set_meta(inner: &Arc<ImageInner>, meta: ImageMeta) {
    if let Ok(mut data) = inner.data.lock() {
        let meta = if data.rotation % 2 == 1 {
            ImageMeta {
                width: meta.height,
                height: meta.width,
                ..meta
            }
        } else {
            meta
        };
        data.meta = Some(meta);
    }
}

/// Finalizes a finished load. Returns false (and changes nothing) when a
/// restart superseded this producer pass.
pub(crate) fn worker_mark_complete(inner: &Arc<ImageInner>, total: usize, epoch: u64) -> bool {
    let Ok(mut data) = inner.data.lock() else {
        return false;
    };
    if data.epoch != epoch {
        return false;
    }
    if let Some(meta) = &mut data.meta {
        meta.frame_count = Some(total);
    }
    let _ = inner.state.compare_exchange(
        LoaderState::Loading as u8,
        LoaderState::Complete as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    true
}

pub(crate) fn worker_mark_suspended(inner: &Arc<ImageInner>, epoch: u64) {
    let Ok(data) = inner.data.lock() else {
        return;
    };
    if data.epoch != epoch {
        return;
    }
    drop(data);
    let _ = inner.state.compare_exchange(
        LoaderState::Loading as u8,
        LoaderState::Suspended as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
}

pub(crate) fn worker_set_error(inner: &Arc<ImageInner>, message: String) {
    warn!("image error for {}: {message}", inner.filepath.display());
    if let Ok(mut data) = inner.data.lock() {
        data.error = Some(message);
    }
    let state = LoaderState::from_u8(inner.state.load(Ordering::Acquire));
    if !matches!(state, LoaderState::Unloading | LoaderState::Unloaded) {
        inner
            .state
            .store(LoaderState::Error as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::codecs::png::PngEncoder;
    use image::{Delay, ExtendedColorType, ImageEncoder, RgbaImage};
    use std::fs::File;
    use std::io::Write;
    use std::time::Instant;

    fn write_png(path: &Path, w: u32, h: u32) {
        let mut bytes = Vec::new();
        let data = vec![200u8; (w * h * 4) as usize];
        PngEncoder::new(&mut bytes)
            .write_image(&data, w, h, ExtendedColorType::Rgba8)
            .unwrap();
        File::create(path).unwrap().write_all(&bytes).unwrap();
    }

    fn write_gif(path: &Path, frames: usize, w: u32, h: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for i in 0..frames {
            let shade = (i * 40 % 256) as u8;
            let buf = RgbaImage::from_pixel(w, h, image::Rgba([shade, 0, 0, 255]));
            let frame =
                image::Frame::from_parts(buf, 0, 0, Delay::from_numer_denom_ms(40, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn make_image(path: &Path, options: &ViewerOptions) -> Image {
        Image::new(
            path.to_path_buf(),
            ImageKey::new(1, "test"),
            options,
            ViewerContext::new(),
        )
    }

    #[test]
    fn still_image_loads_to_complete_with_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        write_png(&path, 300, 100);

        let options = ViewerOptions {
            thumbnail_max_edge: 64,
            ..ViewerOptions::default()
        };
        let img = make_image(&path, &options);
        assert!(img.start_loading(false));
        assert!(!img.start_loading(false), "second start is a no-op");

        wait_until(|| img.state() == LoaderState::Complete);
        assert_eq!(img.size(), Some((300, 100)));
        assert_eq!(img.frames_total(), Some(1));
        assert!(img.current_frame().is_some());

        wait_until(|| img.thumbnail().is_some());
        let thumb = img.thumbnail().unwrap();
        assert_eq!(thumb.width, 64);

        assert!(!img.advance_to_next_frame(), "single frame never advances");
    }

    #[test]
    fn unload_drops_everything_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        write_png(&path, 16, 16);

        let img = make_image(&path, &ViewerOptions::default());
        img.start_loading(false);
        wait_until(|| img.state() == LoaderState::Complete);

        img.unload();
        assert_eq!(img.state(), LoaderState::Unloaded);
        assert!(img.current_frame().is_none());
        assert!(img.thumbnail().is_none());
        assert_eq!(img.frames_buffered(), 0);
        img.unload();
        assert_eq!(img.state(), LoaderState::Unloaded);
    }

    #[test]
    fn broken_file_reports_error_and_unload_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        File::create(&path)
            .unwrap()
            .write_all(b"not an image at all")
            .unwrap();

        let img = make_image(&path, &ViewerOptions::default());
        img.start_loading(false);
        wait_until(|| img.state() == LoaderState::Error);
        assert!(img.error_text().is_some());

        // Sticky until unloaded.
        assert!(!img.start_loading(false));
        assert!(!img.restart(false));

        img.unload();
        assert_eq!(img.state(), LoaderState::Unloaded);
        assert!(img.error_text().is_none());
    }

    #[test]
    fn animation_buffers_all_frames_and_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 4, 8, 8);

        let img = make_image(&path, &ViewerOptions::default());
        img.start_loading(false);
        wait_until(|| img.state() == LoaderState::Complete);
        assert_eq!(img.frames_total(), Some(4));
        assert_eq!(img.frames_buffered(), 4);
        assert!(img.is_animated());

        for expected in [1, 2, 3, 0, 1] {
            assert!(img.advance_to_next_frame());
            assert_eq!(img.current_frame_index(), expected);
        }
    }

    #[test]
    fn suspend_when_full_pauses_the_producer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 6, 8, 8);

        let options = ViewerOptions {
            frame_ring_capacity: 2,
            ..ViewerOptions::default()
        };
        let img = make_image(&path, &options);
        img.start_loading(true);

        wait_until(|| img.state() == LoaderState::Suspended);
        assert_eq!(img.frames_buffered(), 2);

        // Consuming a frame plus resuming lets it continue.
        assert!(img.advance_to_next_frame());
        img.resume();
        wait_until(|| img.frames_buffered() == 2);
    }

    #[test]
    fn suspend_then_resume_restores_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        write_png(&path, 16, 16);

        let img = make_image(&path, &ViewerOptions::default());
        img.start_loading(false);
        wait_until(|| img.state() == LoaderState::Complete);

        img.suspend();
        assert_eq!(img.state(), LoaderState::Suspended);
        img.resume();
        assert_eq!(img.state(), LoaderState::Complete);
    }

    #[test]
    fn restart_is_cheap_when_frame_zero_is_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 3, 8, 8);

        let img = make_image(&path, &ViewerOptions::default());
        img.start_loading(false);
        wait_until(|| img.state() == LoaderState::Complete);

        img.advance_to_next_frame();
        img.advance_to_next_frame();
        assert_eq!(img.current_frame_index(), 2);

        assert!(img.restart(true));
        assert_eq!(img.current_frame_index(), 0);
        // Fully resident, so no reload happened.
        assert_eq!(img.state(), LoaderState::Complete);
        assert_eq!(img.frames_buffered(), 3);
    }

    #[test]
    fn rotate_turns_frames_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        write_png(&path, 30, 10);

        let img = make_image(&path, &ViewerOptions::default());
        img.start_loading(false);
        wait_until(|| img.state() == LoaderState::Complete);

        img.rotate(RotateDirection::Clockwise);
        assert_eq!(img.size(), Some((10, 30)));
        let frame = img.current_frame().unwrap();
        assert_eq!((frame.pixels.width, frame.pixels.height), (10, 30));

        img.rotate(RotateDirection::CounterClockwise);
        assert_eq!(img.size(), Some((30, 10)));
    }
}
