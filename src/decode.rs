use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, ImageReader, RgbaImage};
use log::{debug, warn};

use crate::image_entry::{self, ImageInner, ImageMeta, Publish};
use crate::ring::{Frame, PixelBuf};
use crate::ViewerContext;

/* ───────────────────────── sniffing ─────────────────────────────── */

/// Which background producer an image gets. Sniffed once per image from
/// the first bytes; unknown content falls back to the static decoder.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecoderKind {
    Static,
    Animated,
}

pub fn sniff_kind(path: &Path) -> DecoderKind {
    let mut header = [0u8; 16];
    let n = File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .unwrap_or(0);
    match image::guess_format(&header[..n]) {
        Ok(ImageFormat::Gif) => DecoderKind::Animated,
        _ => DecoderKind::Static,
    }
}

/* ───────────────────────── control block ────────────────────────── */

// Bound on every worker wait so cancellation and shutdown stay prompt.
const WORKER_WAIT: Duration = Duration::from_millis(50);

struct CtrlState {
    cancelled: bool,
    suspended: bool,
    suspend_when_full: bool,
    epoch: u64,
    produced: usize,
    total: Option<usize>,
}

struct DecodeCtrl {
    state: Mutex<CtrlState>,
    cond: Condvar,
}

/// Background frame producer for one image. The worker holds only a weak
/// reference to the image internals and exits when they are gone.
pub(crate) struct Decoder {
    ctrl: Arc<DecodeCtrl>,
    worker: Option<JoinHandle<()>>,
}

impl Decoder {
    pub(crate) fn start(
        target: Weak<ImageInner>,
        path: PathBuf,
        kind: DecoderKind,
        suspend_when_full: bool,
        thumbnail_max_edge: u32,
        ctx: Arc<ViewerContext>,
    ) -> Self {
        let ctrl = Arc::new(DecodeCtrl {
            state: Mutex::new(CtrlState {
                cancelled: false,
                suspended: false,
                suspend_when_full,
                epoch: 0,
                produced: 0,
                total: None,
            }),
            cond: Condvar::new(),
        });

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        let worker_ctrl = ctrl.clone();
        let worker = thread::Builder::new()
            .name(format!("decoder-{name}"))
            .spawn(move || worker_loop(worker_ctrl, target, path, kind, thumbnail_max_edge, ctx))
            .ok();

        Self { ctrl, worker }
    }

    pub(crate) fn suspend(&self) {
        if let Ok(mut st) = self.ctrl.state.lock() {
            st.suspended = true;
        }
        self.ctrl.cond.notify_all();
    }

    pub(crate) fn resume(&self) {
        if let Ok(mut st) = self.ctrl.state.lock() {
            st.suspended = false;
        }
        self.ctrl.cond.notify_all();
    }

    /// Producer-side reset to frame zero: the worker reopens its backend
    /// and refills from the start.
    pub(crate) fn restart(&self, suspend_when_full: bool) {
        if let Ok(mut st) = self.ctrl.state.lock() {
            st.epoch += 1;
            st.produced = 0;
            st.total = None;
            st.suspended = false;
            st.suspend_when_full = suspend_when_full;
        }
        self.ctrl.cond.notify_all();
    }

    pub(crate) fn set_suspend_when_full(&self, suspend_when_full: bool) {
        if let Ok(mut st) = self.ctrl.state.lock() {
            st.suspend_when_full = suspend_when_full;
        }
        self.ctrl.cond.notify_all();
    }

    /// Consumer freed a ring slot; wake a producer waiting for space.
    pub(crate) fn notify_space(&self) {
        self.ctrl.cond.notify_all();
    }

    /// Cooperative cancellation; joins the worker. Frames already decoded
    /// stay in the ring until the image unloads.
    pub(crate) fn stop(&mut self) {
        if let Ok(mut st) = self.ctrl.state.lock() {
            st.cancelled = true;
        }
        self.ctrl.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// (frames produced, total frame count if known).
    pub(crate) fn progress(&self) -> (usize, Option<usize>) {
        self.ctrl
            .state
            .lock()
            .map(|st| (st.produced, st.total))
            .unwrap_or((0, None))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.worker.as_ref().map(|w| w.is_finished()).unwrap_or(true)
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/* ───────────────────────── worker loop ──────────────────────────── */

enum Gate {
    Produce,
    Restart,
    Exit,
}

fn wait_gate(ctrl: &DecodeCtrl, epoch: u64, ctx: &ViewerContext) -> Gate {
    let Ok(mut st) = ctrl.state.lock() else {
        return Gate::Exit;
    };
    loop {
        if st.cancelled || ctx.is_quitting() {
            return Gate::Exit;
        }
        if st.epoch != epoch {
            return Gate::Restart;
        }
        if !st.suspended {
            return Gate::Produce;
        }
        st = match ctrl.cond.wait_timeout(st, WORKER_WAIT) {
            Ok((guard, _)) => guard,
            Err(_) => return Gate::Exit,
        };
    }
}

fn worker_loop(
    ctrl: Arc<DecodeCtrl>,
    target: Weak<ImageInner>,
    path: PathBuf,
    kind: DecoderKind,
    thumbnail_max_edge: u32,
    ctx: Arc<ViewerContext>,
) {
    'restart: loop {
        let epoch = match ctrl.state.lock() {
            Ok(st) => st.epoch,
            Err(_) => return,
        };

        let mut backend = match Backend::open(&path, kind) {
            Ok(backend) => backend,
            Err(message) => {
                warn!("decode failed for {}: {message}", path.display());
                if let Some(inner) = target.upgrade() {
                    image_entry::worker_set_error(&inner, message);
                }
                return;
            }
        };

        {
            let Some(inner) = target.upgrade() else { return };
            image_entry::worker_set_meta(&inner, backend.meta());
        }

        let mut pending: Option<Frame> = None;
        let mut produced = 0usize;

        loop {
            match wait_gate(&ctrl, epoch, &ctx) {
                Gate::Produce => {}
                Gate::Restart => continue 'restart,
                Gate::Exit => return,
            }

            // Decode outside every lock; the expensive part of the loop.
            let frame = match pending.take() {
                Some(frame) => frame,
                None => match backend.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        let Some(inner) = target.upgrade() else { return };
                        if !image_entry::worker_mark_complete(&inner, produced, epoch) {
                            // A restart raced the end of the stream.
                            continue 'restart;
                        }
                        if let Ok(mut st) = ctrl.state.lock() {
                            st.total = Some(produced);
                        }
                        debug!("decoded {produced} frame(s) from {}", path.display());
                        return;
                    }
                    Err(message) => {
                        warn!("decode failed for {}: {message}", path.display());
                        if let Some(inner) = target.upgrade() {
                            image_entry::worker_set_error(&inner, message);
                        }
                        return;
                    }
                },
            };

            let Some(inner) = target.upgrade() else { return };
            match image_entry::worker_offer_frame(&inner, frame, epoch) {
                Publish::Stored { first } => {
                    produced += 1;
                    if let Ok(mut st) = ctrl.state.lock() {
                        st.produced = produced;
                    }
                    if first {
                        make_thumbnail(&inner, thumbnail_max_edge);
                    }
                }
                Publish::Full(frame) => {
                    pending = Some(frame);
                    let suspend = ctrl
                        .state
                        .lock()
                        .map(|st| st.suspend_when_full)
                        .unwrap_or(true);
                    if suspend {
                        image_entry::worker_mark_suspended(&inner, epoch);
                        if let Ok(mut st) = ctrl.state.lock() {
                            // A restart in the gap owns the flag instead.
                            if st.epoch == epoch {
                                st.suspended = true;
                            }
                        }
                    } else {
                        // Active image with a full ring: hold the frame and
                        // wait for the consumer to free a slot.
                        drop(inner);
                        if let Ok(st) = ctrl.state.lock() {
                            let _ = ctrl.cond.wait_timeout(st, WORKER_WAIT);
                        }
                    }
                }
                Publish::Stale => continue 'restart,
                Publish::Stop => return,
            }
        }
    }
}

fn make_thumbnail(inner: &Arc<ImageInner>, max_edge: u32) {
    let Some(frame) = image_entry::worker_first_frame(inner) else {
        return;
    };
    let thumb = downscale_to_edge(&frame.pixels, max_edge);
    image_entry::worker_store_thumbnail(inner, Arc::new(thumb));
}

/* ───────────────────────── backends ─────────────────────────────── */

enum Backend {
    /// One decoded still, handed out once.
    Static(Option<DynamicImage>, ImageMeta),
    /// Streaming animation frames; total count unknown until exhausted.
    Animated(image::Frames<'static>, ImageMeta),
}

impl Backend {
    fn open(path: &Path, kind: DecoderKind) -> Result<Self, String> {
        match kind {
            DecoderKind::Static => {
                let img = decode_still(path)?;
                let meta = ImageMeta {
                    width: img.width(),
                    height: img.height(),
                    has_alpha: img.color().has_alpha(),
                    frame_count: Some(1),
                };
                Ok(Backend::Static(Some(img), meta))
            }
            DecoderKind::Animated => {
                let file = File::open(path).map_err(|e| e.to_string())?;
                let decoder =
                    GifDecoder::new(BufReader::new(file)).map_err(|e| e.to_string())?;
                let (width, height) = image::ImageDecoder::dimensions(&decoder);
                let meta = ImageMeta {
                    width,
                    height,
                    has_alpha: true,
                    frame_count: None,
                };
                Ok(Backend::Animated(decoder.into_frames(), meta))
            }
        }
    }

    fn meta(&self) -> ImageMeta {
        match self {
            Backend::Static(_, meta) => *meta,
            Backend::Animated(_, meta) => *meta,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, String> {
        match self {
            Backend::Static(img, _) => Ok(img.take().map(|img| {
                let has_alpha = img.color().has_alpha();
                Frame {
                    pixels: Arc::new(pixelbuf_from_rgba(img.to_rgba8(), has_alpha)),
                    duration: Duration::ZERO,
                }
            })),
            Backend::Animated(frames, _) => match frames.next() {
                None => Ok(None),
                Some(Err(e)) => Err(e.to_string()),
                Some(Ok(frame)) => {
                    let duration = Duration::from(frame.delay());
                    Ok(Some(Frame {
                        pixels: Arc::new(pixelbuf_from_rgba(frame.into_buffer(), true)),
                        duration,
                    }))
                }
            },
        }
    }
}

fn decode_still(path: &Path) -> Result<DynamicImage, String> {
    // Prefer the extension hint, fall back to content sniffing.
    let hinted = ImageFormat::from_path(path).ok().and_then(|fmt| {
        let file = File::open(path).ok()?;
        ImageReader::with_format(BufReader::new(file), fmt)
            .decode()
            .ok()
    });
    if let Some(img) = hinted {
        return Ok(img);
    }
    ImageReader::open(path)
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| e.to_string())
}

/* ───────────────────────── pixel helpers ────────────────────────── */

fn pixelbuf_from_rgba(rgba: RgbaImage, has_alpha: bool) -> PixelBuf {
    PixelBuf {
        width: rgba.width(),
        height: rgba.height(),
        has_alpha,
        rgba: rgba.into_raw(),
    }
}

/// Downscales so the longest side is at most `max_edge`; no-op for small
/// sources. Triangle filtering is a good quality/speed tradeoff here.
pub(crate) fn downscale_to_edge(src: &PixelBuf, max_edge: u32) -> PixelBuf {
    use image::imageops::FilterType;

    let (w, h) = (src.width, src.height);
    let Some(img) = RgbaImage::from_raw(w, h, src.rgba.clone()) else {
        return PixelBuf {
            width: 0,
            height: 0,
            has_alpha: src.has_alpha,
            rgba: Vec::new(),
        };
    };
    if w.max(h) <= max_edge {
        return pixelbuf_from_rgba(img, src.has_alpha);
    }

    let (nw, nh) = if w >= h {
        let nh = ((h as f32) * (max_edge as f32 / w as f32)).round().max(1.0) as u32;
        (max_edge, nh)
    } else {
        let nw = ((w as f32) * (max_edge as f32 / h as f32)).round().max(1.0) as u32;
        (nw, max_edge)
    };
    let resized = image::imageops::resize(&img, nw, nh, FilterType::Triangle);
    pixelbuf_from_rgba(resized, src.has_alpha)
}

/// Rotation of raw RGBA pixels by clockwise quarter turns (0..=3).
pub(crate) fn rotate_quarter_turns(src: &PixelBuf, turns: u8) -> PixelBuf {
    let fallback = || PixelBuf {
        width: src.width,
        height: src.height,
        has_alpha: src.has_alpha,
        rgba: src.rgba.clone(),
    };
    if turns % 4 == 0 {
        return fallback();
    }
    let Some(img) = RgbaImage::from_raw(src.width, src.height, src.rgba.clone()) else {
        return fallback();
    };
    let rotated = match turns % 4 {
        1 => image::imageops::rotate90(&img),
        2 => image::imageops::rotate180(&img),
        _ => image::imageops::rotate270(&img),
    };
    pixelbuf_from_rgba(rotated, src.has_alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};
    use std::io::Write;

    fn write_png(path: &Path, w: u32, h: u32) {
        let mut bytes = Vec::new();
        let data = vec![127u8; (w * h * 4) as usize];
        PngEncoder::new(&mut bytes)
            .write_image(&data, w, h, ExtendedColorType::Rgba8)
            .unwrap();
        let mut f = File::create(path).unwrap();
        f.write_all(&bytes).unwrap();
    }

    #[test]
    fn sniffs_png_as_static() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        write_png(&path, 4, 3);
        assert_eq!(sniff_kind(&path), DecoderKind::Static);
    }

    #[test]
    fn unreadable_files_fall_back_to_static() {
        assert_eq!(sniff_kind(Path::new("/no/such/file")), DecoderKind::Static);
    }

    #[test]
    fn static_backend_produces_exactly_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        write_png(&path, 6, 2);

        let mut backend = Backend::open(&path, DecoderKind::Static).unwrap();
        let meta = backend.meta();
        assert_eq!((meta.width, meta.height), (6, 2));
        assert_eq!(meta.frame_count, Some(1));

        let frame = backend.next_frame().unwrap().unwrap();
        assert_eq!(frame.pixels.width, 6);
        assert!(backend.next_frame().unwrap().is_none());
    }

    #[test]
    fn downscale_caps_longest_edge() {
        let src = PixelBuf {
            width: 100,
            height: 40,
            has_alpha: false,
            rgba: vec![0; 100 * 40 * 4],
        };
        let thumb = downscale_to_edge(&src, 50);
        assert_eq!(thumb.width, 50);
        assert_eq!(thumb.height, 20);

        let small = downscale_to_edge(&thumb, 256);
        assert_eq!((small.width, small.height), (50, 20));
    }

    #[test]
    fn rotate_swaps_dimensions_on_odd_turns() {
        let src = PixelBuf {
            width: 3,
            height: 2,
            has_alpha: false,
            rgba: vec![9; 3 * 2 * 4],
        };
        let turned = rotate_quarter_turns(&src, 1);
        assert_eq!((turned.width, turned.height), (2, 3));
        let back = rotate_quarter_turns(&turned, 3);
        assert_eq!((back.width, back.height), (3, 2));
        let half = rotate_quarter_turns(&src, 2);
        assert_eq!((half.width, half.height), (3, 2));
    }
}
