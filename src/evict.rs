use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::image_entry::Image;
use crate::index::ImageKey;

// The worker never sleeps longer than this, so shutdown stays prompt.
const POLL_CAP: Duration = Duration::from_millis(50);

struct Pending {
    image: Image,
    deadline: Instant,
}

struct EvictInner {
    queue: Mutex<HashMap<ImageKey, Pending>>,
    cond: Condvar,
    running: AtomicBool,
}

/// Delayed-unload queue with its own worker thread. Images that leave the
/// prefetch window are scheduled here; re-entering the window cancels the
/// entry before the grace period runs out. The queue holds the image
/// handle itself, so unloading needs no registry lookup.
pub(crate) struct Evictor {
    inner: Arc<EvictInner>,
    worker: Option<JoinHandle<()>>,
}

impl Evictor {
    pub(crate) fn new() -> Self {
        let inner = Arc::new(EvictInner {
            queue: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
            running: AtomicBool::new(true),
        });
        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("evictor".to_string())
            .spawn(move || worker_loop(worker_inner))
            .ok();
        Self { inner, worker }
    }

    /// Schedules (or re-schedules) an unload for `delay` from now.
    pub(crate) fn schedule(&self, image: Image, delay: Duration) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.insert(
                image.key(),
                Pending {
                    image,
                    deadline: Instant::now() + delay,
                },
            );
        }
        self.inner.cond.notify_all();
    }

    pub(crate) fn cancel(&self, key: ImageKey) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.remove(&key);
        }
    }

    /// Cancels and schedules in one step under the queue lock, so a
    /// prefetch-window change never races the worker: keys entering the
    /// window are off the queue before anything leaving it is put on.
    pub(crate) fn reclassify(&self, entering: &[ImageKey], leaving: Vec<Image>, delay: Duration) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            for key in entering {
                queue.remove(key);
            }
            let deadline = Instant::now() + delay;
            for image in leaving {
                queue.insert(image.key(), Pending { image, deadline });
            }
        }
        self.inner.cond.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: ImageKey) -> bool {
        self.inner
            .queue
            .lock()
            .map(|q| q.contains_key(&key))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.inner.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: Arc<EvictInner>) {
    while inner.running.load(Ordering::SeqCst) {
        let due: Vec<Image> = {
            let Ok(queue) = inner.queue.lock() else {
                return;
            };
            let Ok((mut queue, _)) = inner.cond.wait_timeout(queue, POLL_CAP) else {
                return;
            };
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }

            let now = Instant::now();
            let ripe: Vec<ImageKey> = queue
                .iter()
                .filter(|(_, p)| now >= p.deadline)
                .map(|(k, _)| *k)
                .collect();
            ripe.iter()
                .filter_map(|k| queue.remove(k))
                .map(|p| p.image)
                .collect()
        };

        // Unloads happen outside the queue lock; they may join decoders.
        for image in due {
            if !image.is_unloaded() {
                debug!("evicting {}", image.filepath().display());
                image.unload();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewerOptions;
    use crate::ViewerContext;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    fn write_png(path: &Path) {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(&[255u8; 4 * 4 * 4], 4, 4, ExtendedColorType::Rgba8)
            .unwrap();
        File::create(path).unwrap().write_all(&bytes).unwrap();
    }

    fn loaded_image(dir: &Path, name: &str) -> Image {
        let path = dir.join(name);
        write_png(&path);
        let img = Image::new(
            path,
            ImageKey::new(7, name),
            &ViewerOptions::default(),
            ViewerContext::new(),
        );
        img.start_loading(false);
        let deadline = Instant::now() + Duration::from_secs(5);
        while img.current_frame().is_none() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }
        img
    }

    #[test]
    fn due_entries_unload_after_the_grace() {
        let dir = tempfile::tempdir().unwrap();
        let img = loaded_image(dir.path(), "a.png");
        let key = img.key();

        let evictor = Evictor::new();
        evictor.schedule(img.clone(), Duration::from_millis(30));
        assert!(evictor.contains(key));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !img.is_unloaded() {
            assert!(Instant::now() < deadline, "image never unloaded");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!evictor.contains(key));
    }

    #[test]
    fn cancel_keeps_the_image_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let img = loaded_image(dir.path(), "b.png");

        let evictor = Evictor::new();
        evictor.schedule(img.clone(), Duration::from_millis(60));
        evictor.cancel(img.key());
        assert_eq!(evictor.queue_len(), 0);

        thread::sleep(Duration::from_millis(150));
        assert!(!img.is_unloaded());
    }

    #[test]
    fn rescheduling_overwrites_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let img = loaded_image(dir.path(), "c.png");

        let evictor = Evictor::new();
        evictor.schedule(img.clone(), Duration::from_secs(60));
        evictor.schedule(img.clone(), Duration::from_millis(30));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !img.is_unloaded() {
            assert!(Instant::now() < deadline, "reschedule did not shorten");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
