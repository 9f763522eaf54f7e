use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Subscribers<T> = Mutex<HashMap<u64, Box<dyn Fn(&T) + Send>>>;

/// Typed publisher. Subscribers are keyed by handle; dropping the
/// [`Subscription`] unsubscribes.
pub struct Signal<T> {
    subs: Arc<Subscribers<T>>,
    next_id: AtomicU64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            subs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subs.lock() {
            subs.insert(id, Box::new(callback));
        }
        Subscription {
            id,
            subs: Arc::downgrade(&self.subs),
        }
    }

    /// Invokes every live subscriber with `value`. Callbacks run on the
    /// emitting thread; keep them short.
    pub fn emit(&self, value: &T) {
        if let Ok(subs) = self.subs.lock() {
            for callback in subs.values() {
                callback(value);
            }
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Keeps one subscription alive; unsubscribes on drop.
pub struct Subscription<T> {
    id: u64,
    subs: Weak<Subscribers<T>>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(subs) = self.subs.upgrade() {
            if let Ok(mut subs) = subs.lock() {
                subs.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_reaches_all_subscribers() {
        let signal = Signal::<usize>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        let _s1 = signal.subscribe(move |v| {
            h1.fetch_add(*v, Ordering::SeqCst);
        });
        let h2 = hits.clone();
        let _s2 = signal.subscribe(move |v| {
            h2.fetch_add(*v, Ordering::SeqCst);
        });

        signal.emit(&3);
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let signal = Signal::<()>::new();
        let sub = signal.subscribe(|_| {});
        assert_eq!(signal.subscriber_count(), 1);
        drop(sub);
        assert_eq!(signal.subscriber_count(), 0);
        signal.emit(&());
    }
}
