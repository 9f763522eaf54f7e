use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/* ───────────────────────── task plumbing ────────────────────────── */

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Priority {
    Critical,
    Normal,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

type TaskFn = Box<dyn FnOnce(&TaskContext) + Send + 'static>;

struct Job {
    id: TaskId,
    run: TaskFn,
}

#[derive(Default)]
struct TaskState {
    cancelled: bool,
}

struct SchedInner {
    tasks: Mutex<HashMap<TaskId, TaskState>>,
    done: Condvar,
}

/// Handed to a running task; lets it poll for cooperative cancellation.
pub struct TaskContext {
    id: TaskId,
    inner: Arc<SchedInner>,
}

impl TaskContext {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner
            .tasks
            .lock()
            .map(|t| t.get(&self.id).map(|s| s.cancelled).unwrap_or(true))
            .unwrap_or(true)
    }
}

/* ───────────────────────── scheduler ────────────────────────────── */

const JOB_CHAN_CAP: usize = 256;

/// Two-priority task runner. Workers are dedicated threads draining the
/// critical channel ahead of the normal one. Dropping the scheduler closes
/// both channels and the workers exit.
pub struct Scheduler {
    inner: Arc<SchedInner>,
    critical_tx: Sender<Job>,
    normal_tx: Sender<Job>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let (critical_tx, critical_rx) = bounded::<Job>(JOB_CHAN_CAP);
        let (normal_tx, normal_rx) = bounded::<Job>(JOB_CHAN_CAP);
        let inner = Arc::new(SchedInner {
            tasks: Mutex::new(HashMap::new()),
            done: Condvar::new(),
        });

        for i in 0..workers.max(1) {
            let crx = critical_rx.clone();
            let nrx = normal_rx.clone();
            let inner = inner.clone();
            let _ = thread::Builder::new()
                .name(format!("sched-{i}"))
                .spawn(move || worker_loop(crx, nrx, inner));
        }

        Self {
            inner,
            critical_tx,
            normal_tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Queues `task` and returns its id. The closure receives a
    /// [`TaskContext`] it should poll between units of work.
    pub fn submit<F>(&self, priority: Priority, task: F) -> TaskId
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.insert(id, TaskState::default());
        }

        let job = Job {
            id,
            run: Box::new(task),
        };
        let tx = match priority {
            Priority::Critical => &self.critical_tx,
            Priority::Normal => &self.normal_tx,
        };
        if tx.send(job).is_err() {
            // Workers are gone; forget the bookkeeping entry.
            if let Ok(mut tasks) = self.inner.tasks.lock() {
                tasks.remove(&id);
            }
        }
        id
    }

    /// Requests cancellation. A queued task is discarded before it starts;
    /// a running one keeps going until it polls `is_cancelled`. With `wait`
    /// set, blocks until the task has fully retired.
    pub fn cancel(&self, id: TaskId, wait: bool) {
        let Ok(mut tasks) = self.inner.tasks.lock() else {
            return;
        };
        match tasks.get_mut(&id) {
            Some(state) => state.cancelled = true,
            None => return,
        }
        if wait {
            while tasks.contains_key(&id) {
                tasks = match self.inner.done.wait(tasks) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
        }
    }

    #[cfg(test)]
    fn is_retired(&self, id: TaskId) -> bool {
        self.inner
            .tasks
            .lock()
            .map(|t| !t.contains_key(&id))
            .unwrap_or(true)
    }
}

fn worker_loop(critical_rx: Receiver<Job>, normal_rx: Receiver<Job>, inner: Arc<SchedInner>) {
    loop {
        // Prefer critical work; otherwise take whichever arrives first.
        let job = match critical_rx.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty) => crossbeam_channel::select! {
                recv(critical_rx) -> r => r.ok(),
                recv(normal_rx) -> r => r.ok(),
            },
            Err(TryRecvError::Disconnected) => normal_rx.recv().ok(),
        };
        let Some(job) = job else {
            return;
        };

        // Cancelled while queued: retire without running.
        {
            let Ok(mut tasks) = inner.tasks.lock() else {
                return;
            };
            match tasks.get(&job.id) {
                Some(state) if state.cancelled => {
                    tasks.remove(&job.id);
                    inner.done.notify_all();
                    continue;
                }
                Some(_) => {}
                None => continue,
            }
        }

        let ctx = TaskContext {
            id: job.id,
            inner: inner.clone(),
        };
        (job.run)(&ctx);

        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.remove(&job.id);
        }
        inner.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn submitted_task_runs() {
        let sched = Scheduler::new(2);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let id = sched.submit(Priority::Normal, move |_| {
            flag.store(true, Ordering::SeqCst);
        });

        // cancel(wait) doubles as a join once the task retires.
        sched.cancel(id, true);
        assert!(ran.load(Ordering::SeqCst));
        assert!(sched.is_retired(id));
    }

    #[test]
    fn running_task_observes_cancellation() {
        let sched = Scheduler::new(2);
        let started = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicBool::new(false));

        let s = started.clone();
        let o = observed.clone();
        let id = sched.submit(Priority::Critical, move |ctx| {
            s.store(true, Ordering::SeqCst);
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            o.store(true, Ordering::SeqCst);
        });

        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        sched.cancel(id, true);
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn queued_task_cancelled_before_start_never_runs() {
        let sched = Scheduler::new(1);
        let gate = Arc::new(AtomicBool::new(false));

        // Occupy the single worker.
        let g = gate.clone();
        let blocker = sched.submit(Priority::Normal, move |_| {
            while !g.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let queued = sched.submit(Priority::Normal, move |_| {
            flag.store(true, Ordering::SeqCst);
        });

        sched.cancel(queued, false);
        gate.store(true, Ordering::SeqCst);
        sched.cancel(blocker, true);
        sched.cancel(queued, true);

        assert!(!ran.load(Ordering::SeqCst));
    }
}
