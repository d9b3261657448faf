use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use crate::work::WorkItem;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to start worker pool '{name}': {source}")]
    Build {
        name: String,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

enum Message {
    Work(WorkItem),
    Wake,
}

#[derive(Default)]
struct Counters {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn execute(&self, item: WorkItem) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if item.run() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Threaded {
    pinned: Vec<Sender<Message>>,
    urgent: Sender<Message>,
    background: Sender<Message>,
    stop: Arc<AtomicBool>,
    stopped: AtomicBool,
    exit_rx: Receiver<()>,
    _threads: ThreadPool,
}

/// Fixed set of workers draining FIFO lanes: pinned items first, then urgent, then background.
///
/// A pool built with [`WorkerPool::inline`] has no threads and runs each item on the
/// enqueuing thread.
pub struct WorkerPool {
    name: String,
    workers: usize,
    counters: Arc<Counters>,
    threaded: Option<Threaded>,
}

impl WorkerPool {
    pub fn new(name: &str, workers: usize) -> Result<Self, PoolError> {
        let workers = workers.max(1);
        let prefix = name.to_string();
        let threads = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|source| PoolError::Build {
                name: name.to_string(),
                source,
            })?;

        let (urgent_tx, urgent_rx) = unbounded::<Message>();
        let (bg_tx, bg_rx) = unbounded::<Message>();
        let (exit_tx, exit_rx) = bounded::<()>(workers);
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let mut pinned = Vec::with_capacity(workers);

        for _ in 0..workers {
            let (pin_tx, pin_rx) = unbounded::<Message>();
            pinned.push(pin_tx);
            let urgent_rx = urgent_rx.clone();
            let bg_rx = bg_rx.clone();
            let stop = stop.clone();
            let counters = counters.clone();
            let exit_tx = exit_tx.clone();
            threads.spawn(move || {
                worker_loop(&pin_rx, &urgent_rx, &bg_rx, &stop, &counters);
                let _ = exit_tx.send(());
            });
        }
        log::debug!(target: "pool", "started pool '{}' with {} workers", name, workers);

        Ok(Self {
            name: name.to_string(),
            workers,
            counters,
            threaded: Some(Threaded {
                pinned,
                urgent: urgent_tx,
                background: bg_tx,
                stop,
                stopped: AtomicBool::new(false),
                exit_rx,
                _threads: threads,
            }),
        })
    }

    pub fn inline(name: &str) -> Self {
        Self {
            name: name.to_string(),
            workers: 0,
            counters: Arc::new(Counters::default()),
            threaded: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        self.threaded.is_none()
    }

    pub fn enqueue(&self, item: WorkItem) {
        let Some(t) = &self.threaded else {
            self.counters.execute(item);
            return;
        };
        if t.stopped.load(Ordering::Acquire) {
            log::warn!(target: "pool", "pool '{}' is shut down; dropping '{}'", self.name, item.label);
            return;
        }
        let lane = match item.affinity {
            Some(worker) => &t.pinned[worker % self.workers],
            None if item.priority.is_urgent() => &t.urgent,
            None => &t.background,
        };
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if lane.send(Message::Work(item)).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            log::warn!(target: "pool", "pool '{}' lost its workers; item dropped", self.name);
        }
    }

    pub fn enqueue_batch(&self, items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut n = 0;
        for item in items {
            self.enqueue(item);
            n += 1;
        }
        n
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            queued: self.counters.queued.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_idle(&self) -> bool {
        let s = self.stats();
        s.queued == 0 && s.in_flight == 0
    }

    /// Set the stop flag, wake every worker and wait for them to leave their loops.
    /// Items already running finish; items still queued are dropped.
    pub fn shutdown(&self) {
        let Some(t) = &self.threaded else {
            return;
        };
        if t.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        t.stop.store(true, Ordering::Release);
        for tx in &t.pinned {
            let _ = tx.send(Message::Wake);
        }
        let mut exited = 0;
        while exited < self.workers && t.exit_rx.recv().is_ok() {
            exited += 1;
        }
        log::debug!(target: "pool", "pool '{}' stopped ({} workers)", self.name, exited);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    pinned: &Receiver<Message>,
    urgent: &Receiver<Message>,
    background: &Receiver<Message>,
    stop: &AtomicBool,
    counters: &Counters,
) {
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let next = match try_lanes(pinned, urgent, background) {
            Ok(msg) => msg,
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {
                let res = select! {
                    recv(pinned) -> m => m,
                    recv(urgent) -> m => m,
                    recv(background) -> m => m,
                };
                match res {
                    Ok(msg) => msg,
                    Err(_) => break,
                }
            }
        };
        match next {
            Message::Work(item) => {
                counters.queued.fetch_sub(1, Ordering::Relaxed);
                counters.execute(item);
            }
            Message::Wake => {}
        }
    }
}

fn try_lanes(
    pinned: &Receiver<Message>,
    urgent: &Receiver<Message>,
    background: &Receiver<Message>,
) -> Result<Message, TryRecvError> {
    let mut disconnected = false;
    for lane in [pinned, urgent, background] {
        match lane.try_recv() {
            Ok(msg) => return Ok(msg),
            Err(TryRecvError::Disconnected) => disconnected = true,
            Err(TryRecvError::Empty) => {}
        }
    }
    if disconnected {
        Err(TryRecvError::Disconnected)
    } else {
        Err(TryRecvError::Empty)
    }
}
