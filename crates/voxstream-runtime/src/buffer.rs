use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::pool::WorkerPool;
use crate::work::{Priority, WorkItem};

/// Per-subsystem staging area. Items submitted during a tick (from any thread) reach the
/// pool only when [`WorkBuffer::commit`] runs.
pub struct WorkBuffer {
    label: &'static str,
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
}

impl WorkBuffer {
    pub fn new(label: &'static str) -> Self {
        let (tx, rx) = unbounded();
        Self { label, tx, rx }
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn submit(&self, item: WorkItem) {
        // The buffer owns both ends, so the channel cannot be disconnected here.
        let _ = self.tx.send(item);
    }

    pub fn push(&self, priority: Priority, action: impl FnOnce() + Send + 'static) {
        self.submit(WorkItem::new(priority, action));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Flush everything buffered so far into `pool`. Inline pools run the items here.
    pub fn commit(&self, pool: &WorkerPool) -> usize {
        let batch: Vec<WorkItem> = self.rx.try_iter().collect();
        if batch.is_empty() {
            return 0;
        }
        let n = pool.enqueue_batch(batch);
        log::trace!(target: "pool", "{}: committed {} items to '{}'", self.label, n, pool.name());
        n
    }
}
