use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Run as soon as possible; the value is the tick the request was made on.
    At(u64),
    /// Background work, served only when no urgent work is queued.
    Lowest,
}

impl Priority {
    #[inline]
    pub fn is_urgent(self) -> bool {
        matches!(self, Priority::At(_))
    }
}

/// A unit of work. Immutable once submitted.
pub struct WorkItem {
    action: Box<dyn FnOnce() + Send + 'static>,
    pub priority: Priority,
    pub affinity: Option<usize>,
    pub label: &'static str,
}

impl WorkItem {
    pub fn new(priority: Priority, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Box::new(action),
            priority,
            affinity: None,
            label: "work",
        }
    }

    pub fn background(action: impl FnOnce() + Send + 'static) -> Self {
        Self::new(Priority::Lowest, action)
    }

    pub fn with_affinity(mut self, worker: usize) -> Self {
        self.affinity = Some(worker);
        self
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Run the action, containing any panic. Returns false if it panicked.
    pub(crate) fn run(self) -> bool {
        let label = self.label;
        match catch_unwind(AssertUnwindSafe(self.action)) {
            Ok(()) => true,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                log::error!(target: "pool", "work item '{}' panicked: {}", label, msg);
                false
            }
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}
