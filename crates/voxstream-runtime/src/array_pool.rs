use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use hashbrown::HashMap;

struct SizeClass<T> {
    available_tx: Sender<Vec<T>>,
    available_rx: Receiver<Vec<T>>,
    allocated: AtomicUsize,
    max_arrays: usize,
}

/// Thread-safe pool of fixed-length scratch arrays, one bounded free list per registered length.
///
/// Acquiring an unregistered length, or releasing more arrays than were ever handed out,
/// is a lifecycle bug and panics.
pub struct ArrayPool<T> {
    classes: HashMap<usize, SizeClass<T>>,
    fill: T,
}

impl<T: Copy + Send> ArrayPool<T> {
    pub fn new(fill: T) -> Self {
        Self {
            classes: HashMap::new(),
            fill,
        }
    }

    pub fn with_class(mut self, len: usize, max_arrays: usize) -> Self {
        self.register(len, max_arrays);
        self
    }

    pub fn register(&mut self, len: usize, max_arrays: usize) {
        debug_assert!(max_arrays > 0);
        let (tx, rx) = bounded(max_arrays);
        self.classes.insert(
            len,
            SizeClass {
                available_tx: tx,
                available_rx: rx,
                allocated: AtomicUsize::new(0),
                max_arrays,
            },
        );
    }

    #[inline]
    pub fn is_registered(&self, len: usize) -> bool {
        self.classes.contains_key(&len)
    }

    /// Number of arrays of `len` created so far.
    pub fn allocated(&self, len: usize) -> usize {
        self.class(len).allocated.load(Ordering::Acquire)
    }

    /// Number of arrays of `len` sitting idle in the pool.
    pub fn available(&self, len: usize) -> usize {
        self.class(len).available_rx.len()
    }

    /// Take an array of `len` elements, all set to the pool's fill value. Allocates while
    /// under the class limit, otherwise blocks until another holder releases one.
    pub fn acquire(&self, len: usize) -> PooledArray<'_, T> {
        let class = self.class(len);
        if let Ok(data) = class.available_rx.try_recv() {
            return self.wrap(data);
        }

        loop {
            let current = class.allocated.load(Ordering::Acquire);
            if current < class.max_arrays {
                let prev = class.allocated.fetch_add(1, Ordering::AcqRel);
                if prev < class.max_arrays {
                    return PooledArray {
                        data: Some(vec![self.fill; len]),
                        pool: self,
                    };
                }
                class.allocated.fetch_sub(1, Ordering::AcqRel);
            }

            if let Ok(data) = class.available_rx.recv() {
                return self.wrap(data);
            }
        }
    }

    /// Return a detached array (see [`PooledArray::into_inner`]).
    pub fn release(&self, data: Vec<T>) {
        let len = data.len();
        let class = self.class(len);
        match class.available_tx.try_send(data) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => panic!(
                "array pool for length {len} overflowed: more releases than acquisitions"
            ),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn wrap(&self, mut data: Vec<T>) -> PooledArray<'_, T> {
        data.fill(self.fill);
        PooledArray {
            data: Some(data),
            pool: self,
        }
    }

    fn class(&self, len: usize) -> &SizeClass<T> {
        match self.classes.get(&len) {
            Some(class) => class,
            None => panic!("array pool has no size class for length {len}"),
        }
    }
}

pub struct PooledArray<'pool, T: Copy + Send> {
    data: Option<Vec<T>>,
    pool: &'pool ArrayPool<T>,
}

impl<'pool, T: Copy + Send> PooledArray<'pool, T> {
    /// Detach the array from the guard; hand it back later with [`ArrayPool::release`].
    pub fn into_inner(mut self) -> Vec<T> {
        self.data.take().unwrap_or_default()
    }
}

impl<'pool, T: Copy + Send> Deref for PooledArray<'pool, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl<'pool, T: Copy + Send> DerefMut for PooledArray<'pool, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<'pool, T: Copy + Send> Drop for PooledArray<'pool, T> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}
