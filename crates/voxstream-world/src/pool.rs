/// Objects that can be returned to a pool and handed out again.
pub trait Recycle {
    fn reset(&mut self);
}

impl<T: Recycle + ?Sized> Recycle for Box<T> {
    fn reset(&mut self) {
        (**self).reset();
    }
}

/// Driver-thread free list that keeps `initial_size` objects preallocated.
pub struct ObjectPool<T> {
    free: Vec<T>,
    initial_size: usize,
    outstanding: usize,
    created: usize,
    factory: Box<dyn Fn() -> T + Send>,
}

impl<T: Recycle> ObjectPool<T> {
    pub fn new(initial_size: usize, factory: impl Fn() -> T + Send + 'static) -> Self {
        let mut pool = Self {
            free: Vec::with_capacity(initial_size),
            initial_size,
            outstanding: 0,
            created: 0,
            factory: Box::new(factory),
        };
        pool.top_up();
        pool
    }

    pub fn pop(&mut self) -> T {
        self.outstanding += 1;
        match self.free.pop() {
            Some(v) => v,
            None => {
                self.created += 1;
                (self.factory)()
            }
        }
    }

    /// Reset `value` and keep it for reuse.
    pub fn push(&mut self, mut value: T) {
        assert!(
            self.outstanding > 0,
            "object pool push without a matching pop"
        );
        self.outstanding -= 1;
        value.reset();
        self.free.push(value);
    }

    /// Trim idle objects down to `initial_size`, or preallocate back up to it.
    pub fn compact(&mut self) {
        if self.free.len() > self.initial_size {
            self.free.truncate(self.initial_size);
            self.free.shrink_to(self.initial_size);
        } else {
            self.top_up();
        }
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    #[inline]
    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    /// Total objects the factory has produced.
    #[inline]
    pub fn created(&self) -> usize {
        self.created
    }

    fn top_up(&mut self) {
        while self.free.len() < self.initial_size {
            self.created += 1;
            self.free.push((self.factory)());
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    class: u8,
    index: u32,
}

impl SlotHandle {
    #[inline]
    pub fn class(self) -> u8 {
        self.class
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

struct SlotClass<T> {
    capacity: usize,
    slots: Vec<T>,
    live: Vec<bool>,
    free: Vec<u32>,
}

/// Arena of reusable objects bucketed by power-of-two capacity and addressed by handle.
pub struct SlotPool<T> {
    min_capacity: usize,
    classes: Vec<SlotClass<T>>,
    factory: Box<dyn Fn(usize) -> T + Send>,
}

impl<T: Recycle> SlotPool<T> {
    pub fn new(min_capacity: usize, factory: impl Fn(usize) -> T + Send + 'static) -> Self {
        Self {
            min_capacity: min_capacity.max(1).next_power_of_two(),
            classes: Vec::new(),
            factory: Box::new(factory),
        }
    }

    /// Size class able to hold `required` elements.
    pub fn class_for(&self, required: usize) -> u8 {
        let cap = required.max(self.min_capacity).next_power_of_two();
        (cap.trailing_zeros() - self.min_capacity.trailing_zeros()) as u8
    }

    #[inline]
    pub fn class_capacity(&self, class: u8) -> usize {
        self.min_capacity << class
    }

    pub fn acquire(&mut self, required: usize) -> SlotHandle {
        let class = self.class_for(required);
        while self.classes.len() <= class as usize {
            let capacity = self.class_capacity(self.classes.len() as u8);
            self.classes.push(SlotClass {
                capacity,
                slots: Vec::new(),
                live: Vec::new(),
                free: Vec::new(),
            });
        }
        let bucket = &mut self.classes[class as usize];
        let index = match bucket.free.pop() {
            Some(i) => {
                bucket.live[i as usize] = true;
                i
            }
            None => {
                bucket.slots.push((self.factory)(bucket.capacity));
                bucket.live.push(true);
                (bucket.slots.len() - 1) as u32
            }
        };
        SlotHandle { class, index }
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        let bucket = self.classes.get(handle.class as usize)?;
        let i = handle.index as usize;
        if bucket.live.get(i).copied().unwrap_or(false) {
            bucket.slots.get(i)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        let bucket = self.classes.get_mut(handle.class as usize)?;
        let i = handle.index as usize;
        if bucket.live.get(i).copied().unwrap_or(false) {
            bucket.slots.get_mut(i)
        } else {
            None
        }
    }

    pub fn release(&mut self, handle: SlotHandle) {
        let live = self
            .classes
            .get_mut(handle.class as usize)
            .and_then(|b| b.live.get_mut(handle.index as usize));
        match live {
            Some(flag) if *flag => *flag = false,
            _ => panic!("slot {handle:?} released twice or never acquired"),
        }
        let bucket = &mut self.classes[handle.class as usize];
        bucket.slots[handle.index as usize].reset();
        bucket.free.push(handle.index);
    }

    pub fn live_count(&self) -> usize {
        self.classes
            .iter()
            .map(|b| b.live.iter().filter(|l| **l).count())
            .sum()
    }

    pub fn slot_count(&self) -> usize {
        self.classes.iter().map(|b| b.slots.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Buf {
        data: Vec<u32>,
        resets: u32,
    }

    impl Recycle for Buf {
        fn reset(&mut self) {
            self.data.clear();
            self.resets += 1;
        }
    }

    #[test]
    fn object_pool_resets_on_push() {
        let mut pool = ObjectPool::new(1, Buf::default);
        let mut b = pool.pop();
        b.data.push(3);
        pool.push(b);
        let b = pool.pop();
        assert!(b.data.is_empty());
        assert_eq!(b.resets, 1);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    #[should_panic(expected = "without a matching pop")]
    fn object_pool_rejects_unmatched_push() {
        let mut pool = ObjectPool::new(0, Buf::default);
        pool.push(Buf::default());
    }

    #[test]
    fn slot_pool_buckets_by_capacity() {
        let mut pool = SlotPool::new(16, |cap| Buf {
            data: Vec::with_capacity(cap),
            resets: 0,
        });
        assert_eq!(pool.class_for(1), 0);
        assert_eq!(pool.class_for(16), 0);
        assert_eq!(pool.class_for(17), 1);
        let a = pool.acquire(40);
        assert_eq!(a.class(), 2);
        assert!(pool.get(a).unwrap().data.capacity() >= 64);
        pool.get_mut(a).unwrap().data.push(1);
        pool.release(a);
        assert!(pool.get(a).is_none());
        let b = pool.acquire(50);
        assert_eq!(a, b);
        assert!(pool.get(b).unwrap().data.is_empty());
        assert_eq!(pool.slot_count(), 1);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn slot_pool_rejects_double_release() {
        let mut pool = SlotPool::new(4, |_| Buf::default());
        let h = pool.acquire(1);
        pool.release(h);
        pool.release(h);
    }
}
