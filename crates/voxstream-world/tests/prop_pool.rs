use proptest::prelude::*;
use voxstream_world::{ObjectPool, Recycle, SlotPool};

#[derive(Default)]
struct Scratch {
    dirty: bool,
}

impl Recycle for Scratch {
    fn reset(&mut self) {
        self.dirty = false;
    }
}

#[derive(Clone, Debug)]
enum Op {
    Pop,
    Push,
    Compact,
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![3 => Just(Op::Pop), 3 => Just(Op::Push), 1 => Just(Op::Compact)],
        0..64,
    )
}

proptest! {
    // after any pops, compaction restores the preallocated floor
    #[test]
    fn compaction_keeps_initial_size(initial in 0usize..16, pops in 0usize..40) {
        let mut pool = ObjectPool::new(initial, Scratch::default);
        let held: Vec<Scratch> = (0..pops).map(|_| pool.pop()).collect();
        pool.compact();
        prop_assert_eq!(pool.free_count(), initial);
        prop_assert_eq!(pool.outstanding(), held.len());
    }

    // recycled objects come back reset and the free list never exceeds the floor after compaction
    #[test]
    fn pool_accounting_holds(initial in 0usize..8, script in ops()) {
        let mut pool = ObjectPool::new(initial, Scratch::default);
        let mut held = Vec::new();
        for op in script {
            match op {
                Op::Pop => {
                    let v = pool.pop();
                    prop_assert!(!v.dirty);
                    held.push(v);
                }
                Op::Push => {
                    if let Some(mut v) = held.pop() {
                        v.dirty = true;
                        pool.push(v);
                    }
                }
                Op::Compact => {
                    pool.compact();
                    prop_assert_eq!(pool.free_count(), initial);
                }
            }
            prop_assert_eq!(pool.outstanding(), held.len());
        }
    }

    // slot handles stay distinct while live and freed slots are reused
    #[test]
    fn slot_handles_are_unique(sizes in prop::collection::vec(1usize..5000, 1..40)) {
        let mut pool = SlotPool::new(64, |cap| Bytes(Vec::with_capacity(cap)));
        let handles: Vec<_> = sizes.iter().map(|n| pool.acquire(*n)).collect();
        for (i, a) in handles.iter().enumerate() {
            prop_assert!(pool.class_capacity(a.class()) >= sizes[i]);
            for b in &handles[i + 1..] {
                prop_assert_ne!(a, b);
            }
        }
        let slots = pool.slot_count();
        for h in &handles {
            pool.release(*h);
        }
        prop_assert_eq!(pool.live_count(), 0);
        for n in &sizes {
            pool.acquire(*n);
        }
        prop_assert_eq!(pool.slot_count(), slots);
    }
}

struct Bytes(Vec<u8>);

impl Recycle for Bytes {
    fn reset(&mut self) {
        self.0.clear();
    }
}
