use crate::coord::SectionId;

pub const MAX_NEIGHBORS: usize = 6;

/// Fixed-capacity subscriber slots of one section. Non-owning: holds ids only.
#[derive(Clone, Debug)]
pub struct NeighborSlots {
    slots: [Option<SectionId>; MAX_NEIGHBORS],
    capacity: u8,
    registered: u8,
}

impl NeighborSlots {
    pub fn new(capacity: usize) -> Self {
        assert!(
            (4..=MAX_NEIGHBORS).contains(&capacity),
            "neighbor capacity must be 4..=6, got {capacity}"
        );
        Self {
            slots: [None; MAX_NEIGHBORS],
            capacity: capacity as u8,
            registered: 0,
        }
    }

    /// Four horizontal neighbors, plus one for each vertical neighbor the stack provides.
    pub fn capacity_for(index: usize, stack_height: usize) -> usize {
        4 + usize::from(index > 0) + usize::from(index + 1 < stack_height)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub fn registered(&self) -> usize {
        self.registered as usize
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.registered == self.capacity
    }

    pub fn slot_of(&self, id: SectionId) -> Option<usize> {
        self.slots[..self.capacity()]
            .iter()
            .position(|s| *s == Some(id))
    }

    /// Take a free slot for `id`. Registering twice returns the existing slot.
    pub fn register(&mut self, id: SectionId) -> usize {
        if let Some(slot) = self.slot_of(id) {
            return slot;
        }
        let cap = self.capacity();
        let Some(slot) = self.slots[..cap].iter().position(Option::is_none) else {
            panic!("neighbor slots full ({cap}) while registering {id:?}");
        };
        self.slots[slot] = Some(id);
        self.registered += 1;
        slot
    }

    pub fn unregister(&mut self, id: SectionId) -> Option<usize> {
        let slot = self.slot_of(id)?;
        self.slots[slot] = None;
        self.registered -= 1;
        Some(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = SectionId> + '_ {
        self.slots.iter().flatten().copied()
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_NEIGHBORS];
        self.registered = 0;
    }
}

/// Votes collected for one synchronized stage, one bit per neighbor slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanIn {
    votes: u8,
}

impl FanIn {
    /// Record a vote; returns false if this slot had already voted.
    #[inline]
    pub fn record(&mut self, slot: usize) -> bool {
        let bit = 1u8 << slot;
        let fresh = self.votes & bit == 0;
        self.votes |= bit;
        fresh
    }

    #[inline]
    pub fn withdraw(&mut self, slot: usize) {
        self.votes &= !(1u8 << slot);
    }

    #[inline]
    pub fn count(self) -> usize {
        self.votes.count_ones() as usize
    }

    #[inline]
    pub fn reset(&mut self) {
        self.votes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::ChunkCoord;

    fn id(x: i32, i: u8) -> SectionId {
        SectionId::new(ChunkCoord::new(x, 0), i)
    }

    #[test]
    fn capacity_depends_on_stack_position() {
        assert_eq!(NeighborSlots::capacity_for(0, 1), 4);
        assert_eq!(NeighborSlots::capacity_for(0, 3), 5);
        assert_eq!(NeighborSlots::capacity_for(1, 3), 6);
        assert_eq!(NeighborSlots::capacity_for(2, 3), 5);
    }

    #[test]
    fn register_and_unregister_are_inverse() {
        let mut n = NeighborSlots::new(4);
        let a = n.register(id(1, 0));
        let b = n.register(id(2, 0));
        assert_ne!(a, b);
        assert_eq!(n.register(id(1, 0)), a);
        assert_eq!(n.registered(), 2);
        assert_eq!(n.unregister(id(1, 0)), Some(a));
        assert_eq!(n.unregister(id(1, 0)), None);
        assert_eq!(n.registered(), 1);
        assert_eq!(n.register(id(3, 0)), a);
    }

    #[test]
    #[should_panic(expected = "neighbor slots full")]
    fn overflow_is_fatal() {
        let mut n = NeighborSlots::new(4);
        for x in 0..5 {
            n.register(id(x, 0));
        }
    }

    #[test]
    fn fan_in_counts_distinct_slots() {
        let mut f = FanIn::default();
        assert!(f.record(0));
        assert!(f.record(3));
        assert!(!f.record(3));
        assert_eq!(f.count(), 2);
        f.withdraw(0);
        assert_eq!(f.count(), 1);
        f.reset();
        assert_eq!(f.count(), 0);
    }
}
