use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Stage {
    Generate = 0,
    GenerateBlueprints = 1,
    FinalizeData = 2,
    BuildVertices = 3,
    SaveData = 4,
    Remove = 5,
    Deferred = 6,
}

/// Stages gated on neighbor notifications, in pipeline order.
pub const SYNCED_STAGES: [Stage; 3] = [
    Stage::GenerateBlueprints,
    Stage::FinalizeData,
    Stage::BuildVertices,
];

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Generate,
        Stage::GenerateBlueprints,
        Stage::FinalizeData,
        Stage::BuildVertices,
        Stage::SaveData,
        Stage::Remove,
        Stage::Deferred,
    ];

    #[inline]
    pub const fn bit(self) -> u16 {
        1 << self as u8
    }

    /// Slot in the per-section fan-in table.
    #[inline]
    pub const fn sync_slot(self) -> Option<usize> {
        match self {
            Stage::GenerateBlueprints => Some(0),
            Stage::FinalizeData => Some(1),
            Stage::BuildVertices => Some(2),
            _ => None,
        }
    }

    /// The stage a section must have completed itself before this synced stage may fire.
    #[inline]
    pub const fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::GenerateBlueprints => Some(Stage::Generate),
            Stage::FinalizeData => Some(Stage::GenerateBlueprints),
            Stage::BuildVertices => Some(Stage::FinalizeData),
            _ => None,
        }
    }

    /// What a completed stage announces to its neighbors.
    #[inline]
    pub const fn announces(self) -> Option<Stage> {
        match self {
            Stage::Generate => Some(Stage::GenerateBlueprints),
            Stage::GenerateBlueprints => Some(Stage::FinalizeData),
            Stage::FinalizeData => Some(Stage::BuildVertices),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::GenerateBlueprints => "blueprints",
            Stage::FinalizeData => "finalize",
            Stage::BuildVertices => "vertices",
            Stage::SaveData => "save",
            Stage::Remove => "remove",
            Stage::Deferred => "deferred",
        }
    }

    fn from_index(i: u8) -> Option<Stage> {
        Self::ALL.get(i as usize).copied()
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageSet(u16);

impl StageSet {
    pub const EMPTY: StageSet = StageSet(0);

    #[inline]
    pub const fn of(stage: Stage) -> Self {
        StageSet(stage.bit())
    }

    #[inline]
    pub const fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    #[inline]
    pub fn remove(&mut self, stage: Stage) {
        self.0 &= !stage.bit();
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut set = StageSet::EMPTY;
        for s in iter {
            set.insert(s);
        }
        set
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Stage::name)).finish()
    }
}

/// A [`StageSet`] shared between the driver and worker continuations.
#[derive(Default)]
pub struct AtomicStageSet(AtomicU16);

impl AtomicStageSet {
    #[inline]
    pub fn load(&self) -> StageSet {
        StageSet(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn contains(&self, stage: Stage) -> bool {
        self.load().contains(stage)
    }

    #[inline]
    pub fn insert(&self, stage: Stage) {
        self.0.fetch_or(stage.bit(), Ordering::AcqRel);
    }

    #[inline]
    pub fn remove(&self, stage: Stage) {
        self.0.fetch_and(!stage.bit(), Ordering::AcqRel);
    }

    #[inline]
    pub fn take(&self) -> StageSet {
        StageSet(self.0.swap(0, Ordering::AcqRel))
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

impl fmt::Debug for AtomicStageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load().fmt(f)
    }
}

/// The stage a section is currently running on a worker, if any.
pub struct RunningStage(AtomicU8);

impl RunningStage {
    const IDLE: u8 = u8::MAX;

    pub fn new() -> Self {
        Self(AtomicU8::new(Self::IDLE))
    }

    #[inline]
    pub fn get(&self) -> Option<Stage> {
        Stage::from_index(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.get().is_some()
    }

    #[inline]
    pub fn set(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Release);
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(Self::IDLE, Ordering::Release);
    }
}

impl Default for RunningStage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.get().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let mut s = StageSet::EMPTY;
        s.insert(Stage::Generate);
        s.insert(Stage::SaveData);
        assert!(s.contains(Stage::SaveData));
        s.remove(Stage::Generate);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![Stage::SaveData]);
    }

    #[test]
    fn synced_stages_chain() {
        for stage in SYNCED_STAGES {
            let pre = stage.prerequisite().unwrap();
            assert_eq!(pre.announces(), Some(stage));
        }
    }

    #[test]
    fn running_stage_defaults_idle() {
        let r = RunningStage::default();
        assert_eq!(r.get(), None);
        let r = RunningStage::new();
        r.set(Stage::FinalizeData);
        assert_eq!(r.get(), Some(Stage::FinalizeData));
        r.clear();
        assert!(!r.is_running());
    }
}
