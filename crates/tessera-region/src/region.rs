//! A region: a dynamically sized set of sections ticked as one unit.
//!
//! Membership (which sections a region owns) lives in the regionizer and
//! only changes under the structural lock. The [`Region`] itself carries
//! what other threads need to see without that lock: the lifecycle state,
//! the tick counter, summary counts, the region-local data table, and the
//! queue of pending region tasks.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tessera_core::coord::section_key_of_cell;
use tessera_core::RegionId;

use crate::data::RegionData;

// ── RegionState ────────────────────────────────────────────────────

/// Lifecycle state of a [`Region`].
///
/// `Transient` is held only while the regionizer performs structural work
/// on the region under its lock. `Dead` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RegionState {
    /// Under structural mutation.
    Transient = 0,
    /// Idle and eligible for ticking or structural work.
    Ready = 1,
    /// A worker is running the region's tick.
    Ticking = 2,
    /// Merged away, split, or emptied. Never ticked again.
    Dead = 3,
}

impl RegionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Transient,
            1 => Self::Ready,
            2 => Self::Ticking,
            _ => Self::Dead,
        }
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Ready => "ready",
            Self::Ticking => "ticking",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

// ── RegionTask ─────────────────────────────────────────────────────

/// A closure queued on the region owning a cell, run at the start of that
/// region's next tick. Follows its cell across merges and splits.
pub struct RegionTask {
    cell_key: u64,
    run: Box<dyn FnOnce(&mut RegionData) + Send>,
}

impl RegionTask {
    /// Wrap `run` as a task addressed to the packed cell `cell_key`.
    pub fn new(cell_key: u64, run: impl FnOnce(&mut RegionData) + Send + 'static) -> Self {
        Self {
            cell_key,
            run: Box::new(run),
        }
    }

    /// Packed key of the addressed cell.
    pub fn cell_key(&self) -> u64 {
        self.cell_key
    }

    /// Section key of the addressed cell under `shift`.
    pub fn section_key(&self, shift: u32) -> u64 {
        section_key_of_cell(self.cell_key, shift)
    }

    /// Consume and run the task.
    pub fn run(self, data: &mut RegionData) {
        (self.run)(data)
    }
}

impl fmt::Debug for RegionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionTask")
            .field("cell_key", &self.cell_key)
            .finish_non_exhaustive()
    }
}

// ── Region ─────────────────────────────────────────────────────────

/// One region of a world.
pub struct Region {
    id: RegionId,
    state: AtomicU8,
    tick: AtomicU64,
    cells: AtomicU64,
    sections: AtomicU64,
    dead_sections: AtomicU64,
    data: Mutex<RegionData>,
    tasks: Mutex<Vec<RegionTask>>,
}

// Compile-time assertion: Region must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Region>();
};

impl Region {
    pub(crate) fn new(id: RegionId, tick: u64, data: RegionData) -> Self {
        Self {
            id,
            state: AtomicU8::new(RegionState::Transient as u8),
            tick: AtomicU64::new(tick),
            cells: AtomicU64::new(0),
            sections: AtomicU64::new(0),
            dead_sections: AtomicU64::new(0),
            data: Mutex::new(data),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Region id. Lower ids are older.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegionState {
        RegionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the region is dead.
    pub fn is_dead(&self) -> bool {
        self.state() == RegionState::Dead
    }

    /// Number of completed ticks, inherited across splits.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Number of present cells in the region's sections.
    pub fn cell_count(&self) -> u64 {
        self.cells.load(Ordering::Acquire)
    }

    /// Number of sections owned, live and dead.
    pub fn section_count(&self) -> u64 {
        self.sections.load(Ordering::Acquire)
    }

    /// Number of dead sections: no present cells and no live section
    /// within the empty-section radius.
    pub fn dead_section_count(&self) -> u64 {
        self.dead_sections.load(Ordering::Acquire)
    }

    /// `dead sections / total sections`, in `[0, 1]`. Zero for a region
    /// with no sections.
    pub fn dead_section_percent(&self) -> f64 {
        let total = self.section_count();
        if total == 0 {
            return 0.0;
        }
        (self.dead_section_count().min(total)) as f64 / total as f64
    }

    /// Whether no section of the region holds a present cell.
    pub fn has_no_alive_sections(&self) -> bool {
        self.cell_count() == 0
    }

    /// Claim the region for a tick: `Ready → Ticking`.
    ///
    /// Returns `false` if the region is transient or dead. The regionizer
    /// claims regions for structural work with the same compare-and-swap,
    /// so a tick and a structural change never overlap.
    pub fn try_begin_tick(&self) -> bool {
        self.transition(RegionState::Ready, RegionState::Ticking)
    }

    /// Advance the tick counter after a completed tick. Only meaningful
    /// while the caller holds the region in `Ticking`.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Lock the region-local data table.
    ///
    /// Meant for the region's own tick thread. Other threads may lock it,
    /// but a later merge or split can replace the instances they saw.
    pub fn data(&self) -> MutexGuard<'_, RegionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the region-local data table locked.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut RegionData) -> R) -> R {
        f(&mut *self.data())
    }

    /// Queue a task for the region's next tick.
    pub fn push_task(&self, task: RegionTask) {
        self.lock_tasks().push(task);
    }

    /// Take every pending task, oldest first.
    pub fn take_tasks(&self) -> Vec<RegionTask> {
        std::mem::take(&mut *self.lock_tasks())
    }

    /// Number of pending tasks.
    pub fn pending_tasks(&self) -> usize {
        self.lock_tasks().len()
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<RegionTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Structural (regionizer-only) ───────────────────────────────

    pub(crate) fn transition(&self, from: RegionState, to: RegionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_state(&self, to: RegionState) {
        self.state.store(to as u8, Ordering::Release);
    }

    pub(crate) fn set_counts(&self, cells: u64, sections: u64, dead_sections: u64) {
        self.cells.store(cells, Ordering::Release);
        self.sections.store(sections, Ordering::Release);
        self.dead_sections.store(dead_sections, Ordering::Release);
    }

    pub(crate) fn add_cells(&self, delta: i64) {
        if delta >= 0 {
            self.cells.fetch_add(delta as u64, Ordering::AcqRel);
        } else {
            self.cells.fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
        }
    }

    pub(crate) fn add_dead_sections(&self, delta: i64) {
        if delta >= 0 {
            self.dead_sections.fetch_add(delta as u64, Ordering::AcqRel);
        } else {
            self.dead_sections
                .fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
        }
    }

    pub(crate) fn replace_data(&self, data: RegionData) -> RegionData {
        std::mem::replace(&mut *self.data(), data)
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("tick", &self.tick())
            .field("cells", &self.cell_count())
            .field("sections", &self.section_count())
            .field("dead_sections", &self.dead_section_count())
            .finish()
    }
}
