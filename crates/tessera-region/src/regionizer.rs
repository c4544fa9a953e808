//! The spatial regionizer: owns every region of one world and keeps
//! region membership consistent with spatial adjacency.
//!
//! # Model
//!
//! Cells are reference counted; a cell is present while its count is
//! positive. Cells are grouped into sections (`cell >> section_shift`). A
//! section holding a present cell is *live*. When a section becomes live,
//! every missing section within `empty_section_create_radius` is created
//! as a buffer. A section is *dead* when it holds no present cell and no
//! live section lies within that radius.
//!
//! Two sections are adjacent when their Chebyshev distance is at most
//! `merge_radius`; adjacent sections always end up in the same region.
//! Regions whose dead fraction exceeds `max_dead_section_percent` are
//! compacted: dead sections are pruned and the remainder is split into
//! connected components.
//!
//! # Locking
//!
//! One structural mutex serializes every membership change. Regions are
//! claimed for structural work with a `Ready → Transient` compare-and-swap,
//! the same word a worker swaps `Ready → Ticking` to tick, so a region is
//! never ticked while it is being restructured. Work that needs a ticking
//! region is deferred until [`Regionizer::release_region`].
//!
//! After each structural operation the new section ownership is published
//! to a read-mostly index that backs the unsynchronized lookups.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use indexmap::{IndexMap, IndexSet};
use smallvec::{smallvec, SmallVec};

use tessera_core::coord::{pack, section_key_of};
use tessera_core::{CellPos, FatalError, FatalPolicy, RegionId, RegionizerError, SectionPos};

use crate::config::{RegionizerConfig, RegionizerConfigError};
use crate::data::{DataRegistry, RegionData};
use crate::hooks::{NoopHooks, RegionHooks, SplitLayout};
use crate::region::{Region, RegionState, RegionTask};

const LOG: &str = "tessera::regionizer";

type Claimed = SmallVec<[Arc<Region>; 8]>;
type Neighbours = SmallVec<[RegionId; 8]>;

// ── Internal structure ─────────────────────────────────────────────

struct Section {
    live_cells: u32,
    dead: bool,
    owner: RegionId,
}

struct RegionSlot {
    region: Arc<Region>,
    sections: IndexSet<u64>,
    /// Set when a structural change wanted this region while it was
    /// ticking. Cleared by `release_region`.
    pending_merge: bool,
}

struct Structure {
    cells: HashMap<u64, u32>,
    sections: HashMap<u64, Section>,
    regions: IndexMap<RegionId, RegionSlot>,
    next_id: u64,
    poison: Option<FatalError>,
    dirty_sections: Vec<u64>,
    dirty_regions: Vec<RegionId>,
}

#[derive(Default)]
struct Published {
    sections: HashMap<u64, Arc<Region>>,
    regions: IndexMap<RegionId, Arc<Region>>,
}

// ── Regionizer ─────────────────────────────────────────────────────

/// Owns the regions of one world.
pub struct Regionizer {
    config: RegionizerConfig,
    registry: Arc<DataRegistry>,
    hooks: Arc<dyn RegionHooks>,
    structure: Mutex<Structure>,
    published: RwLock<Published>,
    poisoned: AtomicBool,
}

// Compile-time assertion: Regionizer must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Regionizer>();
};

impl Regionizer {
    /// A regionizer with no lifecycle hooks.
    pub fn new(
        config: RegionizerConfig,
        registry: Arc<DataRegistry>,
    ) -> Result<Self, RegionizerConfigError> {
        Self::with_hooks(config, registry, Arc::new(NoopHooks))
    }

    /// A regionizer that reports lifecycle events to `hooks`.
    pub fn with_hooks(
        config: RegionizerConfig,
        registry: Arc<DataRegistry>,
        hooks: Arc<dyn RegionHooks>,
    ) -> Result<Self, RegionizerConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            hooks,
            structure: Mutex::new(Structure {
                cells: HashMap::new(),
                sections: HashMap::new(),
                regions: IndexMap::new(),
                next_id: 1,
                poison: None,
                dirty_sections: Vec::new(),
                dirty_regions: Vec::new(),
            }),
            published: RwLock::new(Published::default()),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &RegionizerConfig {
        &self.config
    }

    /// Section shift (cell coordinate to section coordinate).
    pub fn section_shift(&self) -> u32 {
        self.config.section_shift
    }

    /// The region-local data registry shared by every region.
    pub fn registry(&self) -> &Arc<DataRegistry> {
        &self.registry
    }

    // ── Cell mutations ─────────────────────────────────────────────

    /// Add one reference to cell `(x, z)`, making it present if it was not.
    ///
    /// A newly present cell joins the region of any adjacent section,
    /// merging every adjacent non-ticking region into the oldest one, or
    /// starts a new region if nothing adjacent can be merged right now.
    pub fn add_cell(&self, x: i32, z: i32) -> Result<(), RegionizerError> {
        let mut st = self.lock();
        self.check_poison(&st)?;
        let mut claimed = Claimed::new();
        let result = self.add_cell_locked(&mut st, x, z, &mut claimed);
        self.finish(&mut st, claimed, result)
    }

    /// Drop one reference to cell `(x, z)`.
    ///
    /// When the last reference goes, the owning region may be compacted
    /// and split. Removing a cell that is not present fails with
    /// [`RegionizerError::CellNotPresent`] and changes nothing.
    pub fn remove_cell(&self, x: i32, z: i32) -> Result<(), RegionizerError> {
        let mut st = self.lock();
        self.check_poison(&st)?;
        let key = pack(x, z);
        match st.cells.get_mut(&key) {
            None => return Err(RegionizerError::CellNotPresent { x, z }),
            Some(count) if *count > 1 => {
                *count -= 1;
                return Ok(());
            }
            Some(_) => {
                st.cells.remove(&key);
            }
        }
        let mut claimed = Claimed::new();
        let result = self.remove_cell_locked(&mut st, x, z, &mut claimed);
        self.finish(&mut st, claimed, result)
    }

    /// Hand a region back after a tick: `Ticking → Ready`.
    ///
    /// Runs any structural work deferred while the region was ticking:
    /// merging with regions that became adjacent, then compaction.
    pub fn release_region(&self, region: &Arc<Region>) -> Result<(), RegionizerError> {
        let mut st = self.lock();
        if !region.transition(RegionState::Ticking, RegionState::Transient) {
            return Ok(());
        }
        if let Some(e) = &st.poison {
            region.set_state(RegionState::Ready);
            return Err(RegionizerError::Poisoned(e.clone()));
        }
        let mut claimed: Claimed = smallvec![Arc::clone(region)];
        let result = self.release_locked(&mut st, region.id(), &mut claimed);
        self.finish(&mut st, claimed, result)
    }

    /// Resolve merges deferred on regions that are no longer ticking.
    ///
    /// Every tick handed back through [`release_region`](Self::release_region)
    /// resolves its own deferral. This pass covers regions left flagged
    /// when ticking stopped, and is run once after the workers are joined.
    /// Regions still ticking are skipped. Returns how many regions were
    /// settled.
    pub fn settle(&self) -> Result<usize, RegionizerError> {
        let mut st = self.lock();
        self.check_poison(&st)?;
        let pending: Vec<RegionId> = st
            .regions
            .iter()
            .filter(|(_, slot)| slot.pending_merge)
            .map(|(&id, _)| id)
            .collect();
        let mut settled = 0;
        for id in pending {
            // An earlier iteration may have merged it away.
            let Some(region) = st.regions.get(&id).map(|s| Arc::clone(&s.region)) else {
                continue;
            };
            if !region.transition(RegionState::Ready, RegionState::Transient) {
                continue;
            }
            let mut claimed: Claimed = smallvec![region];
            let result = self.release_locked(&mut st, id, &mut claimed);
            self.finish(&mut st, claimed, result)?;
            settled += 1;
        }
        if settled > 0 {
            log::debug!(target: LOG, "settled {settled} regions with deferred merges");
        }
        Ok(settled)
    }

    /// Queue `run` on the region owning present cell `(x, z)`, to execute
    /// at the start of that region's next tick. Returns the region id.
    pub fn queue_task(
        &self,
        x: i32,
        z: i32,
        run: impl FnOnce(&mut RegionData) + Send + 'static,
    ) -> Result<RegionId, RegionizerError> {
        let st = self.lock();
        self.check_poison(&st)?;
        let key = pack(x, z);
        if !st.cells.contains_key(&key) {
            return Err(RegionizerError::CellNotPresent { x, z });
        }
        match self.owner_of(&st, x, z) {
            Some(region) => {
                region.push_task(RegionTask::new(key, run));
                Ok(region.id())
            }
            None => Err(RegionizerError::CellNotPresent { x, z }),
        }
    }

    // ── Lookups ────────────────────────────────────────────────────

    /// Region owning the section that holds `(x, z)`, read under the
    /// structural lock. Safe from any thread.
    pub fn region_at(&self, x: i32, z: i32) -> Option<Arc<Region>> {
        let st = self.lock();
        self.owner_of(&st, x, z)
    }

    /// Region owning the section that holds `(x, z)`, read from the
    /// published index without taking the structural lock.
    ///
    /// May lag an in-flight structural operation. Intended for a region's
    /// own tick thread, whose membership cannot change mid-tick.
    pub fn region_at_unsynchronized(&self, x: i32, z: i32) -> Option<Arc<Region>> {
        let key = section_key_of(x, z, self.config.section_shift);
        self.read_published().sections.get(&key).cloned()
    }

    /// Run `f` on the region owning `(x, z)` while holding the structural
    /// lock, so no merge or split can intervene.
    ///
    /// `f` must not call back into this regionizer.
    pub fn with_region_at<R>(&self, x: i32, z: i32, f: impl FnOnce(Option<&Arc<Region>>) -> R) -> R {
        let st = self.lock();
        let region = self.owner_of(&st, x, z);
        f(region.as_ref())
    }

    /// Region with id `id`, if alive.
    pub fn region(&self, id: RegionId) -> Option<Arc<Region>> {
        self.lock().regions.get(&id).map(|s| Arc::clone(&s.region))
    }

    /// Visit every live region under the structural lock.
    ///
    /// `f` must not call back into this regionizer.
    pub fn for_all_regions(&self, mut f: impl FnMut(&Arc<Region>)) {
        let st = self.lock();
        for slot in st.regions.values() {
            f(&slot.region);
        }
    }

    /// Visit every region in the published index without taking the
    /// structural lock. Must not be relied upon while structural changes
    /// are in flight.
    pub fn for_all_regions_unsynchronized(&self, mut f: impl FnMut(&Arc<Region>)) {
        let snapshot: Vec<Arc<Region>> = self.read_published().regions.values().cloned().collect();
        for region in &snapshot {
            f(region);
        }
    }

    /// Snapshot of every live region.
    pub fn regions(&self) -> Vec<Arc<Region>> {
        let st = self.lock();
        st.regions.values().map(|s| Arc::clone(&s.region)).collect()
    }

    /// Number of live regions.
    pub fn region_count(&self) -> usize {
        self.lock().regions.len()
    }

    /// Number of present cells.
    pub fn cell_count(&self) -> usize {
        self.lock().cells.len()
    }

    /// Whether cell `(x, z)` is present.
    pub fn contains_cell(&self, x: i32, z: i32) -> bool {
        self.lock().cells.contains_key(&pack(x, z))
    }

    /// Present cells owned by region `id`, in no particular order.
    pub fn owned_cells(&self, id: RegionId) -> Vec<CellPos> {
        let st = self.lock();
        let shift = self.config.section_shift;
        st.cells
            .keys()
            .map(|&k| CellPos::from_key(k))
            .filter(|c| {
                st.sections
                    .get(&c.section(shift).key())
                    .is_some_and(|s| s.owner == id)
            })
            .collect()
    }

    /// Sections owned by region `id`, live and dead.
    pub fn owned_sections(&self, id: RegionId) -> Vec<SectionPos> {
        let st = self.lock();
        st.regions
            .get(&id)
            .map(|slot| slot.sections.iter().map(|&k| SectionPos::from_key(k)).collect())
            .unwrap_or_default()
    }

    // ── Poison ─────────────────────────────────────────────────────

    /// Whether a fatal error has poisoned this world.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// The fatal error that poisoned this world, if any.
    pub fn poison(&self) -> Option<FatalError> {
        self.lock().poison.clone()
    }

    /// Record a fatal error raised outside the structural lock (by the
    /// scheduler or a pinner) and apply the fatal policy.
    ///
    /// Must not be called from inside a [`RegionHooks`] callback.
    pub fn report_fatal(&self, err: FatalError) -> RegionizerError {
        let mut st = self.lock();
        self.fail(&mut st, err)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Structure> {
        self.structure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_published(&self) -> std::sync::RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_poison(&self, st: &Structure) -> Result<(), RegionizerError> {
        match &st.poison {
            Some(e) => Err(RegionizerError::Poisoned(e.clone())),
            None => Ok(()),
        }
    }

    fn fail(&self, st: &mut Structure, err: FatalError) -> RegionizerError {
        log::error!(target: LOG, "fatal: {err}");
        if st.poison.is_none() {
            st.poison = Some(err.clone());
        }
        self.poisoned.store(true, Ordering::Release);
        if self.config.fatal_policy == FatalPolicy::Abort {
            log::error!(target: LOG, "aborting: region state can no longer be trusted");
            std::process::abort();
        }
        RegionizerError::Fatal(err)
    }

    /// Release claimed regions and publish, or poison on failure.
    fn finish<T>(
        &self,
        st: &mut Structure,
        claimed: Claimed,
        result: Result<T, FatalError>,
    ) -> Result<T, RegionizerError> {
        match result {
            Ok(v) => {
                for region in claimed {
                    region.transition(RegionState::Transient, RegionState::Ready);
                }
                self.publish(st);
                Ok(v)
            }
            Err(e) => Err(self.fail(st, e)),
        }
    }

    fn publish(&self, st: &mut Structure) {
        if st.dirty_sections.is_empty() && st.dirty_regions.is_empty() {
            return;
        }
        let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
        for key in st.dirty_sections.drain(..) {
            let owner = st
                .sections
                .get(&key)
                .and_then(|s| st.regions.get(&s.owner));
            match owner {
                Some(slot) => {
                    published.sections.insert(key, Arc::clone(&slot.region));
                }
                None => {
                    published.sections.remove(&key);
                }
            }
        }
        for id in st.dirty_regions.drain(..) {
            match st.regions.get(&id) {
                Some(slot) => {
                    published.regions.insert(id, Arc::clone(&slot.region));
                }
                None => {
                    published.regions.swap_remove(&id);
                }
            }
        }
    }

    fn owner_of(&self, st: &Structure, x: i32, z: i32) -> Option<Arc<Region>> {
        let key = section_key_of(x, z, self.config.section_shift);
        let owner = st.sections.get(&key)?.owner;
        st.regions.get(&owner).map(|s| Arc::clone(&s.region))
    }

    fn add_cell_locked(
        &self,
        st: &mut Structure,
        x: i32,
        z: i32,
        claimed: &mut Claimed,
    ) -> Result<(), FatalError> {
        let count = st.cells.entry(pack(x, z)).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Ok(());
        }

        let pos = CellPos::new(x, z).section(self.config.section_shift);
        let section_key = pos.key();
        let mut created: SmallVec<[u64; 16]> = SmallVec::new();
        let became_live = match st.sections.get_mut(&section_key) {
            Some(section) => {
                section.live_cells += 1;
                if let Some(slot) = st.regions.get(&section.owner) {
                    slot.region.add_cells(1);
                }
                section.live_cells == 1
            }
            None => {
                created.push(section_key);
                true
            }
        };
        if !became_live {
            return Ok(());
        }

        for n in pos.square(self.config.empty_section_create_radius) {
            let key = n.key();
            if key != section_key && !st.sections.contains_key(&key) {
                created.push(key);
            }
        }
        if created.is_empty() {
            self.refresh_dead(st, pos);
            return Ok(());
        }

        let mut neighbours = Neighbours::new();
        for &key in &created {
            for n in SectionPos::from_key(key).square(self.config.merge_radius) {
                if let Some(s) = st.sections.get(&n.key()) {
                    if !neighbours.contains(&s.owner) {
                        neighbours.push(s.owner);
                    }
                }
            }
        }

        let mut mergeable = Neighbours::new();
        for id in neighbours {
            let Some(slot) = st.regions.get_mut(&id) else {
                continue;
            };
            if slot.region.transition(RegionState::Ready, RegionState::Transient) {
                claimed.push(Arc::clone(&slot.region));
                mergeable.push(id);
            } else {
                slot.pending_merge = true;
            }
        }

        let mut fresh = None;
        let target = match mergeable.iter().min() {
            Some(&id) => id,
            None => {
                let region = self.create_region(st, 0);
                claimed.push(Arc::clone(&region));
                let id = region.id();
                fresh = Some(region);
                id
            }
        };

        let live_created = created[0] == section_key;
        for &key in &created {
            let live_cells = u32::from(key == section_key);
            st.sections.insert(
                key,
                Section {
                    live_cells,
                    dead: false,
                    owner: target,
                },
            );
            st.dirty_sections.push(key);
        }
        if let Some(slot) = st.regions.get_mut(&target) {
            slot.sections.extend(created.iter().copied());
        }
        if live_created {
            log::trace!(target: LOG, "section {pos} created in region {target}");
        }

        for &other in &mergeable {
            if other != target {
                self.merge_regions(st, other, target)?;
            }
        }
        self.refresh_dead(st, pos);
        self.recount(st, target);

        if let Some(region) = fresh {
            log::debug!(target: LOG, "created region {target} at section {pos}");
            self.call_hook("on_create", || self.hooks.on_create(&region))?;
        }
        Ok(())
    }

    fn remove_cell_locked(
        &self,
        st: &mut Structure,
        x: i32,
        z: i32,
        claimed: &mut Claimed,
    ) -> Result<(), FatalError> {
        let pos = CellPos::new(x, z).section(self.config.section_shift);
        let Some(section) = st.sections.get_mut(&pos.key()) else {
            return Ok(());
        };
        section.live_cells = section.live_cells.saturating_sub(1);
        let emptied = section.live_cells == 0;
        let owner = section.owner;
        let Some(region) = st.regions.get(&owner).map(|s| Arc::clone(&s.region)) else {
            return Ok(());
        };
        region.add_cells(-1);
        if emptied {
            self.refresh_dead(st, pos);
        }
        if region.dead_section_percent() > self.config.max_dead_section_percent
            && region.transition(RegionState::Ready, RegionState::Transient)
        {
            claimed.push(Arc::clone(&region));
            self.compact(st, owner, claimed)?;
        }
        Ok(())
    }

    fn release_locked(
        &self,
        st: &mut Structure,
        id: RegionId,
        claimed: &mut Claimed,
    ) -> Result<(), FatalError> {
        let pending = st
            .regions
            .get_mut(&id)
            .map(|s| std::mem::take(&mut s.pending_merge))
            .unwrap_or(false);
        let survivor = if pending {
            self.merge_neighbours(st, id, claimed)?
        } else {
            id
        };
        let Some(region) = st.regions.get(&survivor).map(|s| Arc::clone(&s.region)) else {
            return Ok(());
        };
        if region.dead_section_percent() > self.config.max_dead_section_percent {
            self.compact(st, survivor, claimed)?;
        }
        Ok(())
    }

    /// Merge `id` with every adjacent region that can be claimed. Returns
    /// the survivor.
    fn merge_neighbours(
        &self,
        st: &mut Structure,
        id: RegionId,
        claimed: &mut Claimed,
    ) -> Result<RegionId, FatalError> {
        let Some(slot) = st.regions.get(&id) else {
            return Ok(id);
        };
        let mut neighbours = Neighbours::new();
        for &key in &slot.sections {
            for n in SectionPos::from_key(key).square(self.config.merge_radius) {
                if let Some(s) = st.sections.get(&n.key()) {
                    if s.owner != id && !neighbours.contains(&s.owner) {
                        neighbours.push(s.owner);
                    }
                }
            }
        }

        let mut group: Neighbours = smallvec![id];
        for other in neighbours {
            let Some(slot) = st.regions.get_mut(&other) else {
                continue;
            };
            if slot.region.transition(RegionState::Ready, RegionState::Transient) {
                claimed.push(Arc::clone(&slot.region));
                group.push(other);
            } else {
                slot.pending_merge = true;
            }
        }

        let survivor = group.iter().copied().min().unwrap_or(id);
        for &other in &group {
            if other != survivor {
                self.merge_regions(st, other, survivor)?;
            }
        }
        Ok(survivor)
    }

    fn create_region(&self, st: &mut Structure, tick: u64) -> Arc<Region> {
        let id = RegionId(st.next_id);
        st.next_id += 1;
        let data = RegionData::new(id, Arc::clone(&self.registry));
        let region = Arc::new(Region::new(id, tick, data));
        st.regions.insert(
            id,
            RegionSlot {
                region: Arc::clone(&region),
                sections: IndexSet::new(),
                pending_merge: false,
            },
        );
        st.dirty_regions.push(id);
        region
    }

    /// Fold `from` into `into`. Both must be claimed.
    fn merge_regions(
        &self,
        st: &mut Structure,
        from: RegionId,
        into: RegionId,
    ) -> Result<(), FatalError> {
        let Some(from_slot) = st.regions.swap_remove(&from) else {
            return Ok(());
        };
        let Some(into_slot) = st.regions.get_mut(&into) else {
            return Ok(());
        };
        for &key in &from_slot.sections {
            if let Some(s) = st.sections.get_mut(&key) {
                s.owner = into;
            }
            into_slot.sections.insert(key);
            st.dirty_sections.push(key);
        }
        into_slot.pending_merge |= from_slot.pending_merge;
        let into_region = Arc::clone(&into_slot.region);
        let from_region = from_slot.region;

        let tick_offset = into_region.tick().wrapping_sub(from_region.tick()) as i64;
        let from_data = from_region.replace_data(RegionData::new(from, Arc::clone(&self.registry)));
        from_data.merge_into(&mut into_region.data(), tick_offset)?;
        for task in from_region.take_tasks() {
            into_region.push_task(task);
        }
        self.call_hook("on_merge", || self.hooks.on_merge(&from_region, &into_region))?;

        from_region.set_counts(0, 0, 0);
        from_region.set_state(RegionState::Dead);
        st.dirty_regions.push(from);
        self.recount(st, into);
        log::debug!(target: LOG, "merged region {from} into {into} (tick offset {tick_offset})");
        Ok(())
    }

    /// Prune dead sections of claimed region `id`, then destroy or split
    /// it as needed.
    fn compact(
        &self,
        st: &mut Structure,
        id: RegionId,
        claimed: &mut Claimed,
    ) -> Result<(), FatalError> {
        let Some(slot) = st.regions.get_mut(&id) else {
            return Ok(());
        };
        let dead: Vec<u64> = slot
            .sections
            .iter()
            .copied()
            .filter(|k| st.sections.get(k).is_some_and(|s| s.dead))
            .collect();
        for key in &dead {
            slot.sections.swap_remove(key);
            st.sections.remove(key);
            st.dirty_sections.push(*key);
        }
        let components = if slot.sections.is_empty() {
            Vec::new()
        } else {
            self.components(&slot.sections)
        };
        log::trace!(target: LOG, "compacted region {id}: pruned {} dead sections", dead.len());

        match components.len() {
            0 => self.destroy_region(st, id),
            1 => {
                self.recount(st, id);
                Ok(())
            }
            _ => self.split_region(st, id, components, claimed),
        }
    }

    /// Connected components of `sections` under the merge-radius
    /// adjacency, in first-seen order.
    fn components(&self, sections: &IndexSet<u64>) -> Vec<Vec<u64>> {
        let mut seen: HashSet<u64> = HashSet::with_capacity(sections.len());
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        for &start in sections {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start];
            queue.push_back(start);
            while let Some(key) = queue.pop_front() {
                for n in SectionPos::from_key(key).square(self.config.merge_radius) {
                    let nk = n.key();
                    if sections.contains(&nk) && seen.insert(nk) {
                        component.push(nk);
                        queue.push_back(nk);
                    }
                }
            }
            out.push(component);
        }
        out
    }

    fn destroy_region(&self, st: &mut Structure, id: RegionId) -> Result<(), FatalError> {
        let Some(slot) = st.regions.swap_remove(&id) else {
            return Ok(());
        };
        for key in &slot.sections {
            st.sections.remove(key);
            st.dirty_sections.push(*key);
        }
        st.dirty_regions.push(id);
        slot.region.set_counts(0, 0, 0);
        self.call_hook("on_destroy", || self.hooks.on_destroy(&slot.region))?;
        slot.region.set_state(RegionState::Dead);
        log::debug!(target: LOG, "destroyed empty region {id}");
        Ok(())
    }

    fn split_region(
        &self,
        st: &mut Structure,
        parent_id: RegionId,
        components: Vec<Vec<u64>>,
        claimed: &mut Claimed,
    ) -> Result<(), FatalError> {
        let Some(parent_slot) = st.regions.swap_remove(&parent_id) else {
            return Ok(());
        };
        let parent = parent_slot.region;
        let shift = self.config.section_shift;
        let tick = parent.tick();

        let mut routing: HashMap<u64, usize> = HashMap::new();
        let mut children: Vec<Arc<Region>> = Vec::with_capacity(components.len());
        for (idx, component) in components.into_iter().enumerate() {
            let child = self.create_region(st, tick);
            let child_id = child.id();
            for &key in &component {
                routing.insert(key, idx);
                if let Some(s) = st.sections.get_mut(&key) {
                    s.owner = child_id;
                }
                st.dirty_sections.push(key);
            }
            if let Some(slot) = st.regions.get_mut(&child_id) {
                slot.sections = component.into_iter().collect();
            }
            self.recount(st, child_id);
            claimed.push(Arc::clone(&child));
            children.push(child);
        }

        let parent_data = parent.replace_data(RegionData::new(parent_id, Arc::clone(&self.registry)));
        let mut child_data: Vec<RegionData> = children
            .iter()
            .map(|c| RegionData::new(c.id(), Arc::clone(&self.registry)))
            .collect();
        parent_data.split_into(shift, &routing, &mut child_data)?;
        for (child, data) in children.iter().zip(child_data) {
            child.replace_data(data);
        }

        for task in parent.take_tasks() {
            if let Some(&idx) = routing.get(&task.section_key(shift)) {
                children[idx].push_task(task);
            }
        }

        let layout = SplitLayout::new(shift, &routing);
        self.call_hook("on_split", || self.hooks.on_split(&parent, &children, &layout))?;

        parent.set_counts(0, 0, 0);
        parent.set_state(RegionState::Dead);
        st.dirty_regions.push(parent_id);
        log::debug!(
            target: LOG,
            "split region {parent_id} into {:?}",
            children.iter().map(|c| c.id().0).collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Recompute dead flags of every section within the empty-section
    /// radius of `around`, adjusting owner dead counts.
    fn refresh_dead(&self, st: &mut Structure, around: SectionPos) {
        let radius = self.config.empty_section_create_radius;
        for n in around.square(radius) {
            let key = n.key();
            let Some(section) = st.sections.get(&key) else {
                continue;
            };
            let dead = section.live_cells == 0 && !has_live_within(&st.sections, n, radius);
            if dead == section.dead {
                continue;
            }
            let owner = section.owner;
            if let Some(s) = st.sections.get_mut(&key) {
                s.dead = dead;
            }
            if let Some(slot) = st.regions.get(&owner) {
                slot.region.add_dead_sections(if dead { 1 } else { -1 });
            }
        }
    }

    fn recount(&self, st: &Structure, id: RegionId) {
        let Some(slot) = st.regions.get(&id) else {
            return;
        };
        let (mut cells, mut dead) = (0u64, 0u64);
        for key in &slot.sections {
            if let Some(s) = st.sections.get(key) {
                cells += u64::from(s.live_cells);
                dead += u64::from(s.dead);
            }
        }
        slot.region
            .set_counts(cells, slot.sections.len() as u64, dead);
    }

    fn call_hook(
        &self,
        hook: &'static str,
        f: impl FnOnce() -> Result<(), FatalError>,
    ) -> Result<(), FatalError> {
        catch_unwind(AssertUnwindSafe(f)).map_err(|_| FatalError::HookPanicked { hook })?
    }
}

fn has_live_within(sections: &HashMap<u64, Section>, pos: SectionPos, radius: i32) -> bool {
    pos.square(radius)
        .any(|n| sections.get(&n.key()).is_some_and(|s| s.live_cells > 0))
}

impl fmt::Debug for Regionizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("Regionizer")
            .field("cells", &st.cells.len())
            .field("sections", &st.sections.len())
            .field("regions", &st.regions.len())
            .field("poisoned", &st.poison.is_some())
            .finish()
    }
}
