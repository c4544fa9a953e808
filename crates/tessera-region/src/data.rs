//! Region-local data: typed per-region state with merge and split callbacks.
//!
//! A [`DataRegistry`] is built once at startup and shared by every region
//! of a world. Each registered kind gets a [`DataKindId`] that doubles as
//! the slot index inside every [`RegionData`] table, so instance lookup is
//! a vector index plus a downcast.
//!
//! Merge and split callbacks run under the regionizer's structural lock.
//! They must be non-blocking and must not panic: a panic escaping a
//! callback is converted into [`FatalError::CallbackPanicked`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_core::coord::section_key_of;
use tessera_core::{CallbackPhase, DataKindId, FatalError, RegionId};

type Erased = Box<dyn Any + Send>;
type CreateFn = Box<dyn Fn(RegionId) -> Erased + Send + Sync>;
type MergeFn = Box<dyn Fn(Erased, &mut Erased, i64) -> Result<(), FatalError> + Send + Sync>;
type SplitFn = Box<
    dyn Fn(Erased, u32, &HashMap<u64, usize>, &mut [&mut Erased]) -> Result<(), FatalError>
        + Send
        + Sync,
>;

static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(1);

// ── RegionLocal ────────────────────────────────────────────────────

/// A type that can live as region-local data.
///
/// Implementors are registered with [`DataRegistryBuilder::register`].
/// Types that cannot implement this trait (foreign types, or kinds that
/// need captured configuration) can be registered with
/// [`DataRegistryBuilder::register_fn`] instead.
pub trait RegionLocal: Send + Sized + 'static {
    /// Build a fresh value for `region`.
    fn create(region: RegionId) -> Self;

    /// Fold `self` (the dying region's value) into `into`.
    ///
    /// `tick_offset` is `into_tick - from_tick`: add it to any absolute
    /// tick deadline recorded in `self` to express it in `into`'s time base.
    fn merge(self, into: &mut Self, tick_offset: i64);

    /// Redistribute `self` across the regions produced by a split.
    ///
    /// Every child shares the parent's tick counter, so no offset applies.
    fn split(self, shift: u32, targets: &mut SplitTargets<'_, Self>);
}

// ── SplitTargets ───────────────────────────────────────────────────

/// The fresh per-child instances a split callback distributes into.
///
/// Instances are addressed by section key (a cell coordinate shifted
/// right by the section shift) or directly by cell coordinate.
pub struct SplitTargets<'a, T> {
    shift: u32,
    section_to_target: &'a HashMap<u64, usize>,
    targets: Vec<&'a mut T>,
}

impl<'a, T> SplitTargets<'a, T> {
    /// Build a target set. `section_to_target` maps each section key to
    /// an index into `targets`.
    pub fn new(
        shift: u32,
        section_to_target: &'a HashMap<u64, usize>,
        targets: Vec<&'a mut T>,
    ) -> Self {
        Self {
            shift,
            section_to_target,
            targets,
        }
    }

    /// Section shift in effect for this split.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Number of child instances.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether there are no child instances.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Index of the child that owns `section_key`, if any.
    pub fn index_of_section(&self, section_key: u64) -> Option<usize> {
        self.section_to_target.get(&section_key).copied()
    }

    /// Instance of the child that owns `section_key`.
    pub fn for_section(&mut self, section_key: u64) -> Option<&mut T> {
        let idx = self.index_of_section(section_key)?;
        self.targets.get_mut(idx).map(|t| &mut **t)
    }

    /// Instance of the child that owns the section holding cell `(x, z)`.
    pub fn for_cell(&mut self, x: i32, z: i32) -> Option<&mut T> {
        self.for_section(section_key_of(x, z, self.shift))
    }

    /// Instance at child index `idx`.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.targets.get_mut(idx).map(|t| &mut **t)
    }

    /// Iterate every child instance.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + use<'_, 'a, T> {
        self.targets.iter_mut().map(|t| &mut **t)
    }
}

// ── DataKind ───────────────────────────────────────────────────────

/// Typed handle to a registered region-local data kind.
pub struct DataKind<T> {
    id: DataKindId,
    registry: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataKind<T> {
    /// The kind's id within its registry.
    pub fn id(&self) -> DataKindId {
        self.id
    }
}

impl<T> Clone for DataKind<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DataKind<T> {}

impl<T> fmt::Debug for DataKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKind").field("id", &self.id).finish()
    }
}

// ── DataRegistry ───────────────────────────────────────────────────

struct KindEntry {
    name: String,
    type_id: TypeId,
    create: CreateFn,
    merge: MergeFn,
    split: SplitFn,
}

/// Immutable, process-lifetime table of region-local data kinds.
pub struct DataRegistry {
    id: u64,
    kinds: Vec<KindEntry>,
}

impl DataRegistry {
    /// Start building a registry.
    pub fn builder() -> DataRegistryBuilder {
        DataRegistryBuilder {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            kinds: Vec::new(),
        }
    }

    /// A registry with no kinds.
    pub fn empty() -> Arc<Self> {
        Self::builder().build()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Registered name of `kind`.
    pub fn name(&self, kind: DataKindId) -> Option<&str> {
        self.kinds.get(kind.0 as usize).map(|k| k.name.as_str())
    }

    fn entry<T: 'static>(&self, kind: &DataKind<T>) -> &KindEntry {
        assert_eq!(
            kind.registry, self.id,
            "data kind {} belongs to a different registry",
            kind.id
        );
        let entry = &self.kinds[kind.id.0 as usize];
        debug_assert_eq!(entry.type_id, TypeId::of::<T>());
        entry
    }
}

impl fmt::Debug for DataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRegistry")
            .field("kinds", &self.kinds.iter().map(|k| &k.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`DataRegistry`].
pub struct DataRegistryBuilder {
    id: u64,
    kinds: Vec<KindEntry>,
}

impl DataRegistryBuilder {
    /// Register a [`RegionLocal`] type.
    pub fn register<T: RegionLocal>(&mut self, name: impl Into<String>) -> DataKind<T> {
        self.register_fn(name, T::create, T::merge, T::split)
    }

    /// Register a kind from explicit create/merge/split functions.
    pub fn register_fn<T, C, M, S>(
        &mut self,
        name: impl Into<String>,
        create: C,
        merge: M,
        split: S,
    ) -> DataKind<T>
    where
        T: Send + 'static,
        C: Fn(RegionId) -> T + Send + Sync + 'static,
        M: Fn(T, &mut T, i64) + Send + Sync + 'static,
        S: Fn(T, u32, &mut SplitTargets<'_, T>) + Send + Sync + 'static,
    {
        let name = name.into();
        let id = DataKindId(self.kinds.len() as u32);

        let merge_name = name.clone();
        let erased_merge: MergeFn = Box::new(move |from, into, offset| {
            let mismatch = || FatalError::KindMismatch {
                kind: merge_name.clone(),
            };
            let from = from.downcast::<T>().map_err(|_| mismatch())?;
            let into = into.downcast_mut::<T>().ok_or_else(mismatch)?;
            merge(*from, into, offset);
            Ok(())
        });

        let split_name = name.clone();
        let erased_split: SplitFn = Box::new(move |from, shift, routing, children| {
            let mismatch = || FatalError::KindMismatch {
                kind: split_name.clone(),
            };
            let from = from.downcast::<T>().map_err(|_| mismatch())?;
            let mut typed = Vec::with_capacity(children.len());
            for child in children.iter_mut() {
                typed.push(child.downcast_mut::<T>().ok_or_else(mismatch)?);
            }
            let mut targets = SplitTargets::new(shift, routing, typed);
            split(*from, shift, &mut targets);
            Ok(())
        });

        self.kinds.push(KindEntry {
            name,
            type_id: TypeId::of::<T>(),
            create: Box::new(move |region| Box::new(create(region))),
            merge: erased_merge,
            split: erased_split,
        });

        DataKind {
            id,
            registry: self.id,
            _marker: PhantomData,
        }
    }

    /// Freeze the registry.
    pub fn build(self) -> Arc<DataRegistry> {
        Arc::new(DataRegistry {
            id: self.id,
            kinds: self.kinds,
        })
    }
}

// ── RegionData ─────────────────────────────────────────────────────

/// One region's table of region-local data instances, indexed by kind id.
pub struct RegionData {
    region: RegionId,
    registry: Arc<DataRegistry>,
    slots: Vec<Option<Erased>>,
}

impl RegionData {
    /// An empty table for `region`. Instances are created on first access.
    pub fn new(region: RegionId, registry: Arc<DataRegistry>) -> Self {
        let slots = (0..registry.len()).map(|_| None).collect();
        Self {
            region,
            registry,
            slots,
        }
    }

    /// The owning region.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// The registry this table was built from.
    pub fn registry(&self) -> &Arc<DataRegistry> {
        &self.registry
    }

    /// Whether an instance of `kind` exists.
    pub fn contains(&self, kind: DataKindId) -> bool {
        matches!(self.slots.get(kind.0 as usize), Some(Some(_)))
    }

    /// Number of instantiated kinds.
    pub fn instantiated(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The instance of `kind`, if it has been created.
    pub fn get<T: 'static>(&self, kind: &DataKind<T>) -> Option<&T> {
        self.registry.entry(kind);
        self.slots[kind.id.0 as usize]
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutable access to the instance of `kind`, if it has been created.
    pub fn get_mut<T: 'static>(&mut self, kind: &DataKind<T>) -> Option<&mut T> {
        self.registry.entry(kind);
        self.slots[kind.id.0 as usize]
            .as_mut()
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// The instance of `kind`, created through the kind's factory on first
    /// access.
    ///
    /// Intended for the region's own tick thread; a concurrent merge or
    /// split may replace or discard the instance.
    ///
    /// # Panics
    ///
    /// Panics if `kind` was registered with a different registry.
    pub fn get_or_create<T: 'static>(&mut self, kind: &DataKind<T>) -> &mut T {
        let entry = self.registry.entry(kind);
        let region = self.region;
        let slot = self.slots[kind.id.0 as usize].get_or_insert_with(|| (entry.create)(region));
        match slot.downcast_mut::<T>() {
            Some(v) => v,
            None => panic!("data kind '{}' holds a value of the wrong type", entry.name),
        }
    }

    /// Fold every instance in `self` into `into`, creating missing
    /// instances on `into` first.
    pub(crate) fn merge_into(self, into: &mut RegionData, tick_offset: i64) -> Result<(), FatalError> {
        let registry = Arc::clone(&self.registry);
        for (idx, slot) in self.slots.into_iter().enumerate() {
            let Some(from) = slot else { continue };
            let entry = &registry.kinds[idx];
            let region = into.region;
            let slot = &mut into.slots[idx];
            if slot.is_none() {
                *slot = Some(guard(entry, CallbackPhase::Create, || (entry.create)(region))?);
            }
            let Some(target) = slot.as_mut() else { continue };
            guard(entry, CallbackPhase::Merge, || (entry.merge)(from, target, tick_offset))??;
        }
        Ok(())
    }

    /// Distribute every instance in `self` across `children`.
    ///
    /// `routing` maps section keys to indices into `children`.
    pub(crate) fn split_into(
        self,
        shift: u32,
        routing: &HashMap<u64, usize>,
        children: &mut [RegionData],
    ) -> Result<(), FatalError> {
        let registry = Arc::clone(&self.registry);
        for (idx, slot) in self.slots.into_iter().enumerate() {
            let Some(from) = slot else { continue };
            let entry = &registry.kinds[idx];
            let mut targets: Vec<&mut Erased> = Vec::with_capacity(children.len());
            for child in children.iter_mut() {
                let region = child.region;
                let slot = &mut child.slots[idx];
                if slot.is_none() {
                    *slot = Some(guard(entry, CallbackPhase::Create, || (entry.create)(region))?);
                }
                if let Some(target) = slot.as_mut() {
                    targets.push(target);
                }
            }
            guard(entry, CallbackPhase::Split, || {
                (entry.split)(from, shift, routing, targets.as_mut_slice())
            })??;
        }
        Ok(())
    }
}

impl fmt::Debug for RegionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionData")
            .field("region", &self.region)
            .field("instantiated", &self.instantiated())
            .finish()
    }
}

fn guard<R>(entry: &KindEntry, phase: CallbackPhase, f: impl FnOnce() -> R) -> Result<R, FatalError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|_| FatalError::CallbackPanicked {
        kind: entry.name.clone(),
        phase,
    })
}
