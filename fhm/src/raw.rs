//! Unsafe table internals: a single heap allocation holding the control
//! byte array (with its `GROUP_WIDTH - 1` mirrored tail) followed by the
//! (possibly uninitialized) slot array. Everything above `RawTable` is
//! safe; this module is where the invariants from the data model (§3.1)
//! are actually upheld.

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::group::{ActiveGroup, Group, EMPTY, GROUP_WIDTH, TOMBSTONE};

/// Smallest capacity a non-empty table is ever allocated at. Doubling
/// from zero has no natural starting point, so the first real
/// allocation jumps straight here (see §3.1: "capacity ... >= 128 after
/// first allocation").
const MIN_CAPACITY: usize = 128;

#[inline]
fn round_up_capacity(requested: usize) -> usize {
    if requested == 0 {
        return 0;
    }
    requested.next_power_of_two().max(MIN_CAPACITY)
}

struct ProbeSeq {
    pos: usize,
    stride: usize,
}

impl ProbeSeq {
    #[inline]
    fn move_next(&mut self, mask: usize) {
        self.stride += GROUP_WIDTH;
        self.pos = (self.pos + self.stride) & mask;
        debug_assert!(
            self.stride <= mask + 1,
            "probe sequence did not terminate within the table"
        );
    }
}

pub(crate) struct RawTable<K, V> {
    /// Base of the single allocation: `ctrl_len()` control bytes
    /// (including the mirrored tail), immediately followed (after
    /// alignment padding) by `capacity` slots. Dangling, never
    /// dereferenced, while `capacity == 0`.
    ctrl: NonNull<u8>,
    slots: NonNull<MaybeUninit<(K, V)>>,
    capacity: usize,
    pub(crate) size: usize,
    pub(crate) growth_left: usize,
    pub(crate) has_tombstones: bool,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> RawTable<K, V> {
    fn ctrl_len(capacity: usize) -> usize {
        capacity + GROUP_WIDTH - 1
    }

    fn layout_for(capacity: usize) -> (Layout, usize) {
        let ctrl_layout = Layout::array::<u8>(Self::ctrl_len(capacity)).expect("ctrl layout");
        let slots_layout =
            Layout::array::<MaybeUninit<(K, V)>>(capacity).expect("slots layout");
        let (combined, slots_offset) = ctrl_layout
            .extend(slots_layout)
            .expect("flat hash map capacity overflow");
        (combined.pad_to_align(), slots_offset)
    }

    pub(crate) fn new() -> Self {
        RawTable {
            ctrl: NonNull::dangling(),
            slots: NonNull::dangling(),
            capacity: 0,
            size: 0,
            growth_left: 0,
            has_tombstones: false,
            _marker: PhantomData,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocates a fresh table of exactly `capacity` (already rounded,
    /// already a power of two, 0 or >= `MIN_CAPACITY`), all control
    /// bytes `EMPTY`.
    fn allocate(capacity: usize) -> (NonNull<u8>, NonNull<MaybeUninit<(K, V)>>) {
        debug_assert!(capacity == 0 || capacity.is_power_of_two());
        if capacity == 0 {
            return (NonNull::dangling(), NonNull::dangling());
        }
        let (layout, slots_offset) = Self::layout_for(capacity);
        // CHECK (not DCHECK): required even in release builds, this is
        // the one allocation-time failure mode the design calls Fatal.
        assert!(
            layout.size() < isize::MAX as usize,
            "flat hash map capacity {} overflows the address space",
            capacity
        );
        let raw = unsafe { alloc::alloc(layout) };
        let ctrl = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        unsafe {
            std::ptr::write_bytes(ctrl.as_ptr(), EMPTY, Self::ctrl_len(capacity));
        }
        let slots = unsafe {
            NonNull::new_unchecked(ctrl.as_ptr().add(slots_offset) as *mut MaybeUninit<(K, V)>)
        };
        (ctrl, slots)
    }

    fn deallocate(&mut self) {
        if self.capacity == 0 {
            return;
        }
        let (layout, _) = Self::layout_for(self.capacity);
        unsafe {
            alloc::dealloc(self.ctrl.as_ptr(), layout);
        }
    }

    #[inline]
    unsafe fn set_ctrl(&mut self, idx: usize, ctrl: u8) {
        debug_assert!(idx < self.capacity);
        *self.ctrl.as_ptr().add(idx) = ctrl;
        // Invariant: the last GROUP_WIDTH - 1 control bytes mirror the
        // first GROUP_WIDTH - 1, so a group load straddling the end of
        // the array still sees consistent data.
        if idx < GROUP_WIDTH - 1 {
            *self.ctrl.as_ptr().add(self.capacity + idx) = ctrl;
        }
    }

    #[inline]
    fn probe_seq(&self, hash: u64) -> ProbeSeq {
        ProbeSeq {
            pos: (hash >> 7) as usize & (self.capacity - 1),
            stride: 0,
        }
    }

    #[inline]
    pub(crate) unsafe fn slot(&self, idx: usize) -> &(K, V) {
        (*self.slots.as_ptr().add(idx)).assume_init_ref()
    }

    #[inline]
    pub(crate) unsafe fn slot_mut(&mut self, idx: usize) -> &mut (K, V) {
        (*self.slots.as_ptr().add(idx)).assume_init_mut()
    }

    /// Finds the index of a key equal under `eq`, if present, else the
    /// first Empty-or-Tombstone slot along the probe sequence for a
    /// fresh insert. Subsumes "FindFirstNonFull": when the table holds
    /// no tombstones this naturally degenerates to "first Empty",
    /// which is exactly the fast path the design calls out.
    pub(crate) fn find_or_prepare_insert(
        &self,
        hash: u64,
        mut eq: impl FnMut(&K) -> bool,
    ) -> Result<usize, usize> {
        if self.capacity == 0 {
            return Err(usize::MAX); // caller must grow before using this
        }
        let h2 = (hash & 0x7F) as u8;
        let mask = self.capacity - 1;
        let mut probe = self.probe_seq(hash);
        let mut first_nonfull: Option<usize> = None;
        loop {
            let group = unsafe { ActiveGroup::load(self.ctrl.as_ptr().add(probe.pos)) };
            for bit in group.match_byte(h2) {
                let idx = (probe.pos + bit) & mask;
                let slot = unsafe { self.slot(idx) };
                if eq(&slot.0) {
                    return Ok(idx);
                }
            }
            if first_nonfull.is_none() {
                if let Some(bit) = group.match_empty_or_deleted().lowest_set_bit() {
                    first_nonfull = Some((probe.pos + bit) & mask);
                }
            }
            if group.match_empty().any_bit_set() {
                return Err(first_nonfull.expect("empty lane implies a non-full slot exists"));
            }
            probe.move_next(mask);
        }
    }

    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(&K) -> bool) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        let h2 = (hash & 0x7F) as u8;
        let mask = self.capacity - 1;
        let mut probe = self.probe_seq(hash);
        loop {
            let group = unsafe { ActiveGroup::load(self.ctrl.as_ptr().add(probe.pos)) };
            for bit in group.match_byte(h2) {
                let idx = (probe.pos + bit) & mask;
                let slot = unsafe { self.slot(idx) };
                if eq(&slot.0) {
                    return Some(idx);
                }
            }
            if group.match_empty().any_bit_set() {
                return None;
            }
            probe.move_next(mask);
        }
    }

    /// Writes `(k, v)` into `idx`, which must be the result of a prior
    /// `Err(idx)` from `find_or_prepare_insert`. Updates `growth_left`
    /// only when reclaiming an `Empty` slot, per §3.1.
    ///
    /// # Safety
    /// `idx` must be a currently-non-full slot index in bounds.
    pub(crate) unsafe fn insert_at(&mut self, idx: usize, hash: u64, key: K, value: V) {
        let was_empty = *self.ctrl.as_ptr().add(idx) == EMPTY;
        self.set_ctrl(idx, (hash & 0x7F) as u8);
        self.slots.as_ptr().add(idx).write(MaybeUninit::new((key, value)));
        self.size += 1;
        if was_empty {
            self.growth_left -= 1;
        }
    }

    /// Marks `idx` as a tombstone and returns its former `(K, V)`.
    ///
    /// # Safety
    /// `idx` must currently hold a live value.
    pub(crate) unsafe fn remove_at(&mut self, idx: usize) -> (K, V) {
        let value = self.slots.as_ptr().add(idx).read().assume_init();
        self.set_ctrl(idx, TOMBSTONE);
        self.size -= 1;
        self.has_tombstones = true;
        value
    }

    fn set_growth_left_for(&mut self, capacity: usize, load_limit_pct: u8) {
        let limit = capacity * load_limit_pct as usize / 100;
        self.growth_left = limit.saturating_sub(self.size);
    }

    /// Grows to at least `min_capacity` live slots of headroom,
    /// rehashing every live element into a fresh allocation. Tombstones
    /// are not carried forward: after a grow, `has_tombstones` is
    /// false.
    pub(crate) fn grow(
        &mut self,
        load_limit_pct: u8,
        min_capacity: usize,
        mut hash_of: impl FnMut(&K) -> u64,
    ) {
        let new_capacity = round_up_capacity(min_capacity.max(self.capacity.saturating_mul(2)));
        let (new_ctrl, new_slots) = Self::allocate(new_capacity);
        let mut new_table = RawTable {
            ctrl: new_ctrl,
            slots: new_slots,
            capacity: new_capacity,
            size: 0,
            growth_left: 0,
            has_tombstones: false,
            _marker: PhantomData,
        };

        if self.capacity > 0 {
            for idx in 0..self.capacity {
                let ctrl = unsafe { *self.ctrl.as_ptr().add(idx) };
                if ctrl == EMPTY || ctrl == TOMBSTONE {
                    continue;
                }
                let (k, v) = unsafe { self.slots.as_ptr().add(idx).read().assume_init() };
                let hash = hash_of(&k);
                let insert_idx = match new_table.find_or_prepare_insert(hash, |_| false) {
                    Ok(_) => unreachable!("fresh table cannot already contain the key"),
                    Err(idx) => idx,
                };
                unsafe { new_table.insert_at(insert_idx, hash, k, v) };
            }
        }
        new_table.set_growth_left_for(new_capacity, load_limit_pct);

        self.deallocate();
        *self = new_table;
        tracing::debug!(new_capacity, "flat hash map grew");
    }

    pub(crate) fn reserve(
        &mut self,
        additional: usize,
        load_limit_pct: u8,
        hash_of: impl FnMut(&K) -> u64,
    ) {
        if additional <= self.growth_left {
            return;
        }
        let needed_size = self.size + additional;
        let min_capacity = (needed_size * 100 / load_limit_pct as usize).max(1);
        self.grow(load_limit_pct, min_capacity, hash_of);
    }

    pub(crate) fn ensure_capacity_for_insert(
        &mut self,
        load_limit_pct: u8,
        hash_of: impl FnMut(&K) -> u64,
    ) {
        if self.growth_left == 0 {
            let min_capacity = round_up_capacity(self.capacity.saturating_mul(2).max(1));
            self.grow(load_limit_pct, min_capacity, hash_of);
        }
    }

    /// Destroys every live element and resets control bytes to `EMPTY`
    /// without deallocating, per §3.1's `Clear` contract.
    pub(crate) fn clear(&mut self) {
        if self.capacity == 0 {
            return;
        }
        for idx in 0..self.capacity {
            let ctrl = unsafe { *self.ctrl.as_ptr().add(idx) };
            if ctrl != EMPTY && ctrl != TOMBSTONE {
                unsafe {
                    std::ptr::drop_in_place(self.slots.as_ptr().add(idx) as *mut (K, V));
                }
            }
        }
        unsafe {
            std::ptr::write_bytes(self.ctrl.as_ptr(), EMPTY, Self::ctrl_len(self.capacity));
        }
        self.size = 0;
        self.has_tombstones = false;
    }

    pub(crate) fn iter(&self) -> RawIter<'_, K, V> {
        RawIter {
            table: self,
            idx: 0,
        }
    }
}

impl<K, V> Drop for RawTable<K, V> {
    fn drop(&mut self) {
        self.clear();
        self.deallocate();
    }
}

pub(crate) struct RawIter<'a, K, V> {
    table: &'a RawTable<K, V>,
    idx: usize,
}

impl<'a, K, V> Iterator for RawIter<'a, K, V> {
    type Item = &'a (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.table.capacity {
            let i = self.idx;
            self.idx += 1;
            let ctrl = unsafe { *self.table.ctrl.as_ptr().add(i) };
            if ctrl != EMPTY && ctrl != TOMBSTONE {
                return Some(unsafe { self.table.slot(i) });
            }
        }
        None
    }
}
