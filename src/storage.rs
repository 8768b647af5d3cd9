// Storage buffer: the single heap allocation backing a table.
//
// One allocation holds, in order: a `Header` (capacity + refcount), the
// control-byte run, then the entry run. `RawStorage` is a handle to that
// allocation; cloning it bumps the refcount rather than copying bytes —
// the fork-on-write happens one layer up, in `crate::raw`, where the
// table decides whether a mutation needs a private copy first.
//
// The refcount is a plain `Cell<usize>`, not an atomic. That's
// deliberate: this type has no business being shared across threads, and
// `Cell` makes it `!Sync` for free instead of relying on a marker.

use crate::error::{Result, TableError};
use crate::probe::{is_occupied, EMPTY, GROUP_SIZE};
use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::{self, NonNull};

#[repr(C)]
struct Header {
    refcount: Cell<usize>,
}

/// A single key-value slot. Only the slots whose control byte marks them
/// occupied hold a live `Entry` — the rest are uninitialized memory.
///
/// Carries the key's 64-bit hash alongside the key and value, per §3's
/// data model — rehashing an entry during growth or a COW fork reuses
/// this stored hash instead of asking the caller to recompute it.
pub struct Entry<K, V> {
    pub hash: u64,
    pub key: K,
    pub value: V,
}

/// Handle to a (possibly shared) storage allocation.
///
/// Holds `capacity` control bytes followed by `capacity` entry slots,
/// both reachable from a header carrying the allocation's own refcount.
/// `capacity` is always a power of two and a multiple of `GROUP_SIZE`.
pub struct RawStorage<K, V> {
    header: NonNull<Header>,
    ctrl: NonNull<u8>,
    entries: NonNull<Entry<K, V>>,
    capacity: usize,
}

// No `unsafe impl Send` here, deliberately: the refcount is a plain
// `Cell<usize>`, not an atomic, so two handles produced by `share()`
// racing their `Drop`/`share()` calls on different threads is a real
// data race, not just a logical one. `NonNull`'s own `!Send`/`!Sync`
// auto-traits are exactly the right default — the same reason
// `std::rc::Rc` is `!Send` while `std::sync::Arc` is not.

fn layout_for<K, V>(capacity: usize) -> Result<(Layout, usize, usize)> {
    let header_layout = Layout::new::<Header>();
    let ctrl_layout =
        Layout::array::<u8>(capacity).map_err(|_| TableError::CapacityOverflow)?;
    let entries_layout =
        Layout::array::<Entry<K, V>>(capacity).map_err(|_| TableError::CapacityOverflow)?;

    let (layout, ctrl_offset) = header_layout
        .extend(ctrl_layout)
        .map_err(|_| TableError::CapacityOverflow)?;
    let (layout, entries_offset) = layout
        .extend(entries_layout)
        .map_err(|_| TableError::CapacityOverflow)?;

    Ok((layout.pad_to_align(), ctrl_offset, entries_offset))
}

impl<K, V> RawStorage<K, V> {
    /// Allocate a fresh storage buffer with every control byte `EMPTY`.
    pub fn allocate(capacity: usize) -> Result<Self> {
        debug_assert!(capacity % GROUP_SIZE == 0);
        let (layout, ctrl_offset, entries_offset) = layout_for::<K, V>(capacity)?;

        let raw = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(raw).ok_or(TableError::AllocationFailed { capacity })?;

        let header = base.cast::<Header>();
        let ctrl = unsafe { NonNull::new_unchecked(base.as_ptr().add(ctrl_offset)) };
        let entries = unsafe {
            NonNull::new_unchecked(base.as_ptr().add(entries_offset) as *mut Entry<K, V>)
        };

        unsafe {
            ptr::write(
                header.as_ptr(),
                Header {
                    refcount: Cell::new(1),
                },
            );
            ptr::write_bytes(ctrl.as_ptr(), EMPTY, capacity);
        }

        Ok(Self {
            header,
            ctrl,
            entries,
            capacity,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn ctrl(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ctrl.as_ptr(), self.capacity) }
    }

    #[inline]
    pub fn ctrl_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ctrl.as_ptr(), self.capacity) }
    }

    /// Raw pointer to the entry run, for iterators that hand out
    /// multiple disjoint `&mut` borrows into it (`IterMut` can't do that
    /// through `entry_mut`'s `&mut self` signature).
    #[inline]
    pub(crate) fn entries_ptr(&mut self) -> *mut Entry<K, V> {
        self.entries.as_ptr()
    }

    /// Read the entry at `index`. Caller must know the slot is occupied.
    #[inline]
    pub unsafe fn entry(&self, index: usize) -> &Entry<K, V> {
        &*self.entries.as_ptr().add(index)
    }

    #[inline]
    pub unsafe fn entry_mut(&mut self, index: usize) -> &mut Entry<K, V> {
        &mut *self.entries.as_ptr().add(index)
    }

    #[inline]
    pub unsafe fn write_entry(&mut self, index: usize, entry: Entry<K, V>) {
        ptr::write(self.entries.as_ptr().add(index), entry);
    }

    #[inline]
    pub unsafe fn read_entry(&mut self, index: usize) -> Entry<K, V> {
        ptr::read(self.entries.as_ptr().add(index))
    }

    #[inline]
    pub unsafe fn drop_entry(&mut self, index: usize) {
        ptr::drop_in_place(self.entries.as_ptr().add(index));
    }

    /// Is this allocation referenced by exactly one handle?
    #[inline]
    pub fn is_unique(&self) -> bool {
        unsafe { self.header.as_ref().refcount.get() == 1 }
    }

    /// Clone the handle (refcount bump, no allocation or copying).
    pub fn share(&self) -> Self {
        let refcount = unsafe { &self.header.as_ref().refcount };
        refcount.set(refcount.get() + 1);
        Self {
            header: self.header,
            ctrl: self.ctrl,
            entries: self.entries,
            capacity: self.capacity,
        }
    }
}

impl<K, V> Drop for RawStorage<K, V> {
    fn drop(&mut self) {
        let refcount = unsafe { &self.header.as_ref().refcount };
        let remaining = refcount.get() - 1;
        refcount.set(remaining);
        if remaining > 0 {
            return;
        }

        for i in 0..self.capacity {
            if is_occupied(self.ctrl()[i]) {
                unsafe { self.drop_entry(i) };
            }
        }

        let (layout, _, _) = layout_for::<K, V>(self.capacity)
            .expect("layout recomputation must match original allocation");
        unsafe {
            alloc::dealloc(self.header.as_ptr() as *mut u8, layout);
        }
    }
}
