//! Indirect heaps.
//!
//! Besides the command stream, a dispatch needs three kinds of GPU-visible state, each in
//! its own heap so the hardware can address it relative to a per-heap base address:
//!
//! - [`HeapType::SurfaceState`]: binding tables and surface states.
//! - [`HeapType::DynamicState`]: interface descriptors, sampler states, and other
//!   dynamic state. Devices without image support have no use for it.
//! - [`HeapType::IndirectObject`]: kernel arguments and other indirect data. It lives in
//!   the internal heap and is addressed relative to the internal heap base, so moving it
//!   to another allocation does not change its base address.
//!
//! An [`IndirectHeap`] is a [`LinearStream`] with a reserved prefix that is skipped every
//! time the heap is rewound or rebound. A [`ReservedIndirectHeap`] is a view over a
//! sub-range of a heap shared between command lists.

use crate::{
    allocation::{Allocation, AllocationType},
    stream::LinearStream,
    utils::memory::PAGE_SIZE,
};

/// Number of pages in a heap addressed relative to a 4 GiB base.
pub const SIZE_OF_4GB_IN_PAGES: u32 = ((4u64 << 30) / PAGE_SIZE as u64) as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum HeapType {
    DynamicState = 0,
    IndirectObject = 1,
    SurfaceState = 2,
}

impl HeapType {
    pub const COUNT: usize = 3;
    pub const ALL: [HeapType; Self::COUNT] = [
        HeapType::DynamicState,
        HeapType::IndirectObject,
        HeapType::SurfaceState,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Allocation type backing heaps of this type.
    pub fn allocation_type(self) -> AllocationType {
        match self {
            HeapType::IndirectObject => AllocationType::InternalHeap,
            _ => AllocationType::LinearStream,
        }
    }

    /// Whether the heap is addressed relative to the internal heap base.
    pub fn is_internal(self) -> bool {
        self == HeapType::IndirectObject
    }
}

/// How kernels address surface and dynamic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeapAddressModel {
    /// Every container owns its surface-state and dynamic-state heaps.
    #[default]
    PrivateHeaps,
    /// Kernels are stateless; no surface-state or dynamic-state heaps exist.
    GlobalStateless,
    /// State lives in a process-wide bindless heap.
    GlobalBindless,
    /// State lives in a process-wide bindful heap.
    GlobalBindful,
}

/// A linear heap over one allocation.
#[derive(Debug)]
pub struct IndirectHeap {
    heap_type: HeapType,
    stream: LinearStream,
    reserved_size: usize,
}

impl IndirectHeap {
    /// Creates a heap spanning the whole allocation.
    pub fn new(heap_type: HeapType, allocation: Allocation) -> Self {
        let size = allocation.size();
        Self {
            heap_type,
            stream: LinearStream::new(allocation, size),
            reserved_size: 0,
        }
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    pub fn allocation(&self) -> &Allocation {
        self.stream.allocation()
    }

    pub fn cpu_base(&self) -> *mut u8 {
        self.stream.cpu_base()
    }

    pub fn used(&self) -> usize {
        self.stream.used()
    }

    pub fn available_space(&self) -> usize {
        self.stream.available_space()
    }

    pub fn max_available_space(&self) -> usize {
        self.stream.max_available_space()
    }

    /// Size of the prefix skipped on every rewind.
    pub fn reserved_size(&self) -> usize {
        self.reserved_size
    }

    /// Reserves the first `size` bytes of the heap and rewinds it past them.
    pub fn set_reserved_size(&mut self, size: usize) {
        self.reserved_size = size;
        self.rewind();
    }

    /// # Panics
    /// If fewer than `size` bytes are available.
    pub fn get_space(&mut self, size: usize) -> *mut u8 {
        self.stream.get_space(size)
    }

    pub fn align(&mut self, alignment: usize) {
        self.stream.align(alignment)
    }

    /// Moves the cursor back to the end of the reserved prefix.
    pub fn rewind(&mut self) {
        self.stream.set_used(self.reserved_size);
    }

    /// Rebinds the heap to `allocation`, which it spans entirely, and rewinds it.
    /// Returns the previous allocation.
    pub fn replace_allocation(&mut self, allocation: Allocation) -> Allocation {
        let size = allocation.size();
        let old = self.stream.replace_allocation(allocation, size);
        self.rewind();
        old
    }

    /// Base address programmed into the hardware for this heap.
    pub fn heap_gpu_base(&self) -> u64 {
        if self.heap_type.is_internal() {
            self.allocation().gpu_base_address()
        } else {
            self.allocation().gpu_address()
        }
    }

    /// Offset of the heap from its base address.
    pub fn heap_gpu_start_offset(&self) -> u64 {
        if self.heap_type.is_internal() {
            self.allocation().gpu_address() - self.allocation().gpu_base_address()
        } else {
            0
        }
    }

    /// Heap size programmed into the hardware, in pages.
    pub fn heap_size_in_pages(&self) -> u32 {
        if self.heap_type.is_internal() {
            SIZE_OF_4GB_IN_PAGES
        } else {
            self.max_available_space().div_ceil(PAGE_SIZE) as u32
        }
    }

    /// Aligns the cursor and carves out `size` bytes. Returns the byte range reserved.
    pub(crate) fn reserve(&mut self, size: usize, alignment: usize) -> std::ops::Range<usize> {
        self.align(alignment);
        let start = self.used();
        self.get_space(size);
        start..self.used()
    }
}

/// A view over a range of a shared heap, owned by whoever asked for the reservation.
///
/// The view is filled in by
/// [`CommandContainer::reserve_space_for_dispatch`](crate::command::CommandContainer::reserve_space_for_dispatch).
/// It reports the CPU base, page count, and allocation of the whole heap, but only the
/// reserved range can be handed out through [`get_space`](Self::get_space).
#[derive(Debug)]
pub struct ReservedIndirectHeap {
    heap_type: HeapType,
    allocation: Option<Allocation>,
    used: usize,
    max_available: usize,
    heap_size_in_pages: u32,
}

impl ReservedIndirectHeap {
    pub fn new(heap_type: HeapType) -> Self {
        Self {
            heap_type,
            allocation: None,
            used: 0,
            max_available: 0,
            heap_size_in_pages: 0,
        }
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    pub fn is_bound(&self) -> bool {
        self.allocation.is_some()
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    /// CPU base of the shared heap, or null when nothing is reserved yet.
    pub fn cpu_base(&self) -> *mut u8 {
        self.allocation
            .as_ref()
            .map_or(std::ptr::null_mut(), |a| a.cpu_ptr())
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn max_available_space(&self) -> usize {
        self.max_available
    }

    pub fn available_space(&self) -> usize {
        self.max_available - self.used
    }

    pub fn heap_size_in_pages(&self) -> u32 {
        self.heap_size_in_pages
    }

    /// # Panics
    /// If fewer than `size` bytes remain in the reservation.
    pub fn get_space(&mut self, size: usize) -> *mut u8 {
        assert!(
            self.used + size <= self.max_available,
            "Reservation overflow: {} bytes requested, {} reserved",
            size,
            self.available_space()
        );
        let ptr = unsafe { self.cpu_base().add(self.used) };
        self.used += size;
        ptr
    }

    pub fn align(&mut self, alignment: usize) {
        let aligned = crate::utils::align_up(self.used, alignment);
        assert!(aligned <= self.max_available, "Reservation overflow while aligning");
        self.used = aligned;
    }

    pub(crate) fn bind(&mut self, heap: &IndirectHeap, range: std::ops::Range<usize>) {
        debug_assert_eq!(heap.heap_type(), self.heap_type);
        self.allocation = Some(heap.allocation().clone());
        self.heap_size_in_pages = heap.heap_size_in_pages();
        self.used = range.start;
        self.max_available = range.end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{allocation::test_allocation, utils::memory::PAGE_SIZE_64K};

    #[test]
    fn test_reserved_prefix_survives_rewind() {
        let alloc = test_allocation(AllocationType::LinearStream, PAGE_SIZE_64K);
        let mut heap = IndirectHeap::new(HeapType::SurfaceState, alloc);
        heap.set_reserved_size(4 * PAGE_SIZE);
        assert_eq!(heap.used(), 4 * PAGE_SIZE);

        heap.get_space(128);
        heap.rewind();
        assert_eq!(heap.used(), 4 * PAGE_SIZE);

        let bigger = test_allocation(AllocationType::LinearStream, 2 * PAGE_SIZE_64K);
        heap.replace_allocation(bigger);
        assert_eq!(heap.used(), 4 * PAGE_SIZE);
        assert_eq!(heap.max_available_space(), 2 * PAGE_SIZE_64K);
    }

    #[test]
    fn test_alignment_padding() {
        let alloc = test_allocation(AllocationType::LinearStream, PAGE_SIZE_64K);
        let mut heap = IndirectHeap::new(HeapType::DynamicState, alloc);
        heap.get_space(16);
        heap.align(32);
        let ptr = heap.get_space(32);
        assert_eq!(ptr as usize % 32, 0);
        assert_eq!(heap.used(), 64);
    }

    #[test]
    fn test_heap_addressing() {
        let alloc = test_allocation(AllocationType::LinearStream, PAGE_SIZE_64K);
        let heap = IndirectHeap::new(HeapType::SurfaceState, alloc.clone());
        assert_eq!(heap.heap_gpu_base(), alloc.gpu_address());
        assert_eq!(heap.heap_gpu_start_offset(), 0);
        assert_eq!(heap.heap_size_in_pages(), 16);

        let ioh = IndirectHeap::new(HeapType::IndirectObject, alloc);
        assert_eq!(ioh.heap_size_in_pages(), SIZE_OF_4GB_IN_PAGES);
    }

    #[test]
    fn test_reservation_view() {
        let alloc = test_allocation(AllocationType::LinearStream, PAGE_SIZE_64K);
        let mut heap = IndirectHeap::new(HeapType::SurfaceState, alloc.clone());
        heap.get_space(3);

        let range = heap.reserve(64, 64);
        assert_eq!(range, 64..128);
        assert_eq!(heap.used(), 128);

        let mut view = ReservedIndirectHeap::new(HeapType::SurfaceState);
        assert!(view.cpu_base().is_null());
        view.bind(&heap, range);
        assert_eq!(view.cpu_base(), heap.cpu_base());
        assert_eq!(view.allocation(), Some(&alloc));
        assert_eq!(view.heap_size_in_pages(), heap.heap_size_in_pages());
        assert_eq!(view.used(), 64);
        assert_eq!(view.available_space(), 64);

        let ptr = view.get_space(64);
        assert_eq!(ptr as usize - heap.cpu_base() as usize, 64);
        assert_eq!(view.available_space(), 0);
    }

    #[test]
    #[should_panic(expected = "Reservation overflow")]
    fn test_reservation_overflow() {
        let mut view = ReservedIndirectHeap::new(HeapType::DynamicState);
        view.get_space(1);
    }
}
