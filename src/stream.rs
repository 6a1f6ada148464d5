//! Linear command streams.

use crate::{allocation::Allocation, utils::align_up};

/// A bump allocator over one [`Allocation`].
///
/// The stream hands out space front to back and never frees individual ranges; the only
/// way to get space back is to [`rewind`](Self::rewind) the whole stream or to rebind it
/// to another allocation. The stream may expose less than the allocation size when the
/// tail of the allocation is reserved for something else, e.g. prefetch overrun past the
/// last command.
pub struct LinearStream {
    allocation: Allocation,
    used: usize,
    max_available: usize,
}

impl std::fmt::Debug for LinearStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearStream")
            .field("allocation", &self.allocation)
            .field("used", &self.used)
            .field("max_available", &self.max_available)
            .finish()
    }
}

impl LinearStream {
    /// # Panics
    /// If `max_available` exceeds the allocation size.
    pub fn new(allocation: Allocation, max_available: usize) -> Self {
        assert!(
            max_available <= allocation.size(),
            "Stream cannot be larger than its allocation!"
        );
        Self {
            allocation,
            used: 0,
            max_available,
        }
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub fn cpu_base(&self) -> *mut u8 {
        self.allocation.cpu_ptr()
    }

    pub fn gpu_base(&self) -> u64 {
        self.allocation.gpu_address()
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

    /// Returns a pointer to `size` bytes at the cursor and advances the cursor.
    ///
    /// # Panics
    /// If fewer than `size` bytes are available.
    pub fn get_space(&mut self, size: usize) -> *mut u8 {
        assert!(
            self.used + size <= self.max_available,
            "Stream overflow: {} bytes requested, {} available",
            size,
            self.available_space()
        );
        let ptr = unsafe { self.cpu_base().add(self.used) };
        self.used += size;
        ptr
    }

    /// Copies `bytes` to the cursor and advances it.
    pub fn write(&mut self, bytes: &[u8]) {
        let ptr = self.get_space(bytes.len());
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
    }

    /// Moves the cursor up to the next multiple of `alignment`. Zero is a no-op.
    pub fn align(&mut self, alignment: usize) {
        let aligned = align_up(self.used, alignment);
        assert!(
            aligned <= self.max_available,
            "Stream overflow while aligning to {alignment}"
        );
        self.used = aligned;
    }

    pub fn rewind(&mut self) {
        self.used = 0;
    }

    /// Moves the cursor to `used`, which must lie within the stream.
    pub(crate) fn set_used(&mut self, used: usize) {
        assert!(used <= self.max_available, "Stream overflow");
        self.used = used;
    }

    /// Rebinds the stream to a new allocation and rewinds it. Returns the old allocation.
    pub fn replace_allocation(&mut self, allocation: Allocation, max_available: usize) -> Allocation {
        assert!(
            max_available <= allocation.size(),
            "Stream cannot be larger than its allocation!"
        );
        self.used = 0;
        self.max_available = max_available;
        std::mem::replace(&mut self.allocation, allocation)
    }
}
