//! Size constants and alignment helpers shared by the streams and heaps.

/// Memory granularities used when sizing command buffers and heaps.
pub mod memory {
    pub const KILO_BYTE: usize = 1024;
    pub const MEGA_BYTE: usize = 1024 * KILO_BYTE;
    pub const CACHE_LINE_SIZE: usize = 64;
    pub const PAGE_SIZE: usize = 4 * KILO_BYTE;
    pub const PAGE_SIZE_64K: usize = 64 * KILO_BYTE;
    pub const PAGE_SIZE_2M: usize = 2 * MEGA_BYTE;
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// An alignment of 0 or 1 leaves the value untouched.
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.next_multiple_of(alignment)
}

#[inline]
pub fn is_aligned(value: usize, alignment: usize) -> bool {
    alignment <= 1 || value % alignment == 0
}

/// Padding needed to bring `value` up to `alignment`.
#[inline]
pub fn align_padding(value: usize, alignment: usize) -> usize {
    align_up(value, alignment) - value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 0), 65);
        assert_eq!(align_up(65, 1), 65);
        assert_eq!(
            align_up(256 * memory::KILO_BYTE + 1, memory::PAGE_SIZE_64K),
            320 * memory::KILO_BYTE
        );
    }

    #[test]
    fn test_align_padding() {
        assert_eq!(align_padding(16, 32), 16);
        assert_eq!(align_padding(32, 32), 0);
        assert!(is_aligned(4096, memory::PAGE_SIZE));
        assert!(!is_aligned(4097, memory::PAGE_SIZE));
    }
}
