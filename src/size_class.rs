//! Size class table and lookup functions.
//!
//! Objects are bucketed into one of eight fixed size classes. The table
//! covers sizes from 1 byte up to [`MAX_OBJECT_SIZE`]; anything larger is
//! rejected rather than routed to a large-object path — no such path
//! exists here.

use crate::config::{MAX_OBJECT_SIZE, NUM_SIZE_CLASSES, SIZE_CLASS_BYTES};

/// Lookup table for every representable small size.
/// Index = size, value = size class index (1..=8), built once at const time.
const LOOKUP_LEN: usize = MAX_OBJECT_SIZE + 1;

static LOOKUP: [u8; LOOKUP_LEN] = const {
    let mut table = [0u8; LOOKUP_LEN];
    let mut size = 0;
    while size < LOOKUP_LEN {
        let mut cls = 1usize;
        while cls < NUM_SIZE_CLASSES {
            if SIZE_CLASS_BYTES[cls] >= size {
                break;
            }
            cls += 1;
        }
        table[size] = cls as u8;
        size += 1;
    }
    table
};

/// Map a requested byte count to a size class index.
///
/// Returns `None` for `size == 0` or `size > MAX_OBJECT_SIZE`; otherwise
/// returns the smallest class whose size is `>= size`.
#[inline]
pub fn size_to_class(size: usize) -> Option<usize> {
    if size == 0 || size > MAX_OBJECT_SIZE {
        return None;
    }
    Some(LOOKUP[size] as usize)
}

/// The allocation size for a given (valid, non-sentinel) class index.
#[inline]
pub fn class_to_size(class: usize) -> usize {
    SIZE_CLASS_BYTES[class]
}

/// Whether `class` is a valid, non-sentinel size class index.
#[inline]
pub fn is_valid_class(class: usize) -> bool {
    class >= 1 && class < NUM_SIZE_CLASSES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert_eq!(size_to_class(0), None);
    }

    #[test]
    fn boundary_sizes_hit_their_own_class() {
        for &sz in &SIZE_CLASS_BYTES[1..] {
            let cls = size_to_class(sz).unwrap();
            assert_eq!(class_to_size(cls), sz);
        }
    }

    #[test]
    fn rounds_up_to_next_class() {
        assert_eq!(class_to_size(size_to_class(1).unwrap()), 64);
        assert_eq!(class_to_size(size_to_class(65).unwrap()), 96);
        assert_eq!(class_to_size(size_to_class(129).unwrap()), 192);
    }

    #[test]
    fn over_max_is_rejected() {
        assert_eq!(size_to_class(769), None);
        assert_eq!(size_to_class(10_000), None);
    }

    #[test]
    fn classes_strictly_increasing() {
        for i in 2..NUM_SIZE_CLASSES {
            assert!(SIZE_CLASS_BYTES[i] > SIZE_CLASS_BYTES[i - 1]);
        }
    }
}
