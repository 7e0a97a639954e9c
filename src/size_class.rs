//! The 30 small size classes and their run geometry (spec §3.4, component D).

use crate::types::PAGE_SIZE;

pub const NUM_SIZE_CLASSES: usize = 30;

/// `(size, elements_per_run, pages_per_run)` for each of the 30 classes,
/// chosen the same way the original bin table is derived: the smallest
/// page count such that the run holds at least 8 elements (`elements *
/// size ≈ pages * 4096`, spec §3.4).
pub const SIZE_CLASSES: [(u32, u32, u32); NUM_SIZE_CLASSES] = [
    (8, 512, 1),
    (16, 256, 1),
    (24, 170, 1),
    (32, 128, 1),
    (40, 102, 1),
    (48, 85, 1),
    (56, 73, 1),
    (64, 64, 1),
    (80, 51, 1),
    (96, 42, 1),
    (112, 36, 1),
    (128, 32, 1),
    (160, 25, 1),
    (192, 21, 1),
    (224, 18, 1),
    (256, 16, 1),
    (320, 12, 1),
    (384, 10, 1),
    (448, 9, 1),
    (512, 8, 1),
    (640, 12, 2),
    (768, 10, 2),
    (896, 9, 2),
    (1024, 8, 2),
    (1280, 9, 3),
    (1536, 8, 3),
    (1792, 9, 4),
    (2048, 8, 4),
    (2560, 8, 5),
    (3072, 8, 6),
];

#[inline]
pub fn class_size(class_id: usize) -> usize {
    SIZE_CLASSES[class_id].0 as usize
}

#[inline]
pub fn class_elements_per_run(class_id: usize) -> usize {
    SIZE_CLASSES[class_id].1 as usize
}

#[inline]
pub fn class_pages_per_run(class_id: usize) -> usize {
    SIZE_CLASSES[class_id].2 as usize
}

/// Map a requested size (`1..=MAX_SMALL_SIZE`) to its size-class id.
///
/// Spec §4.5: "for `s <= 64`, class = `(s - (s>0 ? 1 : 0)) >> 3`. For `s >
/// 64`, use a bit-scan on `s - 1` to pick the class in a 4-way-per-power-
/// of-two fashion." We implement the `s > 64` branch directly against the
/// size table via binary search instead of replicating the bit-scan, since
/// `SIZE_CLASSES` is the single source of truth for the boundary sizes and
/// a table search is exact by construction without duplicating the
/// encoding in two places.
pub fn size_to_class(size: usize) -> usize {
    debug_assert!(size >= 1 && size <= SIZE_CLASSES[NUM_SIZE_CLASSES - 1].0 as usize);
    if size <= 64 {
        return ((size.max(1) - 1) >> 3).min(7);
    }
    SIZE_CLASSES
        .iter()
        .position(|&(sz, _, _)| sz as usize >= size)
        .expect("size within MAX_SMALL_SIZE always has a covering class")
}

/// Smallest size-class size `>=` the requested size. Used by the "size
/// classification round-trip" test (spec §8 invariant 2).
pub fn ceil_to_next_class(size: usize) -> usize {
    class_size(size_to_class(size))
}

#[inline]
pub fn run_bytes(class_id: usize) -> usize {
    class_pages_per_run(class_id) * PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_monotonic_and_8byte_aligned() {
        let mut last = 0u32;
        for &(sz, elems, pages) in SIZE_CLASSES.iter() {
            assert!(sz > last);
            assert_eq!(sz % 8, 0);
            assert!(elems as usize * sz as usize <= pages as usize * PAGE_SIZE);
            last = sz;
        }
    }

    #[test]
    fn size_to_class_exact_for_boundaries() {
        for &(sz, _, _) in SIZE_CLASSES.iter() {
            let class = size_to_class(sz as usize);
            assert!(class_size(class) >= sz as usize);
            assert_eq!(ceil_to_next_class(sz as usize), sz as usize);
        }
    }

    #[test]
    fn size_to_class_rounds_up() {
        assert_eq!(class_size(size_to_class(1)), 8);
        assert_eq!(class_size(size_to_class(9)), 16);
        assert_eq!(class_size(size_to_class(65)), 80);
        assert_eq!(class_size(size_to_class(3072)), 3072);
    }

    proptest::proptest! {
        /// Spec §8 invariant 2: `size_of(p) >= requested_size` and
        /// `size_of(p) <= ceil_to_next_class(requested_size)` for every
        /// small-path size. `class_size(size_to_class(size))` is exactly
        /// what `Heap::size_of` reports for a small allocation, so the
        /// round-trip is checked directly against the table.
        #[test]
        fn size_classification_round_trip(size in 1usize..=3072usize) {
            let class = size_to_class(size);
            let granted = class_size(class);
            proptest::prop_assert!(granted >= size);
            proptest::prop_assert!(granted <= ceil_to_next_class(size));
        }
    }
}
