//! Power-of-two sizing helpers shared by the CPU and GPU backends.

/// Padded length of a scan array covering `count` elements.
///
/// The result is the next power of two >= `count`, raised to at least `tile`
/// so that it is always a whole number of tiles. Returns `None` if the padded
/// size cannot be represented with 32-bit offsets.
pub fn padded_len(count: usize, tile: usize) -> Option<usize> {
    let len = count.max(1).checked_next_power_of_two()?.max(tile);
    (len <= u32::MAX as usize).then_some(len)
}

/// Lengths of the group-sum levels needed to scan an array of `len` elements.
///
/// Level `k + 1` holds one total per tile of level `k`; the chain stops at the
/// first level that fits in a single tile. Empty when `len <= tile`.
pub fn group_sum_levels(len: usize, tile: usize) -> Vec<usize> {
    let mut levels = Vec::new();
    let mut n = len;
    while n > tile {
        n = n.div_ceil(tile);
        levels.push(n);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0, 4), Some(4));
        assert_eq!(padded_len(3, 4), Some(4));
        assert_eq!(padded_len(5, 4), Some(8));
        assert_eq!(padded_len(10, 4), Some(16));
        assert_eq!(padded_len(1000, 1024), Some(1024));
        assert_eq!(padded_len(1025, 1024), Some(2048));
    }

    #[test]
    fn test_padded_len_is_tile_multiple() {
        for count in [1usize, 7, 64, 65, 999, 4097] {
            let len = padded_len(count, 32).unwrap();
            assert!(len.is_power_of_two());
            assert_eq!(len % 32, 0);
            assert!(len >= count);
        }
    }

    #[test]
    fn test_group_sum_levels() {
        assert!(group_sum_levels(4, 4).is_empty());
        assert_eq!(group_sum_levels(8, 4), vec![2]);
        assert_eq!(group_sum_levels(64, 4), vec![16, 4]);
        assert_eq!(group_sum_levels(1 << 20, 1024), vec![1024]);
        assert_eq!(group_sum_levels(1 << 21, 1024), vec![2048, 2]);
    }
}
