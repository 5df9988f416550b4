use std::ops::Range;

/// mask with the lower `width` bits set.
#[inline]
pub const fn ones(width: u32) -> usize {
    if width >= usize::BITS {
        usize::MAX
    } else {
        (1 << width) - 1
    }
}

#[inline]
pub const fn bit_range(r: Range<u32>) -> usize {
    ones(r.end) & !ones(r.start)
}

#[inline]
pub const fn mask_lower(bin: usize, width: u32) -> usize {
    bin & ones(width)
}

/// bits `r.start..r.end` of `bin`, shifted down to bit 0.
#[inline]
pub const fn extract(bin: usize, r: Range<u32>) -> usize {
    let left = r.start;
    if left >= usize::BITS {
        0
    } else {
        (bin & bit_range(r)) >> left
    }
}

/// floor of base-2 logarithm. `log2(0)` and `log2(1)` are both 0.
#[inline]
pub const fn log2(v: usize) -> u32 {
    if v == 0 {
        0
    } else {
        usize::BITS - 1 - v.leading_zeros()
    }
}
