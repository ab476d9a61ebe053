//! Bit-field helpers for instruction words and register values.

/// Extract `n` bits of `value` starting at bit `pos` (0 = LSB).
#[inline]
pub fn extract_bits(value: u32, n: u32, pos: u32) -> u32 {
    if n == 0 || pos >= 32 {
        return 0;
    }
    let mask = if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };
    (value >> pos) & mask
}

/// Extract the inclusive bit range `[start, end]`.
#[inline]
pub fn get_bits(value: u32, start: u32, end: u32) -> u32 {
    debug_assert!(start <= end && end < 32);
    extract_bits(value, end - start + 1, start)
}

/// Test bit `n`.
#[inline]
pub fn nth_bit(value: u32, n: u32) -> bool {
    n < 32 && (value >> n) & 1 != 0
}

/// Replace the low `n` bits of `value` into `target` at `pos`.
#[inline]
pub fn replace_bits(target: u32, value: u32, pos: u32, n: u32) -> u32 {
    if n == 0 || pos >= 32 {
        return target;
    }
    let field = if n >= 32 { u32::MAX } else { (1u32 << n) - 1 };
    let mask = field << pos;
    (target & !mask) | ((value & field) << pos)
}

/// Iterate the indices of set bits in the low `width` bits, LSB first.
pub fn set_bits(value: u32, width: u32) -> impl Iterator<Item = usize> {
    (0..width.min(32)).filter(move |&i| nth_bit(value, i)).map(|i| i as usize)
}
