//! Digit extraction shared by every stage of a pass.
//!
//! A pass looks at the `radix_bits`-wide window of the key starting at
//! `start_bit = pass * radix_bits`. Histogram and Scatter must agree on this
//! convention exactly, so both call into this module.

/// Number of bits in a key.
pub const KEY_BITS: u32 = u32::BITS;

/// Mask selecting the low `radix_bits` bits.
#[inline]
pub const fn digit_mask(radix_bits: u32) -> u32 {
    (1u32 << radix_bits) - 1
}

/// Digit of `key` for the window starting at `start_bit`.
#[inline]
pub fn digit_at(key: u32, start_bit: u32, radix_bits: u32) -> usize {
    (key.checked_shr(start_bit).unwrap_or(0) & digit_mask(radix_bits)) as usize
}

/// Digit of `key` for pass `pass` (least significant window first).
#[inline]
pub fn digit(key: u32, pass: u32, radix_bits: u32) -> usize {
    digit_at(key, pass * radix_bits, radix_bits)
}

/// Number of passes needed to cover a 32-bit key: `ceil(32 / radix_bits)`.
#[inline]
pub const fn pass_count(radix_bits: u32) -> u32 {
    KEY_BITS.div_ceil(radix_bits)
}
