#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

/// Rounds `val` up to the next multiple of `align`, which must be a power of two.
///
/// `None` if the rounded value does not fit in a `usize`.
#[must_use]
pub const fn align_up(val: usize, align: usize) -> Option<usize> {
    match val.checked_add(align - 1) {
        Some(sum) => Some(sum & !(align - 1)),
        None => None,
    }
}

/// Number of `chunk`-sized pieces needed to cover `total`. `chunk` must be nonzero.
#[must_use]
pub const fn div_ceil(total: u64, chunk: u64) -> u64 {
    if total % chunk == 0 {
        total / chunk
    } else {
        total / chunk + 1
    }
}
