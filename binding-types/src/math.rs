//! Alignment helpers.

use std::ops::{Add, Rem, Sub};

/// Rounds `value` up to the next multiple of `alignment`.
///
/// ```
/// # use binding_types::math::align_to;
/// assert_eq!(align_to(253u64, 256), 256);
/// assert_eq!(align_to(512u64, 256), 512);
/// ```
pub fn align_to<T>(value: T, alignment: T) -> T
where
    T: Add<Output = T> + Copy + Default + PartialEq<T> + Rem<Output = T> + Sub<Output = T>,
{
    match value % alignment {
        rem if rem == T::default() => value,
        rem => value + (alignment - rem),
    }
}

/// Returns `true` if `value` is a multiple of `alignment`.
///
/// ```
/// # use binding_types::math::is_aligned;
/// assert!(is_aligned(512u64, 256));
/// assert!(!is_aligned(100u64, 256));
/// ```
pub fn is_aligned<T>(value: T, alignment: T) -> bool
where
    T: Copy + Default + PartialEq<T> + Rem<Output = T>,
{
    value % alignment == T::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_to_constant_buffer_boundary() {
        assert_eq!(align_to(1u64, 256), 256);
        assert_eq!(align_to(255u64, 256), 256);
        assert_eq!(align_to(257u64, 256), 512);
        assert_eq!(align_to(0u32, 256), 0);
    }
}
