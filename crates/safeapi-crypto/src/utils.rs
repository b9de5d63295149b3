//! Constant-time helpers.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices in constant time.
///
/// Slices of different length compare unequal without inspecting contents.
#[inline]
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_slices() {
        assert!(constant_time_compare(b"key text", b"key text"));
        assert!(constant_time_compare(&[], &[]));
    }

    #[test]
    fn test_unequal_slices() {
        assert!(!constant_time_compare(b"key text", b"key texT"));
        assert!(!constant_time_compare(b"short", b"longer"));
    }
}
