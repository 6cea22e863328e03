//! # Byte-Format Primitives
//!
//! Small, allocation-free helpers for walking EBML-style binary data:
//! variable-length integer decoding, fixed-width big-endian writes and
//! 4-byte marker search. None of these functions panic on short input;
//! "not found" and "truncated" are reported through return values.

use byteorder::{BigEndian, ByteOrder};

/// Maximum encoded width of a variable-length integer.
pub const MAX_VINT_WIDTH: usize = 8;

/// Decode the variable-length integer starting at `pos`.
///
/// The count of leading zero bits in the first byte (plus the marker bit
/// that follows them) gives the total width, 1 to 8 bytes. The marker bit
/// is stripped and the remaining bits of the first byte together with the
/// following bytes form a big-endian magnitude.
///
/// ## Returns:
/// - `(value, width)` for a well-formed integer
/// - `(0, 0)` when `pos` is at or past the end of `bytes`
/// - `(0, 1)` when the first byte is zero (no width marker within 8 bytes)
///
/// A width that runs past the end of the buffer decodes the bytes that are
/// present and still reports the declared width, so callers advancing by
/// `width` land past the end and stop.
pub fn read_vint(bytes: &[u8], pos: usize) -> (u64, usize) {
    let Some(&first) = bytes.get(pos) else {
        return (0, 0);
    };

    let width = first.leading_zeros() as usize + 1;
    if width > MAX_VINT_WIDTH {
        return (0, 1);
    }

    // Strip the marker bit from the first byte
    let mut value = u64::from(first) & (0xFF_u64 >> width);
    for offset in 1..width {
        match bytes.get(pos + offset) {
            Some(&b) => value = (value << 8) | u64::from(b),
            None => break,
        }
    }

    (value, width)
}

/// Overwrite `width` bytes at `pos` with `value` as a big-endian integer.
///
/// The caller guarantees that `value` fits in `width` bytes, that
/// `1 <= width <= 8`, and that `pos + width <= bytes.len()`. The buffer is
/// never grown.
pub fn write_uint(bytes: &mut [u8], pos: usize, value: u64, width: usize) {
    BigEndian::write_uint(&mut bytes[pos..pos + width], value, width);
}

/// Read `width` bytes at `pos` as a big-endian unsigned integer.
///
/// Returns `None` for widths outside `1..=8` or a range past the end.
pub fn read_uint(bytes: &[u8], pos: usize, width: usize) -> Option<u64> {
    if width == 0 || width > MAX_VINT_WIDTH {
        return None;
    }
    let end = pos.checked_add(width)?;
    let slice = bytes.get(pos..end)?;
    Some(BigEndian::read_uint(slice, width))
}

/// Index of the first occurrence of `marker` in `bytes`.
pub fn find_marker(bytes: &[u8], marker: &[u8; 4]) -> Option<usize> {
    find_marker_from(bytes, marker, 0)
}

/// Index of the first occurrence of `marker` at or after `start`.
pub fn find_marker_from(bytes: &[u8], marker: &[u8; 4], start: usize) -> Option<usize> {
    bytes
        .get(start..)?
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|offset| start + offset)
}
