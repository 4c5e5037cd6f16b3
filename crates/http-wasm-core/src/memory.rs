//! Bounds-checked access to guest linear memory.
//!
//! Every host function goes through [`checked_range`] before touching guest
//! memory. Offsets and lengths come from the guest and are never trusted:
//! each access is checked against the memory slice handed in by the caller,
//! which must be freshly obtained from the store on every host call because
//! the guest may have grown its memory since the last one.

use std::ops::Range;

use http_wasm_common::AbiError;

/// Resolve `(offset, len)` into a byte range inside a memory of
/// `memory_size` bytes.
///
/// Arithmetic is done in `u64` so `offset + len` cannot wrap.
pub fn checked_range(memory_size: usize, offset: u32, len: u32) -> Result<Range<usize>, AbiError> {
    let end = u64::from(offset) + u64::from(len);
    if end > memory_size as u64 {
        return Err(AbiError::OutOfBounds {
            offset,
            len,
            memory_size,
        });
    }
    // Both bounds are <= memory_size, which is a usize
    #[allow(clippy::cast_possible_truncation)]
    Ok(offset as usize..end as usize)
}

/// Borrow `len` bytes at `offset`.
pub fn read(memory: &[u8], offset: u32, len: u32) -> Result<&[u8], AbiError> {
    let range = checked_range(memory.len(), offset, len)?;
    Ok(&memory[range])
}

/// Borrow `len` bytes at `offset` as UTF-8.
pub fn read_str(memory: &[u8], offset: u32, len: u32) -> Result<&str, AbiError> {
    let bytes = read(memory, offset, len)?;
    std::str::from_utf8(bytes).map_err(|_| AbiError::InvalidUtf8 { offset, len })
}

/// Copy `bytes` to `offset`.
///
/// The whole destination span is checked before the first byte is written,
/// so a failed write leaves memory untouched.
pub fn write(memory: &mut [u8], offset: u32, bytes: &[u8]) -> Result<(), AbiError> {
    let len = len_u32(bytes.len())?;
    let range = checked_range(memory.len(), offset, len)?;
    memory[range].copy_from_slice(bytes);
    Ok(())
}

/// Write `value` into the guest buffer `(buf, buf_limit)` if it fits and
/// return its true length.
///
/// This is the buffer-limit idiom shared by every variable-length getter.
/// The declared buffer is bounds-checked even when nothing is written, so a
/// bogus buffer traps on the first call rather than only once a value fits.
pub fn write_if_fits(
    memory: &mut [u8],
    buf: u32,
    buf_limit: u32,
    value: &[u8],
) -> Result<u32, AbiError> {
    checked_range(memory.len(), buf, buf_limit)?;
    let len = len_u32(value.len())?;
    if len <= buf_limit {
        write(memory, buf, value)?;
    }
    Ok(len)
}

/// Convert a host length to the ABI's 32-bit length.
pub fn len_u32(len: usize) -> Result<u32, AbiError> {
    u32::try_from(len).map_err(|_| AbiError::LengthOverflow { len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_range_in_bounds() {
        assert_eq!(checked_range(16, 0, 16).unwrap(), 0..16);
        assert_eq!(checked_range(16, 4, 8).unwrap(), 4..12);
        // Zero-length spans are valid anywhere up to the end
        assert_eq!(checked_range(16, 16, 0).unwrap(), 16..16);
    }

    #[test]
    fn test_checked_range_out_of_bounds() {
        assert_eq!(
            checked_range(16, 10, 7),
            Err(AbiError::OutOfBounds {
                offset: 10,
                len: 7,
                memory_size: 16
            })
        );
        assert!(checked_range(16, 17, 0).is_err());
    }

    #[test]
    fn test_checked_range_no_wraparound() {
        // u32::MAX + 2 would wrap to 1 in 32-bit arithmetic
        assert!(checked_range(65536, u32::MAX, 2).is_err());
        assert!(checked_range(65536, 2, u32::MAX).is_err());
    }

    #[test]
    fn test_read_str() {
        let memory = b"..hello..";
        assert_eq!(read_str(memory, 2, 5).unwrap(), "hello");
        assert_eq!(read_str(memory, 0, 0).unwrap(), "");
    }

    #[test]
    fn test_read_str_invalid_utf8() {
        let memory = [0xff, 0xfe, 0xfd];
        assert_eq!(
            read_str(&memory, 0, 3),
            Err(AbiError::InvalidUtf8 { offset: 0, len: 3 })
        );
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let mut memory = [0u8; 8];
        assert!(write(&mut memory, 6, b"abc").is_err());
        assert_eq!(memory, [0u8; 8]);

        write(&mut memory, 5, b"abc").unwrap();
        assert_eq!(&memory[5..], b"abc");
    }

    #[test]
    fn test_write_if_fits_retry() {
        let mut memory = [0u8; 32];

        // Query the length without copying
        assert_eq!(write_if_fits(&mut memory, 0, 0, b"/foo").unwrap(), 4);
        assert_eq!(memory, [0u8; 32]);

        // Too small: still nothing written, same length
        assert_eq!(write_if_fits(&mut memory, 0, 3, b"/foo").unwrap(), 4);
        assert_eq!(memory, [0u8; 32]);

        // Retry with enough room
        assert_eq!(write_if_fits(&mut memory, 16, 16, b"/foo").unwrap(), 4);
        assert_eq!(&memory[16..20], b"/foo");
        assert_eq!(memory[20], 0);
    }

    #[test]
    fn test_write_if_fits_checks_declared_buffer() {
        let mut memory = [0u8; 32];
        let err = write_if_fits(&mut memory, 30, 8, b"x").unwrap_err();
        assert!(matches!(err, AbiError::OutOfBounds { .. }));
        assert_eq!(memory, [0u8; 32]);
    }
}
