//! Big-endian field readers.
//!
//! All readers return `None` instead of panicking when the field runs past the
//! end of the buffer, so parsers can chain them with `?`.

#[inline(always)]
pub fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

#[inline(always)]
pub fn read_u16_be(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[inline(always)]
pub fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_within_bounds() {
        let buf = [0x12, 0xb5, 0x00, 0x00, 0x7b, 0x00];
        assert_eq!(read_u8(&buf, 1), Some(0xb5));
        assert_eq!(read_u16_be(&buf, 0), Some(4789));
        assert_eq!(read_u32_be(&buf, 2), Some(0x00007b00));
    }

    #[test]
    fn test_read_past_end() {
        let buf = [0u8; 4];
        assert_eq!(read_u8(&buf, 4), None);
        assert_eq!(read_u16_be(&buf, 3), None);
        assert_eq!(read_u32_be(&buf, 1), None);
        assert_eq!(read_u32_be(&buf, usize::MAX), None);
    }
}
