//! Bounds-checked integer reads over a raw advertisement payload.
//!
//! Every accessor returns `None` when the requested bytes are not all
//! present. Nothing here panics on short or garbled input.

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Supported field widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W1,
    W2,
    W4,
}

impl Width {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W1 => 1,
            Self::W2 => 2,
            Self::W4 => 4,
        }
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        match self {
            Self::W1 => 8,
            Self::W2 => 16,
            Self::W4 => 32,
        }
    }

    pub const fn from_bytes(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::W1),
            2 => Some(Self::W2),
            4 => Some(Self::W4),
            _ => None,
        }
    }
}

/// Borrowed view over one frame's bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> FrameBuffer<'a> {
    #[inline]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Read `width` bytes at `offset`. Signed reads are sign-extended from
    /// the field width. `None` when `offset + width > len`.
    pub fn read(&self, offset: usize, width: Width, endian: Endian, signed: bool) -> Option<i64> {
        let end = offset.checked_add(width.bytes())?;
        let b = self.bytes.get(offset..end)?;
        let v = match (width, endian, signed) {
            (Width::W1, _, false) => i64::from(b[0]),
            (Width::W1, _, true) => i64::from(b[0] as i8),
            (Width::W2, Endian::Little, false) => i64::from(u16::from_le_bytes([b[0], b[1]])),
            (Width::W2, Endian::Big, false) => i64::from(u16::from_be_bytes([b[0], b[1]])),
            (Width::W2, Endian::Little, true) => i64::from(i16::from_le_bytes([b[0], b[1]])),
            (Width::W2, Endian::Big, true) => i64::from(i16::from_be_bytes([b[0], b[1]])),
            (Width::W4, Endian::Little, false) => {
                i64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            (Width::W4, Endian::Big, false) => {
                i64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            (Width::W4, Endian::Little, true) => {
                i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            (Width::W4, Endian::Big, true) => {
                i64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
        };
        Some(v)
    }

    pub fn u8_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    pub fn u16_at(&self, offset: usize, endian: Endian) -> Option<u16> {
        self.read(offset, Width::W2, endian, false)
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn u32_at(&self, offset: usize, endian: Endian) -> Option<u32> {
        self.read(offset, Width::W4, endian, false)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn i16_at(&self, offset: usize, endian: Endian) -> Option<i16> {
        self.read(offset, Width::W2, endian, true)
            .and_then(|v| i16::try_from(v).ok())
    }

    pub fn i32_at(&self, offset: usize, endian: Endian) -> Option<i32> {
        self.read(offset, Width::W4, endian, true)
            .and_then(|v| i32::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FRAME: [u8; 6] = [0x88, 0x13, 0xFF, 0xFE, 0x01, 0x80];

    #[rstest]
    #[case(0, Width::W2, Endian::Little, false, Some(5000))]
    #[case(0, Width::W2, Endian::Big, false, Some(0x8813))]
    #[case(2, Width::W2, Endian::Little, true, Some(-257))]
    #[case(2, Width::W2, Endian::Big, true, Some(-2))]
    #[case(2, Width::W1, Endian::Little, true, Some(-1))]
    #[case(2, Width::W1, Endian::Big, false, Some(255))]
    #[case(2, Width::W4, Endian::Big, false, Some(0xFFFE_0180))]
    #[case(2, Width::W4, Endian::Little, true, Some(i64::from(0x8001_FEFF_u32 as i32)))]
    #[case(3, Width::W4, Endian::Little, false, None)]
    #[case(5, Width::W2, Endian::Little, false, None)]
    #[case(6, Width::W1, Endian::Little, false, None)]
    #[case(usize::MAX, Width::W4, Endian::Little, false, None)]
    fn reads_table(
        #[case] offset: usize,
        #[case] width: Width,
        #[case] endian: Endian,
        #[case] signed: bool,
        #[case] expected: Option<i64>,
    ) {
        let buf = FrameBuffer::new(&FRAME);
        assert_eq!(buf.read(offset, width, endian, signed), expected);
    }

    #[test]
    fn typed_accessors_agree_with_read() {
        let buf = FrameBuffer::new(&FRAME);
        assert_eq!(buf.u8_at(5), Some(0x80));
        assert_eq!(buf.u16_at(0, Endian::Little), Some(5000));
        assert_eq!(buf.i16_at(2, Endian::Big), Some(-2));
        assert_eq!(buf.u32_at(2, Endian::Big), Some(0xFFFE_0180));
        assert_eq!(buf.i32_at(0, Endian::Big), Some(0x8813_FFFE_u32 as i32));
        assert_eq!(buf.u8_at(6), None);
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let buf = FrameBuffer::new(&[]);
        assert!(buf.is_empty());
        assert_eq!(buf.read(0, Width::W1, Endian::Little, false), None);
    }
}
