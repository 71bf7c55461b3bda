//! ISO BMFF box parsing
//!
//! Every box starts with a big-endian size covering the whole box followed
//! by a four-character type code:
//!
//! ```text
//! +----------+----------+----------------------+-------------------+
//! | Size(4)  | Type(4)  | LargeSize(8, if 1)   | Payload(Size-hdr) |
//! +----------+----------+----------------------+-------------------+
//! ```
//!
//! A parsed [`Mp4Box`] keeps its raw bytes, so writing it back out is
//! byte-exact and payload slices share the same allocation.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::error::MediaError;

/// Size of a regular box header
pub const HEADER_LEN: usize = 8;

/// Size of a box header carrying a 64-bit size
pub const EXTENDED_HEADER_LEN: usize = 16;

/// Four-character box type code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: FourCc = FourCc(*b"ftyp");
    pub const MOOV: FourCc = FourCc(*b"moov");
    pub const MOOF: FourCc = FourCc(*b"moof");
    pub const MDAT: FourCc = FourCc(*b"mdat");
    pub const TRAK: FourCc = FourCc(*b"trak");
    pub const TKHD: FourCc = FourCc(*b"tkhd");
    pub const MDIA: FourCc = FourCc(*b"mdia");
    pub const HDLR: FourCc = FourCc(*b"hdlr");
    pub const TRAF: FourCc = FourCc(*b"traf");
    pub const TFHD: FourCc = FourCc(*b"tfhd");

    /// Raw code bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.0))
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// Top-level box types the relay acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxType {
    /// `ftyp`
    FileType,
    /// `moov`
    Movie,
    /// `moof`
    MovieFragment,
    /// `mdat`
    MediaData,
    /// Anything else; carried through but never routed
    Other(FourCc),
}

impl BoxType {
    /// Four-character code of this type
    pub fn fourcc(&self) -> FourCc {
        match self {
            BoxType::FileType => FourCc::FTYP,
            BoxType::Movie => FourCc::MOOV,
            BoxType::MovieFragment => FourCc::MOOF,
            BoxType::MediaData => FourCc::MDAT,
            BoxType::Other(code) => *code,
        }
    }

    /// Whether this box belongs to the initialization segment
    pub fn is_init(&self) -> bool {
        matches!(self, BoxType::FileType | BoxType::Movie)
    }
}

impl From<FourCc> for BoxType {
    fn from(code: FourCc) -> Self {
        match code {
            FourCc::FTYP => BoxType::FileType,
            FourCc::MOOV => BoxType::Movie,
            FourCc::MOOF => BoxType::MovieFragment,
            FourCc::MDAT => BoxType::MediaData,
            other => BoxType::Other(other),
        }
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fourcc().fmt(f)
    }
}

/// Decoded box header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Type code
    pub fourcc: FourCc,
    /// Total size of the box including the header
    pub size: u64,
    /// Header length (8, or 16 for 64-bit sizes)
    pub header_len: usize,
}

impl BoxHeader {
    /// Whether a 32-bit size field announces a 64-bit size after the type
    pub fn is_extended(size_field: u32) -> bool {
        size_field == 1
    }

    /// Decode a header from the start of `buf`
    ///
    /// `buf` must hold the 8 header bytes, plus 8 more when the size field
    /// is 1. Size 0 ("to end of file") has no meaning in a live stream and
    /// is rejected.
    pub fn decode(buf: &[u8]) -> Result<Self, MediaError> {
        if buf.len() < HEADER_LEN {
            return Err(MediaError::Truncated {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let size_field = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let fourcc = FourCc([buf[4], buf[5], buf[6], buf[7]]);

        if Self::is_extended(size_field) {
            if buf.len() < EXTENDED_HEADER_LEN {
                return Err(MediaError::Truncated {
                    needed: EXTENDED_HEADER_LEN,
                    available: buf.len(),
                });
            }
            let mut large = [0u8; 8];
            large.copy_from_slice(&buf[HEADER_LEN..EXTENDED_HEADER_LEN]);
            let size = u64::from_be_bytes(large);
            if size < EXTENDED_HEADER_LEN as u64 {
                return Err(MediaError::InvalidSize { fourcc, size });
            }
            return Ok(Self {
                fourcc,
                size,
                header_len: EXTENDED_HEADER_LEN,
            });
        }

        if (size_field as usize) < HEADER_LEN {
            return Err(MediaError::InvalidSize {
                fourcc,
                size: size_field as u64,
            });
        }

        Ok(Self {
            fourcc,
            size: size_field as u64,
            header_len: HEADER_LEN,
        })
    }

    /// Payload length
    pub fn payload_len(&self) -> u64 {
        self.size - self.header_len as u64
    }
}

/// A complete box with its raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    box_type: BoxType,
    header_len: usize,
    raw: Bytes,
}

impl Mp4Box {
    /// Build a box from a type and payload, using the shortest header
    pub fn new(fourcc: FourCc, payload: &[u8]) -> Self {
        let total = payload.len() + HEADER_LEN;
        let (header_len, mut buf) = if total <= u32::MAX as usize {
            let mut buf = BytesMut::with_capacity(total);
            buf.put_u32(total as u32);
            buf.put_slice(fourcc.as_bytes());
            (HEADER_LEN, buf)
        } else {
            let total = payload.len() + EXTENDED_HEADER_LEN;
            let mut buf = BytesMut::with_capacity(total);
            buf.put_u32(1);
            buf.put_slice(fourcc.as_bytes());
            buf.put_u64(total as u64);
            (EXTENDED_HEADER_LEN, buf)
        };
        buf.put_slice(payload);

        Self {
            box_type: fourcc.into(),
            header_len,
            raw: buf.freeze(),
        }
    }

    /// Parse the box at the start of `buf`
    ///
    /// Trailing bytes after the box are ignored; the returned box shares
    /// `buf`'s allocation.
    pub fn parse(buf: &Bytes) -> Result<Self, MediaError> {
        let header = BoxHeader::decode(buf)?;
        let size = usize::try_from(header.size).map_err(|_| MediaError::TooLarge {
            fourcc: header.fourcc,
            size: header.size,
            limit: usize::MAX,
        })?;
        if buf.len() < size {
            return Err(MediaError::Truncated {
                needed: size,
                available: buf.len(),
            });
        }

        Ok(Self::from_parts(header, buf.slice(..size)))
    }

    pub(crate) fn from_parts(header: BoxHeader, raw: Bytes) -> Self {
        debug_assert_eq!(raw.len() as u64, header.size);
        Self {
            box_type: header.fourcc.into(),
            header_len: header.header_len,
            raw,
        }
    }

    /// Box type
    pub fn box_type(&self) -> BoxType {
        self.box_type
    }

    /// Four-character type code
    pub fn fourcc(&self) -> FourCc {
        self.box_type.fourcc()
    }

    /// Total size including the header
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    /// Header length (8 or 16)
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Payload bytes (everything after the header)
    pub fn payload(&self) -> Bytes {
        self.raw.slice(self.header_len..)
    }

    /// The exact bytes this box was parsed from
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Iterate the payload as a sequence of child boxes
    pub fn children(&self) -> BoxIter {
        BoxIter::new(self.payload())
    }

    /// First child box of the given type
    pub fn find_child(&self, fourcc: FourCc) -> Result<Mp4Box, MediaError> {
        find_child_box(&self.payload(), fourcc)
    }

    /// Like [`find_child`](Self::find_child), reporting a miss as a
    /// structural error of this container
    pub fn require_child(&self, fourcc: FourCc) -> Result<Mp4Box, MediaError> {
        self.find_child(fourcc).map_err(|e| match e {
            MediaError::NotFound(missing) => MediaError::Structure {
                container: self.fourcc(),
                missing,
            },
            other => other,
        })
    }

    /// Read a payload byte at `offset`
    pub fn read_u8(&self, offset: usize) -> Result<u8, MediaError> {
        Ok(self.field::<1>(offset)?[0])
    }

    /// Read a big-endian u32 from the payload at `offset`
    pub fn read_u32(&self, offset: usize) -> Result<u32, MediaError> {
        Ok(u32::from_be_bytes(self.field::<4>(offset)?))
    }

    /// Read a four-character code from the payload at `offset`
    pub fn read_fourcc(&self, offset: usize) -> Result<FourCc, MediaError> {
        Ok(FourCc(self.field::<4>(offset)?))
    }

    fn field<const N: usize>(&self, offset: usize) -> Result<[u8; N], MediaError> {
        let payload = &self.raw[self.header_len..];
        let bytes = offset
            .checked_add(N)
            .and_then(|end| payload.get(offset..end))
            .ok_or(MediaError::FieldOutOfBounds {
                fourcc: self.fourcc(),
                offset,
                len: payload.len(),
            })?;

        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

/// Iterator over consecutive boxes in a buffer
///
/// Stops after the first error.
#[derive(Debug, Clone)]
pub struct BoxIter {
    remaining: Bytes,
}

impl BoxIter {
    /// Iterate boxes starting at offset 0 of `buf`
    pub fn new(buf: Bytes) -> Self {
        Self { remaining: buf }
    }
}

impl Iterator for BoxIter {
    type Item = Result<Mp4Box, MediaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        match Mp4Box::parse(&self.remaining) {
            Ok(child) => {
                let _ = self.remaining.split_to(child.size());
                Some(Ok(child))
            }
            Err(e) => {
                self.remaining.clear();
                Some(Err(e))
            }
        }
    }
}

/// Find the first box of type `fourcc` in `payload`
///
/// Scans from offset 0 and parses nothing past the match.
pub fn find_child_box(payload: &Bytes, fourcc: FourCc) -> Result<Mp4Box, MediaError> {
    for child in BoxIter::new(payload.clone()) {
        let child = child?;
        if child.fourcc() == fourcc {
            return Ok(child);
        }
    }
    Err(MediaError::NotFound(fourcc))
}
