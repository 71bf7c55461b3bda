//! Fragment pairing and classification
//!
//! A fragment is a `moof` immediately followed by its `mdat`. The track it
//! belongs to is named by the first `traf/tfhd`:
//!
//! ```text
//! moof
//! ├── mfhd
//! └── traf
//!     └── tfhd   version(1) flags(3) track_ID(4) ...
//! ```

use bytes::{Bytes, BytesMut};

use super::boxes::{BoxType, FourCc, Mp4Box};
use super::error::MediaError;
use super::track::{MediaKind, TrackIndex};
use crate::error::{Error, Result};

/// Offset of `track_ID` in a `tfhd` payload
const TFHD_TRACK_ID_OFFSET: usize = 4;

/// A `moof` + `mdat` pair
#[derive(Debug, Clone)]
pub struct Fragment {
    header: Mp4Box,
    data: Mp4Box,
}

impl Fragment {
    /// Pair a fragment header with the box that followed it
    ///
    /// Anything other than `moof` then `mdat` is a protocol violation.
    pub fn pair(header: Mp4Box, data: Mp4Box) -> Result<Self> {
        if header.box_type() != BoxType::MovieFragment {
            return Err(Error::ProtocolViolation {
                expected: BoxType::MovieFragment,
                found: header.box_type(),
            });
        }
        if data.box_type() != BoxType::MediaData {
            return Err(Error::ProtocolViolation {
                expected: BoxType::MediaData,
                found: data.box_type(),
            });
        }
        Ok(Self { header, data })
    }

    /// The `moof` box
    pub fn header(&self) -> &Mp4Box {
        &self.header
    }

    /// The `mdat` box
    pub fn data(&self) -> &Mp4Box {
        &self.data
    }

    /// Track id named by the `moof`
    pub fn track_id(&self) -> std::result::Result<u32, MediaError> {
        fragment_track_id(&self.header)
    }

    /// `moof` bytes followed by `mdat` bytes
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.extend_from_slice(self.header.as_bytes());
        buf.extend_from_slice(self.data.as_bytes());
        buf.freeze()
    }

    /// Combined size of both boxes
    pub fn size(&self) -> usize {
        self.header.size() + self.data.size()
    }
}

/// Track id from the first `traf/tfhd` of a `moof`
pub fn fragment_track_id(moof: &Mp4Box) -> std::result::Result<u32, MediaError> {
    let traf = moof.require_child(FourCc::TRAF)?;
    let tfhd = traf.require_child(FourCc::TFHD)?;
    tfhd.read_u32(TFHD_TRACK_ID_OFFSET)
}

/// Resolve the media kind of a `moof` through the track index
pub fn classify(moof: &Mp4Box, tracks: &TrackIndex) -> std::result::Result<MediaKind, MediaError> {
    let track_id = fragment_track_id(moof)?;
    tracks
        .get(track_id)
        .ok_or(MediaError::UnknownTrack(track_id))
}
