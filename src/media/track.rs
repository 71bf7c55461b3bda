//! Track index built from the `moov` box
//!
//! Each `trak` carries its id in `tkhd` and its handler in `mdia/hdlr`:
//!
//! ```text
//! moov
//! ├── mvhd
//! └── trak
//!     ├── tkhd   version(1) flags(3) times(8|16) track_ID(4) ...
//!     └── mdia
//!         └── hdlr   version(1) flags(3) pre_defined(4) handler_type(4) ...
//! ```

use std::collections::BTreeMap;
use std::fmt;

use super::boxes::{FourCc, Mp4Box};
use super::error::MediaError;

/// Offset of `track_ID` in a version 0 `tkhd` payload
const TKHD_TRACK_ID_OFFSET_V0: usize = 12;

/// Offset of `track_ID` in a version 1 `tkhd` payload (64-bit times)
const TKHD_TRACK_ID_OFFSET_V1: usize = 20;

/// Offset of `handler_type` in an `hdlr` payload
const HDLR_HANDLER_OFFSET: usize = 8;

/// Media kind of a track, derived from its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// `vide` handler
    Video,
    /// `soun` handler
    Audio,
    /// Any other handler (subtitles, timed metadata, ...); never routed
    Other,
}

impl MediaKind {
    /// Map a handler code to a media kind
    pub fn from_handler(handler: FourCc) -> Self {
        match &handler.0 {
            b"vide" => MediaKind::Video,
            b"soun" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from track id to media kind for one initialization segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackIndex {
    tracks: BTreeMap<u32, MediaKind>,
}

impl TrackIndex {
    /// Look up the kind of a track
    pub fn get(&self, track_id: u32) -> Option<MediaKind> {
        self.tracks.get(&track_id).copied()
    }

    /// Number of tracks
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (u32, MediaKind)> + '_ {
        self.tracks.iter().map(|(id, kind)| (*id, *kind))
    }

    /// Number of tracks of the given kind
    pub fn count(&self, kind: MediaKind) -> usize {
        self.tracks.values().filter(|k| **k == kind).count()
    }
}

impl FromIterator<(u32, MediaKind)> for TrackIndex {
    fn from_iter<I: IntoIterator<Item = (u32, MediaKind)>>(iter: I) -> Self {
        Self {
            tracks: iter.into_iter().collect(),
        }
    }
}

/// Build the track index from a `moov` box
///
/// Every `trak` must carry `tkhd` and `mdia/hdlr`; a missing box fails the
/// whole index rather than leaving the track unclassified.
pub fn build_track_index(moov: &Mp4Box) -> Result<TrackIndex, MediaError> {
    let mut tracks = BTreeMap::new();

    for child in moov.children() {
        let child = child?;
        if child.fourcc() != FourCc::TRAK {
            continue;
        }

        let tkhd = child.require_child(FourCc::TKHD)?;
        let track_id = track_id(&tkhd)?;

        let mdia = child.require_child(FourCc::MDIA)?;
        let hdlr = mdia.require_child(FourCc::HDLR)?;
        let handler = hdlr.read_fourcc(HDLR_HANDLER_OFFSET)?;

        let kind = MediaKind::from_handler(handler);
        tracing::trace!(track_id, handler = %handler, kind = %kind, "Indexed track");
        tracks.insert(track_id, kind);
    }

    Ok(TrackIndex { tracks })
}

fn track_id(tkhd: &Mp4Box) -> Result<u32, MediaError> {
    let offset = match tkhd.read_u8(0)? {
        1 => TKHD_TRACK_ID_OFFSET_V1,
        _ => TKHD_TRACK_ID_OFFSET_V0,
    };
    tkhd.read_u32(offset)
}
