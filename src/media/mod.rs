//! Fragmented MP4 handling for the relay
//!
//! This module provides:
//! - Box parsing and serialization (`ftyp`, `moov`, `moof`, `mdat`, ...)
//! - An async box reader over the encoder's output stream
//! - The track index built from `moov` (track id → media kind)
//! - Fragment pairing and classification

pub mod boxes;
pub mod error;
pub mod fragment;
pub mod init;
pub mod reader;
pub mod track;

pub use boxes::{
    find_child_box, BoxHeader, BoxIter, BoxType, FourCc, Mp4Box, EXTENDED_HEADER_LEN, HEADER_LEN,
};
pub use error::MediaError;
pub use fragment::{classify, fragment_track_id, Fragment};
pub use init::InitSegment;
pub use reader::{BoxReader, DEFAULT_MAX_BOX_SIZE};
pub use track::{build_track_index, MediaKind, TrackIndex};
