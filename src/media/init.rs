//! Cached initialization segment

use std::sync::Arc;

use super::boxes::{BoxType, Mp4Box};
use super::error::MediaError;
use super::track::{build_track_index, TrackIndex};

/// The `ftyp` + `moov` pair a decoder needs before any fragment
///
/// Holds the track index built from the `moov`, so the two can never
/// disagree.
#[derive(Debug, Clone)]
pub struct InitSegment {
    file_type: Mp4Box,
    movie: Mp4Box,
    tracks: Arc<TrackIndex>,
}

impl InitSegment {
    /// Build from an `ftyp` and a `moov`, indexing the tracks
    pub fn new(file_type: Mp4Box, movie: Mp4Box) -> Result<Self, MediaError> {
        debug_assert_eq!(file_type.box_type(), BoxType::FileType);
        debug_assert_eq!(movie.box_type(), BoxType::Movie);

        let tracks = Arc::new(build_track_index(&movie)?);
        Ok(Self {
            file_type,
            movie,
            tracks,
        })
    }

    /// The `ftyp` box
    pub fn file_type(&self) -> &Mp4Box {
        &self.file_type
    }

    /// The `moov` box
    pub fn movie(&self) -> &Mp4Box {
        &self.movie
    }

    /// Track index derived from the `moov`
    pub fn tracks(&self) -> &Arc<TrackIndex> {
        &self.tracks
    }

    /// Replace the `ftyp`
    pub fn set_file_type(&mut self, file_type: Mp4Box) {
        self.file_type = file_type;
    }

    /// Replace the `moov`, re-indexing its tracks
    ///
    /// On error the segment is left unchanged.
    pub fn set_movie(&mut self, movie: Mp4Box) -> Result<(), MediaError> {
        let tracks = build_track_index(&movie)?;
        self.movie = movie;
        self.tracks = Arc::new(tracks);
        Ok(())
    }

    /// Combined size of both boxes
    pub fn size(&self) -> usize {
        self.file_type.size() + self.movie.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::testutil;

    #[test]
    fn test_new_builds_index() {
        let init = InitSegment::new(
            testutil::parse(testutil::ftyp()),
            testutil::parse(testutil::moov(&[(1, b"vide")])),
        )
        .unwrap();

        assert_eq!(init.tracks().get(1), Some(MediaKind::Video));
        assert_eq!(init.size(), init.file_type().size() + init.movie().size());
    }

    #[test]
    fn test_set_movie_keeps_old_on_error() {
        let mut init = InitSegment::new(
            testutil::parse(testutil::ftyp()),
            testutil::parse(testutil::moov(&[(1, b"vide")])),
        )
        .unwrap();
        let before = init.movie().clone();

        let broken = testutil::parse(testutil::mp4_box(
            b"moov",
            &testutil::trak_with(testutil::tkhd(4), None),
        ));
        assert!(init.set_movie(broken).is_err());
        assert_eq!(init.movie(), &before);
        assert_eq!(init.tracks().get(1), Some(MediaKind::Video));

        init.set_movie(testutil::parse(testutil::moov(&[(5, b"soun")])))
            .unwrap();
        assert_eq!(init.tracks().get(1), None);
        assert_eq!(init.tracks().get(5), Some(MediaKind::Audio));
    }
}
