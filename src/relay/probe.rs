//! Bounded bootstrap of a new channel
//!
//! The probe starts the encoder and waits for its initialization segment.
//! The reader is handed back positioned right after it, so the first relay
//! instance continues with the first fragment instead of starting a second
//! encoder.

use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::media::{BoxReader, BoxType, InitSegment};
use crate::registry::{ChannelId, RegistryConfig};

use super::encoder::{Encoder, EncoderOutput};

/// A started encoder whose initialization segment has been read
#[derive(Debug)]
pub struct Probe {
    pub init: InitSegment,
    pub reader: BoxReader<EncoderOutput>,
}

/// Start an encoder for `channel` and read its initialization segment
///
/// Fails with [`Error::ProbeTimeout`] when the encoder has not produced
/// both `ftyp` and `moov` within `config.probe_timeout`. The encoder is
/// stopped on any failure.
pub async fn probe<E: Encoder>(
    encoder: &E,
    channel: &ChannelId,
    config: &RegistryConfig,
) -> Result<Probe> {
    let output = encoder.start(channel)?;
    let mut reader = BoxReader::with_max_box_size(output, config.max_box_size);

    let init = tokio::time::timeout(config.probe_timeout, read_init_segment(&mut reader))
        .await
        .map_err(|_| Error::ProbeTimeout(config.probe_timeout))??;

    tracing::debug!(
        channel = %channel,
        tracks = init.tracks().len(),
        init_size = init.size(),
        "Probe complete"
    );

    Ok(Probe { init, reader })
}

/// Read boxes until both `ftyp` and `moov` were seen
///
/// Unrelated boxes before them are skipped; a fragment before the `moov`
/// is a protocol violation.
pub async fn read_init_segment<R: AsyncRead + Unpin>(
    reader: &mut BoxReader<R>,
) -> Result<InitSegment> {
    let mut file_type = None;
    let mut movie = None;

    loop {
        let mp4 = reader.read_box().await?.ok_or(Error::IncompleteInit)?;

        match mp4.box_type() {
            BoxType::FileType => file_type = Some(mp4),
            BoxType::Movie => movie = Some(mp4),
            found @ (BoxType::MovieFragment | BoxType::MediaData) => {
                return Err(Error::ProtocolViolation {
                    expected: BoxType::Movie,
                    found,
                });
            }
            other => tracing::trace!(box_type = %other, "Skipping box before init segment"),
        }

        if let (Some(file_type), Some(movie)) = (&file_type, &movie) {
            return Ok(InitSegment::new(file_type.clone(), movie.clone())?);
        }
    }
}
