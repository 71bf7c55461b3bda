//! Box builders and a scripted encoder for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::media::Mp4Box;
use crate::registry::{Channel, ChannelId, RelayStatus};
use crate::relay::{Encoder, EncoderOutput};

/// Serialize a box with a compact header
pub fn mp4_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(payload);
    out
}

/// Parse bytes holding exactly one box
pub fn parse(raw: Vec<u8>) -> Mp4Box {
    Mp4Box::parse(&Bytes::from(raw)).unwrap()
}

pub fn ftyp() -> Vec<u8> {
    mp4_box(b"ftyp", b"isom\0\0\x02\0isom")
}

/// `mdat` with `payload_len` bytes of payload
pub fn mdat(payload_len: usize) -> Vec<u8> {
    mp4_box(b"mdat", &vec![0xAB; payload_len])
}

/// Version 0 `tkhd`
pub fn tkhd(track_id: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 84];
    payload[12..16].copy_from_slice(&track_id.to_be_bytes());
    mp4_box(b"tkhd", &payload)
}

/// Version 1 `tkhd` with 64-bit times
pub fn tkhd_v1(track_id: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 96];
    payload[0] = 1;
    payload[20..24].copy_from_slice(&track_id.to_be_bytes());
    mp4_box(b"tkhd", &payload)
}

pub fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut payload = vec![0u8; 8];
    payload.extend_from_slice(handler);
    payload.extend_from_slice(&[0u8; 12]);
    payload.push(0);
    mp4_box(b"hdlr", &payload)
}

/// `trak` from a ready `tkhd`, with an `hdlr` only when `handler` is set
pub fn trak_with(tkhd: Vec<u8>, handler: Option<&[u8; 4]>) -> Vec<u8> {
    let mut mdia = mp4_box(b"mdhd", &[0u8; 24]);
    if let Some(handler) = handler {
        mdia.extend(hdlr(handler));
    }

    let mut payload = tkhd;
    payload.extend(mp4_box(b"mdia", &mdia));
    mp4_box(b"trak", &payload)
}

pub fn trak(track_id: u32, handler: &[u8; 4]) -> Vec<u8> {
    trak_with(tkhd(track_id), Some(handler))
}

pub fn moov(tracks: &[(u32, &[u8; 4])]) -> Vec<u8> {
    let mut payload = mp4_box(b"mvhd", &[0u8; 100]);
    for (id, handler) in tracks {
        payload.extend(trak(*id, handler));
    }
    mp4_box(b"moov", &payload)
}

pub fn moof(track_id: u32) -> Vec<u8> {
    let mut tfhd = vec![0, 0x02, 0, 0];
    tfhd.extend_from_slice(&track_id.to_be_bytes());

    let mut traf = mp4_box(b"tfhd", &tfhd);
    traf.extend(mp4_box(b"tfdt", &[0u8; 12]));

    let mut payload = mp4_box(b"mfhd", &[0u8; 8]);
    payload.extend(mp4_box(b"traf", &traf));
    mp4_box(b"moof", &payload)
}

/// `moof` + `mdat` for one track
pub fn fragment(track_id: u32, mdat_len: usize) -> Vec<u8> {
    let mut out = moof(track_id);
    out.extend(mdat(mdat_len));
    out
}

/// `ftyp` + `moov` with video on track 1 and audio on track 2
pub fn av_init() -> Vec<u8> {
    let mut out = ftyp();
    out.extend(moov(&[(1, b"vide"), (2, b"soun")]));
    out
}

/// Encoder replaying queued outputs, one per start, per channel
#[derive(Clone, Default)]
pub struct ScriptedEncoder {
    scripts: Arc<Mutex<HashMap<String, VecDeque<EncoderOutput>>>>,
    starts: Arc<AtomicUsize>,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for the next start of `channel`
    pub fn push(&self, channel: &str, output: EncoderOutput) {
        self.scripts
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push_back(output);
    }

    /// Queue a finite byte stream for the next start of `channel`
    pub fn push_bytes(&self, channel: &str, data: Vec<u8>) {
        self.push(channel, EncoderOutput::from_reader(std::io::Cursor::new(data)));
    }

    /// Queue a stream the test keeps writing to
    pub fn push_live(&self, channel: &str) -> tokio::io::DuplexStream {
        let (tx, rx) = tokio::io::duplex(64 * 1024);
        self.push(channel, EncoderOutput::from_reader(rx));
        tx
    }

    /// Encoder instances started so far, across channels
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Encoder for ScriptedEncoder {
    fn start(&self, channel: &ChannelId) -> Result<EncoderOutput> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(channel.as_str())
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| Error::EncoderStart(format!("no script left for {}", channel)))
    }
}

/// Wait until the channel's relay reaches `status`
pub async fn wait_for_relay(channel: &Channel, status: RelayStatus) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while channel.relay_status().await != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay did not reach the expected state");
}
