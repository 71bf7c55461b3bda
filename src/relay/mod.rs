//! Encoder supervision and the per-channel relay loop
//!
//! [`probe`] starts an encoder and reads its initialization segment; the
//! relay task then turns the rest of the stream into objects:
//!
//! ```text
//!   encoder stdout ──► BoxReader ──► ftyp/moov ──► channel init cache
//!                                └─► moof+mdat ──► classify ──► video | audio track
//! ```

pub mod encoder;
pub mod probe;
pub mod run;

pub use encoder::{Encoder, EncoderConfig, EncoderOutput, FfmpegEncoder, INPUT_PLACEHOLDER};
pub use probe::{probe, read_init_segment, Probe};
pub use run::{RelayExit, RelayLoop};

pub(crate) use run::run_relay;
