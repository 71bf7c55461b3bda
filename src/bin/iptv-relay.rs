//! Command line front-end for the IPTV relay
//!
//! ```text
//! iptv-relay relay <CHANNEL> [--track video|audio|both] [--output FILE]
//! iptv-relay inspect <FILE>
//! ```
//!
//! `relay` subscribes an in-process session to a channel and writes the
//! received objects as one fragmented MP4 stream, ready to be piped into a
//! player:
//!
//!   iptv-relay relay http://example.com/live/ch1.m3u8 | ffplay -
//!
//! `inspect` lists the top-level boxes of a captured stream with the track
//! each fragment belongs to.
//!
//! Logs go to stderr; set `RUST_LOG` to adjust them.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use iptv_moq::media::{build_track_index, classify, BoxReader, BoxType, MediaKind, TrackIndex};
use iptv_moq::registry::{ChannelId, TrackName, INIT_OBJECT_COUNT};
use iptv_moq::transport::{Object, TransportError};
use iptv_moq::{
    ChannelRegistry, EncoderConfig, FfmpegEncoder, RegistryConfig, Session, TrackReader,
};

#[derive(Parser)]
#[command(name = "iptv-relay")]
#[command(version, about = "Relay live IPTV channels as fragmented MP4 objects")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to a channel and write its stream to stdout or a file
    Relay {
        /// Channel id, the encoder input (URL or file path)
        channel: String,

        /// Tracks to receive
        #[arg(long, value_enum, default_value_t = TrackChoice::Both)]
        track: TrackChoice,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Remux without transcoding (H.264/AAC inputs)
        #[arg(long)]
        passthrough: bool,

        /// Encoder program
        #[arg(long, default_value = "ffmpeg")]
        program: String,

        /// Seconds the encoder gets to emit its initialization segment
        #[arg(long, default_value_t = 10)]
        probe_timeout: u64,
    },

    /// List the boxes and tracks of a captured fragmented MP4 file
    Inspect {
        /// File to inspect
        file: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TrackChoice {
    Video,
    Audio,
    Both,
}

impl TrackChoice {
    fn tracks(self) -> &'static [TrackName] {
        match self {
            TrackChoice::Video => &[TrackName::Video],
            TrackChoice::Audio => &[TrackName::Audio],
            TrackChoice::Both => &[TrackName::Video, TrackName::Audio],
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "iptv_moq=debug" } else { "iptv_moq=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    match cli.command {
        Commands::Relay {
            channel,
            track,
            output,
            passthrough,
            program,
            probe_timeout,
        } => {
            let encoder_config = if passthrough {
                EncoderConfig::passthrough()
            } else {
                EncoderConfig::default()
            };
            let encoder = FfmpegEncoder::with_config(encoder_config.program(program));
            let config = RegistryConfig::default().probe_timeout(Duration::from_secs(probe_timeout));
            let registry = ChannelRegistry::with_encoder(encoder, config);

            let result = relay(&registry, ChannelId::new(channel), track, output).await;
            registry.shutdown().await;
            result
        }
        Commands::Inspect { file } => inspect(file).await,
    }
}

async fn relay(
    registry: &ChannelRegistry<FfmpegEncoder>,
    channel: ChannelId,
    choice: TrackChoice,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::new(1);

    let mut video = None;
    let mut audio = None;
    for track in choice.tracks() {
        let request = track.request(registry, &channel);
        let reader = registry.handle_subscription(&session, &request).await?;
        match track {
            TrackName::Video => video = Some(reader),
            TrackName::Audio => audio = Some(reader),
        }
    }

    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    copy_objects(video, audio, &mut out, tokio::signal::ctrl_c()).await?;
    Ok(())
}

/// Write objects from the readers to `out` until a track ends or `shutdown`
/// completes
///
/// Returns the number of objects written.
async fn copy_objects<W, S>(
    mut video: Option<TrackReader>,
    mut audio: Option<TrackReader>,
    out: &mut W,
    shutdown: S,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
    S: Future,
{
    // Both readers start with the same init segment; write it once.
    let skip_audio_init = video.is_some() && audio.is_some();
    let mut written: u64 = 0;

    tokio::pin!(shutdown);

    loop {
        let (track, result) = tokio::select! {
            result = next_object(video.as_mut()) => (TrackName::Video, result),
            result = next_object(audio.as_mut()) => (TrackName::Audio, result),
            _ = &mut shutdown => {
                tracing::info!(objects = written, "Interrupted");
                break;
            }
        };

        match result {
            Ok(object) => {
                if track == TrackName::Audio && skip_audio_init && object.object_id < INIT_OBJECT_COUNT {
                    continue;
                }
                out.write_all(&object.payload).await?;
                written += 1;
            }
            Err(TransportError::Lagged(skipped)) => {
                tracing::warn!(track = %track, skipped = skipped, "Output fell behind, objects lost");
            }
            Err(e) => {
                tracing::info!(track = %track, reason = %e, objects = written, "Track ended");
                break;
            }
        }
    }

    out.flush().await?;
    Ok(written)
}

async fn next_object(reader: Option<&mut TrackReader>) -> Result<Object, TransportError> {
    match reader {
        Some(reader) => reader.read_object().await,
        None => std::future::pending().await,
    }
}

async fn inspect(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let file = tokio::fs::File::open(&path).await?;
    let mut reader = BoxReader::new(file);
    let mut tracks: Option<TrackIndex> = None;
    let mut fragments = [0u64; 3];

    println!("{}", path.display());

    loop {
        let offset = reader.position();
        let Some(mp4) = reader.read_box().await? else {
            break;
        };

        match mp4.box_type() {
            BoxType::Movie => {
                println!("{:>10}  {}  {:>8} bytes", offset, mp4.box_type(), mp4.size());
                let index = build_track_index(&mp4)?;
                for (id, kind) in index.iter() {
                    println!("{:>10}    track {:<4} {}", "", id, kind);
                }
                tracks = Some(index);
            }
            BoxType::MovieFragment => {
                let label = match &tracks {
                    Some(index) => match classify(&mp4, index) {
                        Ok(kind) => {
                            fragments[kind_slot(kind)] += 1;
                            kind.to_string()
                        }
                        Err(e) => e.to_string(),
                    },
                    None => "before moov".to_string(),
                };
                println!("{:>10}  {}  {:>8} bytes  {}", offset, mp4.box_type(), mp4.size(), label);
            }
            other => println!("{:>10}  {}  {:>8} bytes", offset, other, mp4.size()),
        }
    }

    println!(
        "{} boxes, {} bytes; fragments: video={} audio={} other={}",
        reader.boxes_read(),
        reader.position(),
        fragments[kind_slot(MediaKind::Video)],
        fragments[kind_slot(MediaKind::Audio)],
        fragments[kind_slot(MediaKind::Other)],
    );
    Ok(())
}

fn kind_slot(kind: MediaKind) -> usize {
    match kind {
        MediaKind::Video => 0,
        MediaKind::Audio => 1,
        MediaKind::Other => 2,
    }
}
