//! Upstream encoder processes
//!
//! An encoder turns a channel's input into a fragmented MP4 byte stream on
//! its stdout: `ftyp`, `moov`, then `moof`/`mdat` pairs until it exits.
//! [`FfmpegEncoder`] runs one `ffmpeg` child per relay instance; tests
//! plug in scripted encoders through the [`Encoder`] trait.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::registry::ChannelId;

/// Placeholder in [`EncoderConfig::args`] replaced by the channel id
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Starts encoder instances for channels
pub trait Encoder: Send + Sync + 'static {
    /// Start one encoder instance reading `channel`
    fn start(&self, channel: &ChannelId) -> Result<EncoderOutput>;
}

/// Byte stream produced by a running encoder
///
/// Owns the child process, if any; dropping the output kills it.
pub struct EncoderOutput {
    stream: Pin<Box<dyn AsyncRead + Send>>,
    child: Option<Child>,
}

impl EncoderOutput {
    /// Wrap an in-memory or otherwise process-less stream
    pub fn from_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            stream: Box::pin(reader),
            child: None,
        }
    }

    /// Wrap a spawned child, reading its stdout
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::EncoderStart("encoder stdout was not captured".into()))?;
        Ok(Self {
            stream: Box::pin(stdout),
            child: Some(child),
        })
    }

    /// OS process id of the encoder, while it runs
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

impl AsyncRead for EncoderOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl fmt::Debug for EncoderOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderOutput")
            .field("pid", &self.pid())
            .finish()
    }
}

/// Encoder command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Program to run
    pub program: String,

    /// Arguments; [`INPUT_PLACEHOLDER`] is replaced by the channel id
    pub args: Vec<String>,
}

impl Default for EncoderConfig {
    /// Transcode to H.264 + AC-3 in low-latency CMAF fragments
    fn default() -> Self {
        Self::with_codec_args(&[
            "-c:v",
            "libx264",
            "-preset",
            "fast",
            "-tune",
            "zerolatency",
            "-c:a",
            "ac3",
            "-b:a",
            "192k",
        ])
    }
}

impl EncoderConfig {
    /// Remux without transcoding, for inputs already in H.264/AAC
    pub fn passthrough() -> Self {
        Self::with_codec_args(&["-c", "copy", "-bsf:a", "aac_adtstoasc"])
    }

    fn with_codec_args(codec: &[&str]) -> Self {
        let mut args: Vec<String> = ["-hide_banner", "-v", "quiet", "-re", "-i", INPUT_PLACEHOLDER, "-f", "mp4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(codec.iter().map(|s| s.to_string()));
        args.extend(
            [
                "-movflags",
                "cmaf+separate_moof+delay_moov+skip_trailer+frag_every_frame",
                "-",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        Self {
            program: "ffmpeg".to_string(),
            args,
        }
    }

    /// Set the program
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Replace the argument template
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments for one run with `input` substituted
    pub fn command_args(&self, input: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, input))
            .collect()
    }
}

/// Runs an external encoder (by default `ffmpeg`) per relay instance
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    /// Create an encoder with the default transcode preset
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder from a custom command line
    pub fn with_config(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Get the command line configuration
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

impl Encoder for FfmpegEncoder {
    fn start(&self, channel: &ChannelId) -> Result<EncoderOutput> {
        let child = Command::new(&self.config.program)
            .args(self.config.command_args(channel.as_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::EncoderStart(format!("{}: {}", self.config.program, e)))?;

        tracing::debug!(
            channel = %channel,
            program = %self.config.program,
            pid = ?child.id(),
            "Encoder spawned"
        );

        EncoderOutput::from_child(child)
    }
}
