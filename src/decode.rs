// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Decoders for the legacy sample formats.
//!
//! Every reader turns a borrowed byte stream into a [`DecodedSample`] once, ahead
//! of playback. Readers are selected by [`SampleFormat`], either from a file
//! extension or by probing each reader in turn.

mod chunks;
pub mod chunked;
pub mod companded;
pub mod compressed;
pub mod delta;
pub mod error;

use std::fmt;
use std::time::Duration;

use tracing::debug;

pub use chunked::ChunkedContainerReader;
pub use companded::CompandedSampleReader;
pub use compressed::CompressedSampleReader;
pub use error::DecodeError;

/// Scale from 16-bit signed PCM to the floating-point playback range.
const I16_SCALE: f32 = 1.0 / 32768.0;

/// Loop region of a decoded sample, in sample frames. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPoints {
    pub start: usize,
    pub end: usize,
}

impl LoopPoints {
    /// Number of frames in the loop.
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Linear PCM produced by one of the format readers.
///
/// Samples are stored planar (one `Vec` per channel) as `f32` in `[-1.0, 1.0)`.
/// Once built the sample is read-only; voices share it through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    loop_points: Option<LoopPoints>,
    truncated: bool,
}

impl DecodedSample {
    /// Builds a sample from planar 16-bit PCM.
    ///
    /// Channels are cut to the shortest one. Loop points that break
    /// `start < end <= len` are dropped and the sample is marked truncated.
    pub fn from_i16(
        channels: Vec<Vec<i16>>,
        sample_rate: u32,
        loop_points: Option<LoopPoints>,
        truncated: bool,
    ) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| channel.into_iter().map(|s| s as f32 * I16_SCALE).collect())
            .collect();
        Self::new(channels, sample_rate, loop_points, truncated)
    }

    /// Builds a sample from planar floating-point PCM. See [`DecodedSample::from_i16`].
    pub fn new(
        mut channels: Vec<Vec<f32>>,
        sample_rate: u32,
        loop_points: Option<LoopPoints>,
        mut truncated: bool,
    ) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.truncate(frames);
        }

        let loop_points = match loop_points {
            Some(points) if points.start < points.end && points.end <= frames => Some(points),
            Some(points) => {
                debug!(
                    start = points.start,
                    end = points.end,
                    frames,
                    "Dropping loop points outside of the decoded sample"
                );
                truncated = true;
                None
            }
            None => None,
        };

        Self {
            channels,
            sample_rate,
            loop_points,
            truncated,
        }
    }

    /// A zero-length mono sample with no loop.
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            channels: vec![Vec::new()],
            sample_rate,
            loop_points: None,
            truncated: false,
        }
    }

    /// Number of frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Returns true if the sample holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of channels (1 or 2 for the supported formats).
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Native playback rate of the sample in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns true if the sample carries a loop region.
    pub fn has_loop(&self) -> bool {
        self.loop_points.is_some()
    }

    /// The loop region, if any.
    pub fn loop_points(&self) -> Option<LoopPoints> {
        self.loop_points
    }

    /// Returns true if decoding stopped early or hit an irregular stream.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// The PCM of one channel, or `None` if the channel doesn't exist.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Reads one frame value, returning silence outside the buffer.
    #[inline]
    pub fn frame(&self, channel: usize, index: usize) -> f32 {
        self.channels
            .get(channel)
            .and_then(|c| c.get(index))
            .copied()
            .unwrap_or(0.0)
    }

    /// Playback length at the native rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.len() as f64 / self.sample_rate as f64)
    }

    /// Memory held by the PCM buffers in bytes.
    pub fn memory_size(&self) -> usize {
        self.channels.iter().map(Vec::len).sum::<usize>() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
impl DecodedSample {
    /// Converts a channel back to 16-bit PCM (test only).
    pub fn pcm_i16(&self, channel: usize) -> Vec<i16> {
        self.channel(channel)
            .unwrap_or_default()
            .iter()
            .map(|s| (s * 32768.0) as i16)
            .collect()
    }
}

/// A reader for one of the legacy sample formats.
pub trait SampleDecoder: Send {
    /// The format this decoder reads.
    fn format(&self) -> SampleFormat;

    /// Decodes a complete byte stream.
    ///
    /// Framing that doesn't match the format yields [`DecodeError::FormatMismatch`].
    /// Recoverable faults produce a sample flagged with
    /// [`DecodedSample::is_truncated`] instead of an error.
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedSample, DecodeError>;

    /// Decodes a byte stream, answering a format mismatch with an empty sample.
    fn decode_or_empty(&mut self, bytes: &[u8]) -> DecodedSample {
        match self.decode(bytes) {
            Ok(sample) => sample,
            Err(e) => {
                debug!(err = %e, "Decoding as an empty sample");
                DecodedSample::empty(self.format().native_sample_rate())
            }
        }
    }
}

/// The supported legacy formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Block-structured delta-filter compression.
    Compressed,
    /// 8-bit logarithmic companding.
    Companded,
    /// Tagged, length-prefixed chunk container.
    Chunked,
}

impl SampleFormat {
    /// The order in which [`SampleFormat::probe`] tries readers. The companded
    /// format accepts any input, so it goes last.
    pub const PROBE_ORDER: [SampleFormat; 3] = [
        SampleFormat::Chunked,
        SampleFormat::Compressed,
        SampleFormat::Companded,
    ];

    /// Picks a format from a file extension (case-insensitive).
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "brr" => Some(SampleFormat::Compressed),
            "ul" | "ulaw" | "mu" => Some(SampleFormat::Companded),
            "8svx" | "svx" | "iff" => Some(SampleFormat::Chunked),
            _ => None,
        }
    }

    /// Creates a fresh decoder for this format.
    pub fn decoder(self) -> Box<dyn SampleDecoder> {
        match self {
            SampleFormat::Compressed => Box::new(CompressedSampleReader::new()),
            SampleFormat::Companded => Box::new(CompandedSampleReader::new()),
            SampleFormat::Chunked => Box::new(ChunkedContainerReader::new()),
        }
    }

    /// The sample rate samples of this format are reported at when the stream
    /// carries none.
    pub fn native_sample_rate(self) -> u32 {
        match self {
            SampleFormat::Compressed => compressed::COMPRESSED_SAMPLE_RATE,
            SampleFormat::Companded => companded::COMPANDED_SAMPLE_RATE,
            SampleFormat::Chunked => chunked::DEFAULT_CHUNKED_SAMPLE_RATE,
        }
    }

    /// Tries each reader in [`SampleFormat::PROBE_ORDER`] and returns the first
    /// successful decode along with its format.
    pub fn probe(bytes: &[u8]) -> Result<(SampleFormat, DecodedSample), DecodeError> {
        let mut last_error = None;
        for format in Self::PROBE_ORDER {
            match format.decoder().decode(bytes) {
                Ok(sample) => return Ok((format, sample)),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or(DecodeError::FormatMismatch {
            format: SampleFormat::Companded,
            len: bytes.len(),
        }))
    }

    fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Compressed => "compressed",
            SampleFormat::Companded => "companded",
            SampleFormat::Chunked => "chunked",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
