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

//! Reader for the tagged-chunk sample container.
//!
//! A container is a run of chunks, each a 4-byte ASCII tag, a big-endian
//! 32-bit payload length, and the payload padded to a 4-byte boundary. The pad
//! is not counted in the length. Recognized chunks:
//!
//! - `FORM`: a group; a 4-byte form type followed by nested chunks.
//! - `VHDR`: voice header with loop lengths, sample rate, and compression.
//! - `CHAN`: channel layout (2 = left, 4 = right, 6 = stereo).
//! - `BODY`: signed 8-bit PCM, stereo stored as the left half then the right.
//!
//! Anything else is skipped by its declared length.

use tracing::{debug, trace, warn};

use super::error::DecodeError;
use super::{DecodedSample, LoopPoints, SampleDecoder, SampleFormat};

/// Rate used when the container carries no voice header.
pub const DEFAULT_CHUNKED_SAMPLE_RATE: u32 = 8363;

/// Payload alignment in bytes.
pub const CHUNK_ALIGNMENT: usize = 4;

const CHUNK_HEADER_BYTES: usize = 8;
const VHDR_BYTES: usize = 20;
const CHANNEL_STEREO: u32 = 6;

/// Deepest `FORM` nesting walked. Real containers use one or two levels.
pub const MAX_FORM_DEPTH: usize = 4;

const TAG_FORM: [u8; 4] = *b"FORM";
const TAG_VHDR: [u8; 4] = *b"VHDR";
const TAG_CHAN: [u8; 4] = *b"CHAN";
const TAG_BODY: [u8; 4] = *b"BODY";

/// Deltas for the Fibonacci-delta body compression.
const FIBONACCI_DELTAS: [i8; 16] = [-34, -21, -13, -8, -5, -3, -2, -1, 0, 1, 2, 3, 5, 8, 13, 21];

/// One chunk found while walking the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk<'a> {
    pub tag: [u8; 4],
    /// The payload, cut short if the declared length overran the stream.
    pub payload: &'a [u8],
    /// False when the declared length ran past the end of the stream.
    pub complete: bool,
}

/// Iterates over the chunks of a buffer. Stops at the first malformed header
/// or overrunning chunk and remembers that it did.
pub(crate) struct ChunkWalker<'a> {
    data: &'a [u8],
    position: usize,
    corrupt: bool,
}

impl<'a> ChunkWalker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            corrupt: false,
        }
    }

    /// Offset of the next chunk header.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns true if walking stopped on a malformed or overrunning chunk.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }
}

impl<'a> Iterator for ChunkWalker<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.data.get(self.position..)?;
        if remaining.is_empty() {
            return None;
        }
        if remaining.len() < CHUNK_HEADER_BYTES || !is_tag(&remaining[..4]) {
            self.corrupt = true;
            self.position = self.data.len();
            return None;
        }

        let tag = [remaining[0], remaining[1], remaining[2], remaining[3]];
        let declared = read_u32(&remaining[4..8]) as usize;
        let payload = &remaining[CHUNK_HEADER_BYTES..];

        if declared > payload.len() {
            self.corrupt = true;
            self.position = self.data.len();
            return Some(Chunk {
                tag,
                payload,
                complete: false,
            });
        }

        // A pad that runs past the end of the stream is tolerated.
        let padded = declared.next_multiple_of(CHUNK_ALIGNMENT);
        self.position = (self.position + CHUNK_HEADER_BYTES + padded).min(self.data.len());

        Some(Chunk {
            tag,
            payload: &payload[..declared],
            complete: true,
        })
    }
}

fn is_tag(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| (0x20..=0x7E).contains(b))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// The fields of a `VHDR` chunk this reader uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VoiceHeader {
    one_shot_samples: u32,
    repeat_samples: u32,
    sample_rate: u16,
    compression: u8,
}

impl VoiceHeader {
    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < VHDR_BYTES {
            return None;
        }
        Some(Self {
            one_shot_samples: read_u32(&payload[0..4]),
            repeat_samples: read_u32(&payload[4..8]),
            sample_rate: u16::from_be_bytes([payload[12], payload[13]]),
            compression: payload[15],
        })
    }

    /// Frames in the first octave, or `None` if the header leaves it open.
    fn frames(&self) -> Option<usize> {
        let frames = self.one_shot_samples as usize + self.repeat_samples as usize;
        (frames > 0).then_some(frames)
    }

    fn loop_points(&self) -> Option<LoopPoints> {
        (self.repeat_samples > 0).then(|| LoopPoints {
            start: self.one_shot_samples as usize,
            end: self.one_shot_samples as usize + self.repeat_samples as usize,
        })
    }
}

/// Everything collected while walking a container.
#[derive(Default)]
struct ParsedContainer<'a> {
    header: Option<VoiceHeader>,
    stereo: bool,
    body: Option<&'a [u8]>,
    /// Set once any recognized chunk turns up.
    recognized: bool,
    corrupt: bool,
}

impl<'a> ParsedContainer<'a> {
    fn walk(&mut self, data: &'a [u8], depth: usize) {
        let mut walker = ChunkWalker::new(data);
        for chunk in walker.by_ref() {
            if matches!(chunk.tag, TAG_FORM | TAG_VHDR | TAG_CHAN | TAG_BODY) {
                self.recognized = true;
            }
            match chunk.tag {
                TAG_FORM if depth >= MAX_FORM_DEPTH => {
                    debug!(depth, "Container nested too deeply, skipping group");
                    self.corrupt = true;
                }
                TAG_FORM => match chunk.payload.get(4..) {
                    Some(nested) => self.walk(nested, depth + 1),
                    None => self.corrupt = true,
                },
                TAG_VHDR => match VoiceHeader::parse(chunk.payload) {
                    Some(header) => self.header = Some(header),
                    None => self.corrupt = true,
                },
                TAG_CHAN => match chunk.payload.get(..4) {
                    Some(layout) => self.stereo = read_u32(layout) == CHANNEL_STEREO,
                    None => self.corrupt = true,
                },
                TAG_BODY => self.body = Some(chunk.payload),
                tag => trace!(tag = %String::from_utf8_lossy(&tag), "Skipping chunk"),
            }
        }
        self.corrupt |= walker.is_corrupt();
    }
}

/// Widens signed 8-bit PCM to 16 bits.
fn widen(body: &[u8]) -> Vec<i16> {
    body.iter().map(|&b| i16::from(b as i8) << 8).collect()
}

/// Expands a Fibonacci-delta body: a pad byte, the initial value, then two
/// 4-bit delta codes per byte, high nibble first.
fn fibonacci_unpack(body: &[u8]) -> Vec<i16> {
    let Some((&initial, codes)) = body.get(1..).and_then(<[u8]>::split_first) else {
        return Vec::new();
    };

    let mut value = initial as i8;
    let mut out = Vec::with_capacity(codes.len() * 2);
    for &byte in codes {
        for code in [byte >> 4, byte & 0x0F] {
            value = value.wrapping_add(FIBONACCI_DELTAS[usize::from(code)]);
            out.push(i16::from(value) << 8);
        }
    }
    out
}

/// Decodes the tagged-chunk container.
#[derive(Default)]
pub struct ChunkedContainerReader;

impl ChunkedContainerReader {
    pub fn new() -> Self {
        Self
    }
}

impl SampleDecoder for ChunkedContainerReader {
    fn format(&self) -> SampleFormat {
        SampleFormat::Chunked
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedSample, DecodeError> {
        let mismatch = || {
            debug!(len = bytes.len(), "Input is not a chunk container");
            DecodeError::FormatMismatch {
                format: SampleFormat::Chunked,
                len: bytes.len(),
            }
        };

        // The first chunk has to fit in the stream, otherwise any printable
        // prefix would pass for a tag.
        match ChunkWalker::new(bytes).next() {
            Some(first) if first.complete => {}
            _ => return Err(mismatch()),
        }

        let mut parsed = ParsedContainer::default();
        parsed.walk(bytes, 0);
        if !parsed.recognized {
            return Err(mismatch());
        }

        let compressed = parsed.header.is_some_and(|h| h.compression == 1);
        let body = parsed.body.unwrap_or_default();
        let halves: Vec<&[u8]> = if parsed.stereo {
            let (left, right) = body.split_at(body.len() / 2);
            vec![left, right]
        } else {
            vec![body]
        };

        let mut channels: Vec<Vec<i16>> = halves
            .into_iter()
            .map(|half| {
                if compressed {
                    fibonacci_unpack(half)
                } else {
                    widen(half)
                }
            })
            .collect();

        // Multi-octave bodies: keep the first octave only.
        if let Some(frames) = parsed.header.and_then(|h| h.frames()) {
            for channel in channels.iter_mut() {
                channel.truncate(frames);
            }
        }

        let sample_rate = match parsed.header.map(|h| h.sample_rate) {
            Some(rate) if rate > 0 => u32::from(rate),
            _ => DEFAULT_CHUNKED_SAMPLE_RATE,
        };
        let loop_points = parsed.header.and_then(|h| h.loop_points());

        let sample = DecodedSample::from_i16(channels, sample_rate, loop_points, parsed.corrupt);
        if sample.is_truncated() {
            warn!(
                len = bytes.len(),
                frames = sample.len(),
                "Chunk container is truncated or corrupt"
            );
        }

        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = tag.to_vec();
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes.resize(bytes.len().next_multiple_of(CHUNK_ALIGNMENT), 0);
        bytes
    }

    fn vhdr(one_shot: u32, repeat: u32, rate: u16, compression: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&one_shot.to_be_bytes());
        payload.extend_from_slice(&repeat.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&rate.to_be_bytes());
        payload.push(1);
        payload.push(compression);
        payload.extend_from_slice(&0x10000u32.to_be_bytes());
        chunk(b"VHDR", &payload)
    }

    fn form(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = b"8SVX".to_vec();
        for c in chunks {
            payload.extend_from_slice(c);
        }
        chunk(b"FORM", &payload)
    }

    fn decode(bytes: &[u8]) -> DecodedSample {
        ChunkedContainerReader::new().decode(bytes).unwrap()
    }

    #[test]
    fn test_unknown_chunk_skips_padding() {
        let mut bytes = b"ANNO".to_vec();
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(b"abcdef");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend(chunk(b"BODY", &[1, 2, 3, 4]));

        let mut walker = ChunkWalker::new(&bytes);
        let first = walker.next().unwrap();
        assert_eq!(&first.tag, b"ANNO");
        assert_eq!(first.payload, b"abcdef");
        assert_eq!(walker.position(), 16);

        let second = walker.next().unwrap();
        assert_eq!(&second.tag, b"BODY");
        assert!(walker.next().is_none());
        assert!(!walker.is_corrupt());

        assert_eq!(decode(&bytes).len(), 4);
    }

    #[test]
    fn test_mono_with_loop() {
        let body: Vec<u8> = (0..64u8).collect();
        let bytes = form(&[vhdr(16, 32, 11025, 0), chunk(b"BODY", &body)]);
        let sample = decode(&bytes);

        assert_eq!(sample.len(), 48);
        assert_eq!(sample.channel_count(), 1);
        assert_eq!(sample.sample_rate(), 11025);
        assert_eq!(sample.loop_points(), Some(LoopPoints { start: 16, end: 48 }));
        assert!(!sample.is_truncated());
        assert_eq!(sample.pcm_i16(0)[1], 256);
    }

    #[test]
    fn test_one_shot_has_no_loop() {
        let bytes = form(&[vhdr(4, 0, 8000, 0), chunk(b"BODY", &[0x80, 0x7F, 0, 1])]);
        let sample = decode(&bytes);
        assert!(!sample.has_loop());
        assert_eq!(sample.pcm_i16(0), vec![-32768, 32512, 0, 256]);
    }

    #[test]
    fn test_stereo_body_is_split() {
        let bytes = form(&[
            vhdr(0, 0, 8000, 0),
            chunk(b"CHAN", &6u32.to_be_bytes()),
            chunk(b"BODY", &[1, 2, 3, 0xFF, 0xFE, 0xFD]),
        ]);
        let sample = decode(&bytes);
        assert_eq!(sample.channel_count(), 2);
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.pcm_i16(0), vec![256, 512, 768]);
        assert_eq!(sample.pcm_i16(1), vec![-256, -512, -768]);
    }

    #[test]
    fn test_missing_header_uses_default_rate() {
        let sample = decode(&chunk(b"BODY", &[0; 8]));
        assert_eq!(sample.sample_rate(), DEFAULT_CHUNKED_SAMPLE_RATE);
        assert!(!sample.has_loop());
    }

    #[test]
    fn test_truncated_body_keeps_partial_pcm() {
        let mut bytes = vhdr(0, 0, 8000, 0);
        bytes.extend_from_slice(b"BODY");
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4, 5]);

        let sample = decode(&bytes);
        assert!(sample.is_truncated());
        assert_eq!(sample.pcm_i16(0), vec![256, 512, 768, 1024, 1280]);
    }

    #[test]
    fn test_overrun_stops_walking() {
        let mut bytes = chunk(b"BODY", &[9, 9, 9, 9]);
        bytes.extend_from_slice(b"ANNO");
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend(chunk(b"BODY", &[1; 4]));

        let sample = decode(&bytes);
        assert!(sample.is_truncated());
        // The second BODY sits inside the overrunning chunk and is never seen.
        assert_eq!(sample.pcm_i16(0), vec![2304; 4]);
    }

    #[test]
    fn test_garbage_after_chunks_is_corrupt() {
        let mut bytes = chunk(b"BODY", &[1; 4]);
        bytes.extend_from_slice(&[0x00, 0x01, 0x02]);
        let sample = decode(&bytes);
        assert!(sample.is_truncated());
        assert_eq!(sample.len(), 4);
    }

    #[test]
    fn test_loop_past_body_is_dropped() {
        let bytes = form(&[vhdr(4, 100, 8000, 0), chunk(b"BODY", &[0; 8])]);
        let sample = decode(&bytes);
        assert!(!sample.has_loop());
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_short_voice_header_is_corrupt() {
        let bytes = form(&[chunk(b"VHDR", &[0; 8]), chunk(b"BODY", &[0; 4])]);
        let sample = decode(&bytes);
        assert!(sample.is_truncated());
        assert_eq!(sample.sample_rate(), DEFAULT_CHUNKED_SAMPLE_RATE);
    }

    #[test]
    fn test_fibonacci_delta_body() {
        // pad, initial 0, codes: +1 (9), +21 (15), -34 (0), 0 (8)
        let bytes = form(&[vhdr(0, 0, 8000, 1), chunk(b"BODY", &[0, 0, 0x9F, 0x08])]);
        let sample = decode(&bytes);
        assert_eq!(sample.pcm_i16(0), vec![256, 22 * 256, -12 * 256, -12 * 256]);
    }

    #[test]
    fn test_not_a_container() {
        let mut reader = ChunkedContainerReader::new();
        assert!(reader.decode(&[0x00; 16]).is_err());
        assert!(reader.decode(b"BODY").is_err());
    }

    #[test]
    fn test_overrunning_first_chunk_is_not_a_container() {
        let mut bytes = b"@ABC".to_vec();
        bytes.extend_from_slice(&[0x44, 0x45, 0x46, 0x47]);
        bytes.extend_from_slice(&[0; 10]);
        let result = ChunkedContainerReader::new().decode(&bytes);
        assert!(matches!(result, Err(DecodeError::FormatMismatch { .. })));
    }

    #[test]
    fn test_only_unknown_chunks_is_not_a_container() {
        let mut bytes = chunk(b"ANNO", b"hello");
        bytes.extend(chunk(b"AUTH", b"me"));
        let result = ChunkedContainerReader::new().decode(&bytes);
        assert!(matches!(result, Err(DecodeError::FormatMismatch { .. })));
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let mut bytes = form(&[vhdr(0, 0, 8000, 0), chunk(b"BODY", &[1; 4])]);
        for _ in 0..MAX_FORM_DEPTH {
            bytes = form(&[bytes]);
        }
        // The body sits one level past the cap and is never reached.
        let sample = decode(&bytes);
        assert!(sample.is_truncated());
        assert!(sample.is_empty());

        // Deeply nested input returns instead of exhausting the stack.
        let levels = 100_000;
        let body = chunk(b"BODY", &[1; 4]);
        let total = levels * 12 + body.len();
        let mut deep = Vec::with_capacity(total);
        for level in 0..levels {
            deep.extend_from_slice(b"FORM");
            deep.extend_from_slice(&((total - level * 12 - 8) as u32).to_be_bytes());
            deep.extend_from_slice(b"8SVX");
        }
        deep.extend(body);
        let sample = decode(&deep);
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_nesting_within_cap_is_walked() {
        let mut bytes = form(&[vhdr(0, 0, 8000, 0), chunk(b"BODY", &[1; 4])]);
        for _ in 1..MAX_FORM_DEPTH {
            bytes = form(&[bytes]);
        }
        let sample = decode(&bytes);
        assert!(!sample.is_truncated());
        assert_eq!(sample.len(), 4);
    }
}
