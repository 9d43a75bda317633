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

//! Reader for the block-compressed sample format.
//!
//! A stream is a sequence of 9-byte blocks, optionally preceded by a 2-byte
//! little-endian loop header holding the byte offset of the loop start block.
//! Each block carries a header byte followed by 8 bytes of packed nibbles,
//! decoding to 16 samples:
//!
//! ```text
//! bit   7 6 5 4   3 2      1      0
//!       shift     filter   loop   end
//! ```

use bitflags::bitflags;
use tracing::{debug, warn};

use super::chunks::PaddedChunks;
use super::delta::{sign_extend_nibble, DeltaFilterDecoder, FilterType};
use super::error::DecodeError;
use super::{DecodedSample, LoopPoints, SampleDecoder, SampleFormat};
use crate::fixed_point::byte_position_to_sample_position;

/// Native playback rate of compressed samples in Hz.
pub const COMPRESSED_SAMPLE_RATE: u32 = 16744;

/// Bytes in one compressed block.
pub const BLOCK_BYTES: usize = 9;

/// Samples decoded from one block.
pub const BLOCK_SAMPLES: usize = 16;

/// Size of the optional loop header.
pub const LOOP_HEADER_BYTES: usize = 2;

/// Offset of the loop end from the start of the block carrying the end flag.
const LOOP_END_OFFSET: usize = 7;

/// Blocks read per scratch window.
const CHUNK_BLOCKS: usize = 64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct BlockHeader: u8 {
        const SHIFT  = 0b1111_0000;
        const FILTER = 0b0000_1100;
        const LOOP   = 0b0000_0010;
        const END    = 0b0000_0001;
    }
}

impl BlockHeader {
    fn shift(self) -> u8 {
        (self & BlockHeader::SHIFT).bits() >> 4
    }

    fn filter(self) -> FilterType {
        FilterType::from_code((self & BlockHeader::FILTER).bits() >> 2)
    }

    fn end(self) -> bool {
        self.contains(BlockHeader::END)
    }

    fn do_loop(self) -> bool {
        self.contains(BlockHeader::LOOP)
    }
}

/// How the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// The final block set both the end and loop flags.
    Looping { block: usize },
    /// The stream ended without looping.
    OneShot,
}

/// Splits the optional loop header from the block data. Returns `None` when the
/// length fits neither framing.
fn split_loop_header(bytes: &[u8]) -> Option<(Option<u16>, &[u8])> {
    if bytes.len() % BLOCK_BYTES == 0 {
        Some((None, bytes))
    } else if bytes.len() % BLOCK_BYTES == LOOP_HEADER_BYTES {
        let offset = u16::from_le_bytes([bytes[0], bytes[1]]);
        Some((Some(offset), &bytes[LOOP_HEADER_BYTES..]))
    } else {
        None
    }
}

/// Decodes the block-compressed format into mono PCM.
pub struct CompressedSampleReader {
    scratch: Vec<u8>,
    decoder: DeltaFilterDecoder,
}

impl CompressedSampleReader {
    pub fn new() -> Self {
        Self {
            scratch: vec![0; CHUNK_BLOCKS * BLOCK_BYTES],
            decoder: DeltaFilterDecoder::new(),
        }
    }
}

impl Default for CompressedSampleReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleDecoder for CompressedSampleReader {
    fn format(&self) -> SampleFormat {
        SampleFormat::Compressed
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedSample, DecodeError> {
        let Some((loop_offset, blocks)) = split_loop_header(bytes) else {
            debug!(len = bytes.len(), "Input is not block-compressed");
            return Err(DecodeError::FormatMismatch {
                format: SampleFormat::Compressed,
                len: bytes.len(),
            });
        };

        let block_count = blocks.len() / BLOCK_BYTES;
        let mut pcm: Vec<i16> = Vec::with_capacity(block_count * BLOCK_SAMPLES);
        let mut irregular = false;
        let mut stream_end = None;
        let mut block_index = 0;

        self.decoder.reset();
        let mut chunks = PaddedChunks::new(blocks, &mut self.scratch);
        'blocks: while let Some((window, valid)) = chunks.next_chunk() {
            let padded_len = valid.div_ceil(BLOCK_BYTES) * BLOCK_BYTES;
            for block in window[..padded_len].chunks_exact(BLOCK_BYTES) {
                let header = BlockHeader::from_bits_retain(block[0]);
                self.decoder.set_filter(header.filter());
                for &data in &block[1..] {
                    pcm.push(
                        self.decoder
                            .decode_sample(sign_extend_nibble(data >> 4), header.shift()),
                    );
                    pcm.push(
                        self.decoder
                            .decode_sample(sign_extend_nibble(data), header.shift()),
                    );
                }

                let is_final = block_index + 1 == block_count;
                if header.end() {
                    stream_end = if header.do_loop() && is_final {
                        Some(StreamEnd::Looping { block: block_index })
                    } else {
                        // End flag before the final block; everything after it is dropped.
                        irregular |= !is_final;
                        Some(StreamEnd::OneShot)
                    };
                    break 'blocks;
                }
                // A loop flag only means something alongside the end flag.
                irregular |= header.do_loop();
                block_index += 1;
            }
        }

        if stream_end.is_none() && block_count > 0 {
            // Ran out of blocks without seeing an end flag.
            irregular = true;
        }

        let loop_points = match stream_end {
            Some(StreamEnd::Looping { block }) => {
                let start = loop_offset
                    .map(|offset| byte_position_to_sample_position(u32::from(offset)) as usize)
                    .unwrap_or(0);
                let block_start =
                    byte_position_to_sample_position((block * BLOCK_BYTES) as u32) as usize;
                Some(LoopPoints {
                    start,
                    end: block_start + LOOP_END_OFFSET,
                })
            }
            _ => None,
        };

        let sample = DecodedSample::from_i16(
            vec![pcm],
            COMPRESSED_SAMPLE_RATE,
            loop_points,
            irregular,
        );
        if sample.is_truncated() {
            warn!(
                blocks = block_count,
                frames = sample.len(),
                "Compressed sample has irregular end framing"
            );
        }

        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(header: u8, data: [u8; 8]) -> Vec<u8> {
        let mut bytes = vec![header];
        bytes.extend_from_slice(&data);
        bytes
    }

    fn decode(bytes: &[u8]) -> DecodedSample {
        CompressedSampleReader::new().decode(bytes).unwrap()
    }

    #[test]
    fn test_rejects_bad_framing() {
        let mut reader = CompressedSampleReader::new();
        for len in [1, 3, 8, 10, 12, 17] {
            let result = reader.decode(&vec![0u8; len]);
            assert!(
                matches!(result, Err(DecodeError::FormatMismatch { .. })),
                "length {} should not match",
                len
            );
        }
    }

    #[test]
    fn test_empty_stream() {
        let sample = decode(&[]);
        assert!(sample.is_empty());
        assert!(!sample.has_loop());
        assert!(!sample.is_truncated());
    }

    #[test]
    fn test_single_block_no_filter() {
        // shift 8, filter 0, end.
        let bytes = block(0x81, [0x12, 0x34, 0x56, 0x7F, 0x80, 0x9A, 0xBC, 0xDE]);
        let sample = decode(&bytes);

        assert_eq!(sample.len(), 16);
        assert_eq!(sample.sample_rate(), COMPRESSED_SAMPLE_RATE);
        assert!(!sample.has_loop());
        assert!(!sample.is_truncated());
        assert_eq!(
            sample.pcm_i16(0),
            vec![
                256, 512, 768, 1024, 1280, 1536, 1792, -256, -2048, 0, -1792, -1536, -1280,
                -1024, -768, -512
            ]
        );
    }

    #[test]
    fn test_linear_filter_decay() {
        let mut bytes = block(0xA0, [0, 0, 0, 0, 0, 0, 0, 0x07]);
        bytes.extend(block(0x05, [0; 8]));
        let pcm = decode(&bytes).pcm_i16(0);

        assert_eq!(pcm[15], 7168);
        assert_eq!(pcm[16], 6720);
        assert_eq!(pcm[17], 6300);
    }

    #[test]
    fn test_loop_with_header() {
        let mut bytes = 9u16.to_le_bytes().to_vec();
        bytes.extend(block(0x40, [0x11; 8]));
        bytes.extend(block(0x40, [0x11; 8]));
        bytes.extend(block(0x43, [0x11; 8]));
        let sample = decode(&bytes);

        assert_eq!(sample.len(), 48);
        assert_eq!(sample.loop_points(), Some(LoopPoints { start: 16, end: 39 }));
        assert!(!sample.is_truncated());
    }

    #[test]
    fn test_loop_without_header_starts_at_zero() {
        let mut bytes = block(0x40, [0x11; 8]);
        bytes.extend(block(0x43, [0x11; 8]));
        let sample = decode(&bytes);
        assert_eq!(sample.loop_points(), Some(LoopPoints { start: 0, end: 23 }));
    }

    #[test]
    fn test_end_without_loop_is_one_shot() {
        let mut bytes = 0u16.to_le_bytes().to_vec();
        bytes.extend(block(0x40, [0x11; 8]));
        bytes.extend(block(0x41, [0x11; 8]));
        let sample = decode(&bytes);
        assert!(!sample.has_loop());
        assert!(!sample.is_truncated());
        assert_eq!(sample.len(), 32);
    }

    #[test]
    fn test_early_end_flag_truncates() {
        let mut bytes = block(0x43, [0x11; 8]);
        bytes.extend(block(0x40, [0x11; 8]));
        bytes.extend(block(0x41, [0x11; 8]));
        let sample = decode(&bytes);
        assert_eq!(sample.len(), 16);
        assert!(!sample.has_loop());
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_loop_flag_without_end_is_flagged() {
        let mut bytes = block(0x42, [0x11; 8]);
        bytes.extend(block(0x41, [0x11; 8]));
        let sample = decode(&bytes);
        assert_eq!(sample.len(), 32);
        assert!(!sample.has_loop());
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_stray_loop_flag_keeps_final_loop() {
        let mut bytes = block(0x42, [0x11; 8]);
        bytes.extend(block(0x40, [0x11; 8]));
        bytes.extend(block(0x43, [0x11; 8]));
        let sample = decode(&bytes);
        assert_eq!(sample.len(), 48);
        assert_eq!(sample.loop_points(), Some(LoopPoints { start: 0, end: 39 }));
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_missing_end_flag_is_flagged() {
        let sample = decode(&block(0x40, [0x11; 8]));
        assert_eq!(sample.len(), 16);
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_loop_start_past_end_drops_loop() {
        let mut bytes = 90u16.to_le_bytes().to_vec();
        bytes.extend(block(0x43, [0x11; 8]));
        let sample = decode(&bytes);
        assert!(!sample.has_loop());
        assert!(sample.is_truncated());
    }

    #[test]
    fn test_spans_multiple_scratch_windows() {
        let blocks = CHUNK_BLOCKS * 2 + 3;
        let mut bytes = Vec::new();
        for i in 0..blocks {
            let header = if i + 1 == blocks { 0x11 } else { 0x10 };
            bytes.extend(block(header, [0x10; 8]));
        }
        let sample = decode(&bytes);
        assert_eq!(sample.len(), blocks * BLOCK_SAMPLES);
        assert!(!sample.is_truncated());
        let pcm = sample.pcm_i16(0);
        assert!(pcm.chunks(2).all(|pair| pair == [2, 0]));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let mut bytes = 18u16.to_le_bytes().to_vec();
        bytes.extend(block(0xC4, [0x1F, 0x2E, 0x3D, 0x4C, 0x5B, 0x6A, 0x79, 0x88]));
        bytes.extend(block(0x98, [0xF1, 0xE2, 0xD3, 0xC4, 0xB5, 0xA6, 0x97, 0x08]));
        bytes.extend(block(0x7C, [0x77, 0x88, 0x77, 0x88, 0x01, 0x23, 0x45, 0x67]));
        bytes.extend(block(0x6B, [0x89, 0xAB, 0xCD, 0xEF, 0x10, 0x32, 0x54, 0x76]));

        let mut reader = CompressedSampleReader::new();
        let first = reader.decode(&bytes).unwrap();
        let second = reader.decode(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, CompressedSampleReader::new().decode(&bytes).unwrap());
        assert_eq!(first.loop_points(), Some(LoopPoints { start: 32, end: 55 }));
    }
}
