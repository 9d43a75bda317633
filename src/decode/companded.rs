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

//! Reader for 8-bit logarithmically companded samples.
//!
//! Each byte is one sample: bit 7 is the sign, the low seven bits a magnitude
//! expanded as `(256^(m/127) - 1) / 255`.

use super::chunks::PaddedChunks;
use super::error::DecodeError;
use super::{DecodedSample, SampleDecoder, SampleFormat};

/// Native playback rate of companded samples in Hz.
pub const COMPANDED_SAMPLE_RATE: u32 = 22050;

/// Bytes expanded per scratch window.
const CHUNK_BYTES: usize = 4096;

const SIGN_BIT: u8 = 0x80;
const MAGNITUDE_MASK: u8 = 0x7F;

/// Expands one companded byte to 16-bit linear PCM.
///
/// Full negative magnitude maps to `i16::MIN`, full positive to `i16::MAX`.
pub fn expand(byte: u8) -> i16 {
    let magnitude = f64::from(byte & MAGNITUDE_MASK) / f64::from(MAGNITUDE_MASK);
    let linear = (256f64.powf(magnitude) - 1.0) / 255.0;

    if byte & SIGN_BIT != 0 {
        -(linear * 32768.0).round() as i16
    } else {
        (linear * 32767.0).round() as i16
    }
}

/// Decodes companded bytes into mono PCM.
pub struct CompandedSampleReader {
    table: [i16; 256],
    scratch: Vec<u8>,
}

impl CompandedSampleReader {
    pub fn new() -> Self {
        let mut table = [0i16; 256];
        for (byte, entry) in table.iter_mut().enumerate() {
            *entry = expand(byte as u8);
        }

        Self {
            table,
            scratch: vec![0; CHUNK_BYTES],
        }
    }
}

impl Default for CompandedSampleReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleDecoder for CompandedSampleReader {
    fn format(&self) -> SampleFormat {
        SampleFormat::Companded
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedSample, DecodeError> {
        let mut pcm = Vec::with_capacity(bytes.len());
        let mut chunks = PaddedChunks::new(bytes, &mut self.scratch);
        while let Some((window, valid)) = chunks.next_chunk() {
            pcm.extend(window[..valid].iter().map(|&b| self.table[usize::from(b)]));
        }

        Ok(DecodedSample::from_i16(
            vec![pcm],
            COMPANDED_SAMPLE_RATE,
            None,
            false,
        ))
    }
}
