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

//! Predictive delta filter used by the compressed sample format.

use crate::fixed_point::fixed_multiply_round;

/// Largest shift applied to a nibble. Larger shift codes behave like this one.
pub const MAX_SHIFT: u8 = 12;

/// The prediction filter selected by a block's 2-bit filter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    /// No prediction.
    #[default]
    None,
    /// `prev1 * 15/16`.
    Linear,
    /// `prev1 * 61/32 - prev2 * 15/16`.
    Quadratic,
    /// `prev1 * 115/64 - prev2 * 13/16`.
    Steep,
}

impl FilterType {
    /// Selects the filter from the low two bits of `code`.
    pub fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => FilterType::None,
            1 => FilterType::Linear,
            2 => FilterType::Quadratic,
            _ => FilterType::Steep,
        }
    }
}

/// Computes the prediction terms `(a, b)` for a filter type; a sample is
/// reconstructed as `shifted + a - b`.
pub fn coefficients_for_type(filter: FilterType, prev1: i32, prev2: i32) -> (i32, i32) {
    match filter {
        FilterType::None => (0, 0),
        FilterType::Linear => (fixed_multiply_round(prev1, 15, 16), 0),
        FilterType::Quadratic => (
            fixed_multiply_round(prev1, 61, 32),
            fixed_multiply_round(prev2, 15, 16),
        ),
        FilterType::Steep => (
            fixed_multiply_round(prev1, 115, 64),
            fixed_multiply_round(prev2, 13, 16),
        ),
    }
}

/// Sign-extends the low four bits of `value`.
#[inline]
pub fn sign_extend_nibble(value: u8) -> i8 {
    ((value << 4) as i8) >> 4
}

/// Reconstructs PCM from 4-bit deltas using the last two decoded samples.
///
/// State belongs to a single decode pass; call [`DeltaFilterDecoder::reset`]
/// before starting an unrelated stream.
#[derive(Debug, Clone, Default)]
pub struct DeltaFilterDecoder {
    prev1: i32,
    prev2: i32,
    filter: FilterType,
}

impl DeltaFilterDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes the sample history.
    pub fn reset(&mut self) {
        self.prev1 = 0;
        self.prev2 = 0;
        self.filter = FilterType::None;
    }

    /// Selects the filter for the following samples.
    pub fn set_filter(&mut self, filter: FilterType) {
        self.filter = filter;
    }

    /// The two most recent output samples, newest first.
    pub fn history(&self) -> (i32, i32) {
        (self.prev1, self.prev2)
    }

    /// Decodes one signed nibble (-8..=7) shifted left by `shift`.
    pub fn decode_sample(&mut self, nibble: i8, shift: u8) -> i16 {
        let shifted = i32::from(nibble) << shift.min(MAX_SHIFT);
        let (a, b) = coefficients_for_type(self.filter, self.prev1, self.prev2);
        let out = (shifted + a - b).clamp(i32::from(i16::MIN), i32::from(i16::MAX));

        self.prev2 = self.prev1;
        self.prev1 = out;
        out as i16
    }
}
