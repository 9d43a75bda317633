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

//! Integer helpers matching the 16.16 fixed-point arithmetic of the original hardware.
//!
//! Ratios are first quantized to 16.16 (truncating), then applied with a 64-bit
//! intermediate and rounded half-up. The truncation of the ratio is what makes
//! the results occasionally differ by one from exact rational rounding, and the
//! decoded filter coefficients depend on that bit-for-bit.

/// Number of fractional bits in the fixed-point representation.
pub const FRACTION_BITS: u32 = 16;

/// Size in bytes of one block in the compressed container.
pub const COMPRESSED_BLOCK_BYTES: i64 = 9;

/// Number of samples decoded from one compressed block.
pub const COMPRESSED_BLOCK_SAMPLES: i64 = 16;

const HALF: i64 = 1 << (FRACTION_BITS - 1);

/// Computes `round(value * numerator / denominator)` through a 16.16 fixed-point ratio.
///
/// A zero denominator yields zero.
pub fn fixed_multiply_round(value: i32, numerator: i32, denominator: i32) -> i32 {
    if denominator == 0 {
        return 0;
    }

    let ratio = (i64::from(numerator) << FRACTION_BITS) / i64::from(denominator);
    let product = i64::from(value) * ratio + HALF;

    // Arithmetic shift floors, so negative values round half-up as well.
    (product >> FRACTION_BITS).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Converts a byte offset in the compressed container to the sample index it starts at.
pub fn byte_position_to_sample_position(byte_offset: u32) -> u32 {
    let offset = i32::try_from(byte_offset).unwrap_or(i32::MAX);
    fixed_multiply_round(
        offset,
        COMPRESSED_BLOCK_SAMPLES as i32,
        COMPRESSED_BLOCK_BYTES as i32,
    )
    .max(0) as u32
}
