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

//! Bounded-window reads shared by the block-based readers.

/// Walks an input buffer in windows the size of a caller-owned scratch buffer.
///
/// Each window is copied into the scratch buffer. A short final window is
/// zero-padded, and the number of valid bytes is reported alongside it so
/// padding never turns into output samples.
pub(crate) struct PaddedChunks<'a, 's> {
    input: &'a [u8],
    scratch: &'s mut [u8],
    position: usize,
}

impl<'a, 's> PaddedChunks<'a, 's> {
    pub fn new(input: &'a [u8], scratch: &'s mut [u8]) -> Self {
        Self {
            input,
            scratch,
            position: 0,
        }
    }

    /// Returns the next padded window and the count of valid bytes in it.
    pub fn next_chunk(&mut self) -> Option<(&[u8], usize)> {
        if self.position >= self.input.len() || self.scratch.is_empty() {
            return None;
        }

        let remaining = &self.input[self.position..];
        let valid = remaining.len().min(self.scratch.len());
        self.scratch[..valid].copy_from_slice(&remaining[..valid]);
        self.scratch[valid..].fill(0);
        self.position += valid;

        Some((&self.scratch[..], valid))
    }
}
