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

//! Host-side configuration: per-sample voice settings and the YAML document
//! that describes a whole sampler.

mod error;
mod samples;
mod voice;

pub use error::ConfigError;
pub use samples::{SampleDefinition, SamplerConfig};
pub use voice::{FilterConfig, VoiceConfig};

/// Highest MIDI note number.
pub const MAX_MIDI_NOTE: u8 = 127;

/// Highest MIDI channel number. Channels are numbered 1-16; 0 means omni.
pub const MAX_MIDI_CHANNEL: u8 = 16;
