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

//! Playback of vintage 8/16-bit home-computer samples.
//!
//! Legacy sample files are decoded once into [`DecodedSample`]s, then played
//! by [`SampleVoice`]s with nearest-neighbor pitch shifting, loop wraparound
//! and analog-style RC filtering. [`SampleEngine`] routes MIDI notes to voices
//! and mixes them into host audio blocks.

pub mod config;
pub mod decode;
pub mod filter;
pub mod fixed_point;
pub mod samples;
pub mod voice;

pub use config::{ConfigError, FilterConfig, SamplerConfig, VoiceConfig};
pub use decode::{DecodeError, DecodedSample, LoopPoints, SampleDecoder, SampleFormat};
pub use filter::{FilterBank, FilterMode, OnePoleFilter, TwoPoleFilter};
pub use samples::{EngineCommand, EngineHandle, LoadError, SampleEngine, SampleLoader};
pub use voice::{PlaybackCursor, SampleVoice};
