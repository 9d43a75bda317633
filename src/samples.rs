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

//! MIDI-driven sample playback.
//!
//! This module provides:
//! - Sample loading and caching (decoded eagerly, shared between voices)
//! - A polyphonic engine that routes notes to configured sample slots

mod engine;
mod loader;

pub use engine::{EngineCommand, EngineHandle, SampleEngine};
pub use loader::{LoadError, SampleLoader};
