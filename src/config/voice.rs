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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{MAX_MIDI_CHANNEL, MAX_MIDI_NOTE};
use crate::filter::{FilterMode, FALLBACK_SAMPLE_RATE, MAX_CHANNELS};

/// Default root note (middle C).
pub const DEFAULT_ROOT_NOTE: u8 = 60;

const DEFAULT_CUTOFF_HZ: f64 = 8000.0;
const DEFAULT_Q: f64 = 0.707;

/// RC filter settings for a voice.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct FilterConfig {
    /// Which topology to run.
    #[serde(default, rename = "type")]
    mode: FilterMode,

    /// Cutoff frequency in Hz.
    #[serde(default = "default_cutoff")]
    cutoff: f64,

    /// Resonance (two-pole only).
    #[serde(default = "default_q")]
    q: f64,
}

fn default_cutoff() -> f64 {
    DEFAULT_CUTOFF_HZ
}

fn default_q() -> f64 {
    DEFAULT_Q
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Off,
            cutoff: DEFAULT_CUTOFF_HZ,
            q: DEFAULT_Q,
        }
    }
}

impl FilterConfig {
    pub fn new(mode: FilterMode, cutoff: f64, q: f64) -> Self {
        Self { mode, cutoff, q }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn q(&self) -> f64 {
        self.q
    }
}

/// Everything a voice needs to know about the sample slot it plays.
///
/// Passed by value at voice construction; voices never look back at whatever
/// built them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceConfig {
    low_note: u8,
    high_note: u8,
    /// `None` answers every channel.
    channel: Option<u8>,
    root_note: u8,
    attack: Duration,
    release: Duration,
    volume: f32,
    filter: FilterConfig,
    output_sample_rate: u32,
    output_channels: usize,
}

impl VoiceConfig {
    /// Creates a configuration covering every note on every channel.
    ///
    /// A zero output rate falls back to 44.1kHz and the channel count is
    /// clamped to 1-2.
    pub fn new(output_sample_rate: u32, output_channels: usize) -> Self {
        Self {
            low_note: 0,
            high_note: MAX_MIDI_NOTE,
            channel: None,
            root_note: DEFAULT_ROOT_NOTE,
            attack: Duration::ZERO,
            release: Duration::ZERO,
            volume: 1.0,
            filter: FilterConfig::default(),
            output_sample_rate: 0,
            output_channels: 1,
        }
        .with_output(output_sample_rate, output_channels)
    }

    /// Sets the output format.
    pub fn with_output(mut self, sample_rate: u32, channels: usize) -> Self {
        self.output_sample_rate = if sample_rate == 0 {
            FALLBACK_SAMPLE_RATE as u32
        } else {
            sample_rate
        };
        self.output_channels = channels.clamp(1, MAX_CHANNELS);
        self
    }

    /// Sets the inclusive note range. Notes are clamped to 0-127 and the
    /// bounds put in order.
    pub fn with_note_range(mut self, low: u8, high: u8) -> Self {
        let low = low.min(MAX_MIDI_NOTE);
        let high = high.min(MAX_MIDI_NOTE);
        self.low_note = low.min(high);
        self.high_note = low.max(high);
        self
    }

    /// Restricts the voice to one MIDI channel (1-16). `None` or 0 is omni.
    pub fn with_channel(mut self, channel: Option<u8>) -> Self {
        self.channel = channel
            .filter(|&c| c != 0)
            .map(|c| c.min(MAX_MIDI_CHANNEL));
        self
    }

    /// Sets the note at which the sample plays at its native pitch.
    pub fn with_root_note(mut self, root_note: u8) -> Self {
        self.root_note = root_note.min(MAX_MIDI_NOTE);
        self
    }

    pub fn with_attack(mut self, attack: Duration) -> Self {
        self.attack = attack;
        self
    }

    pub fn with_release(mut self, release: Duration) -> Self {
        self.release = release;
        self
    }

    /// Sets the output gain; negative or non-finite values become 0.
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = if volume.is_finite() {
            volume.max(0.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    /// Returns true if `note` lies within the configured range. Notes above
    /// 127 never apply.
    pub fn applies_to_note(&self, note: u8) -> bool {
        note <= MAX_MIDI_NOTE && (self.low_note..=self.high_note).contains(&note)
    }

    /// Returns true if the voice is omni or `channel` is its channel.
    /// Channels outside 1-16 never apply.
    pub fn applies_to_channel(&self, channel: u8) -> bool {
        if channel == 0 || channel > MAX_MIDI_CHANNEL {
            return false;
        }
        match self.channel {
            Some(c) => c == channel,
            None => true,
        }
    }

    pub fn low_note(&self) -> u8 {
        self.low_note
    }

    pub fn high_note(&self) -> u8 {
        self.high_note
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    pub fn attack(&self) -> Duration {
        self.attack
    }

    pub fn release(&self) -> Duration {
        self.release
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn filter(&self) -> FilterConfig {
        self.filter
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }
}
