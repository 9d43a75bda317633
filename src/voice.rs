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

//! Per-note sample playback.
//!
//! A voice reads a shared [`DecodedSample`] with nearest-neighbor lookup at a
//! pitch-shifted rate, wraps around the sample's loop, applies its envelope
//! and runs the result through its own filter bank. Voices never allocate or
//! log while rendering.

pub mod envelope;

use std::sync::Arc;

use crate::config::VoiceConfig;
use crate::decode::DecodedSample;
use crate::filter::FilterBank;

use envelope::{Envelope, EnvelopeStage};

/// Velocity that plays a sample at full gain.
pub const MAX_VELOCITY: u8 = 127;

/// Playback position within a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackCursor {
    /// Fractional sample position.
    position: f64,
    /// Samples advanced per output frame.
    increment: f64,
    looping: bool,
    active: bool,
}

impl PlaybackCursor {
    fn idle() -> Self {
        Self {
            position: 0.0,
            increment: 1.0,
            looping: false,
            active: false,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn increment(&self) -> f64 {
        self.increment
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Computes the cursor increment for `note` against a sample recorded at
/// `root_note` and `native_rate`, played back at `output_rate`.
pub fn pitch_ratio(note: u8, root_note: u8, native_rate: u32, output_rate: u32) -> f64 {
    if output_rate == 0 {
        return 0.0;
    }
    let semitones = f64::from(note) - f64::from(root_note);
    (semitones / 12.0).exp2() * f64::from(native_rate) / f64::from(output_rate)
}

/// One playing instance of a sample.
pub struct SampleVoice {
    sample: Arc<DecodedSample>,
    config: VoiceConfig,
    cursor: PlaybackCursor,
    envelope: Envelope,
    filters: FilterBank,
    /// The note and channel that triggered this voice (for note-off matching).
    note: Option<u8>,
    channel: Option<u8>,
    gain: f32,
}

impl SampleVoice {
    /// Creates an idle voice for `sample`.
    pub fn new(sample: Arc<DecodedSample>, config: VoiceConfig) -> Self {
        let rate = config.output_sample_rate();
        let filter = config.filter();
        Self {
            sample,
            cursor: PlaybackCursor::idle(),
            envelope: Envelope::new(config.attack(), config.release(), rate),
            filters: FilterBank::new(filter.mode(), filter.cutoff(), filter.q(), f64::from(rate)),
            note: None,
            channel: None,
            gain: 0.0,
            config,
        }
    }

    /// Returns true if the voice's configuration covers `note`.
    pub fn applies_to_note(&self, note: u8) -> bool {
        self.config.applies_to_note(note)
    }

    /// Returns true if the voice's configuration covers `channel`.
    pub fn applies_to_channel(&self, channel: u8) -> bool {
        self.config.applies_to_channel(channel)
    }

    /// Starts the sample from the beginning for `note`.
    ///
    /// The cursor, envelope and filter state all restart. An empty sample
    /// leaves the voice inactive.
    pub fn note_on(&mut self, note: u8, channel: Option<u8>, velocity: u8) {
        self.filters.clear();
        self.note = Some(note);
        self.channel = channel;
        self.gain = f32::from(velocity.min(MAX_VELOCITY)) / f32::from(MAX_VELOCITY)
            * self.config.volume();
        self.cursor = PlaybackCursor {
            position: 0.0,
            increment: pitch_ratio(
                note,
                self.config.root_note(),
                self.sample.sample_rate(),
                self.config.output_sample_rate(),
            ),
            looping: self.sample.has_loop(),
            active: !self.sample.is_empty(),
        };

        if self.cursor.active {
            self.envelope.trigger();
        } else {
            self.envelope.reset();
        }
    }

    /// Enters the release stage. The voice goes inactive once the release
    /// completes.
    pub fn release(&mut self) {
        self.envelope.release();
        if self.envelope.is_idle() {
            self.cursor.active = false;
        }
    }

    /// Releases the voice if it was triggered by `note` on `channel`.
    /// Returns true if it matched.
    pub fn note_off(&mut self, note: u8, channel: u8) -> bool {
        if self.matches_note_off(note, channel) {
            self.release();
            true
        } else {
            false
        }
    }

    /// Checks if this voice matches a note-off event.
    pub fn matches_note_off(&self, note: u8, channel: u8) -> bool {
        match (self.note, self.channel) {
            (Some(n), Some(c)) => n == note && c == channel,
            (Some(n), None) => n == note,
            _ => false,
        }
    }

    /// Silences the voice and clears its filter state.
    pub fn reset(&mut self) {
        self.cursor.active = false;
        self.cursor.position = 0.0;
        self.envelope.reset();
        self.filters.clear();
        self.note = None;
        self.channel = None;
    }

    /// Moves the cursor. Positions past the end of a non-looping sample
    /// deactivate the voice.
    pub fn seek(&mut self, position: f64) {
        self.cursor.position = position.max(0.0);
        if !self.cursor.looping && self.cursor.position >= self.sample.len() as f64 {
            self.cursor.active = false;
        }
    }

    /// Overrides the cursor increment.
    pub fn set_pitch_ratio(&mut self, ratio: f64) {
        self.cursor.increment = if ratio.is_finite() { ratio.max(0.0) } else { 0.0 };
    }

    pub fn is_active(&self) -> bool {
        self.cursor.active
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn position(&self) -> f64 {
        self.cursor.position
    }

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn envelope_stage(&self) -> EnvelopeStage {
        self.envelope.stage()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn sample(&self) -> &Arc<DecodedSample> {
        &self.sample
    }

    /// Renders interleaved frames into `output`, overwriting it.
    ///
    /// `output` holds `output.len() / output_channels` frames. Frames after the
    /// voice goes inactive are silent.
    pub fn render_block(&mut self, output: &mut [f32]) {
        let channels = self.config.output_channels();
        let mut frames = output.chunks_exact_mut(channels);

        for frame in frames.by_ref() {
            if !self.cursor.active {
                frame.fill(0.0);
                continue;
            }

            let index = self.read_index();
            let gain = self.envelope.next_gain() * self.gain;
            self.read_frame(index, gain, frame);
            self.filters.process_frame(frame);
            self.advance();
        }

        frames.into_remainder().fill(0.0);
    }

    /// The sample index nearest the cursor, kept inside the loop when looping.
    fn read_index(&self) -> usize {
        let index = self.cursor.position.round() as usize;
        match self.sample.loop_points() {
            Some(loop_points) if self.cursor.looping && index >= loop_points.end => {
                loop_points.start + (index - loop_points.end) % loop_points.len()
            }
            _ => index,
        }
    }

    fn read_frame(&self, index: usize, gain: f32, frame: &mut [f32]) {
        let sample = &self.sample;
        match (sample.channel_count(), frame.len()) {
            (1, _) => frame.fill(sample.frame(0, index) * gain),
            (_, 1) => frame[0] = (sample.frame(0, index) + sample.frame(1, index)) * 0.5 * gain,
            _ => {
                for (ch, out) in frame.iter_mut().enumerate() {
                    *out = sample.frame(ch, index) * gain;
                }
            }
        }
    }

    fn advance(&mut self) {
        self.cursor.position += self.cursor.increment;

        match self.sample.loop_points() {
            Some(loop_points) if self.cursor.looping => {
                let end = loop_points.end as f64;
                if self.cursor.position >= end {
                    let span = loop_points.len() as f64;
                    self.cursor.position =
                        loop_points.start as f64 + (self.cursor.position - end) % span;
                }
            }
            _ => {
                if self.cursor.position >= self.sample.len() as f64 {
                    self.cursor.active = false;
                }
            }
        }

        if self.envelope.is_idle() {
            self.cursor.active = false;
        }
    }
}

impl std::fmt::Debug for SampleVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleVoice")
            .field("note", &self.note)
            .field("channel", &self.channel)
            .field("cursor", &self.cursor)
            .field("envelope", &self.envelope.stage())
            .finish()
    }
}
