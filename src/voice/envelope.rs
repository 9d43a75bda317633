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

//! Linear attack/release envelope.

use std::time::Duration;

/// Where an envelope is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Sustain,
    Release,
}

/// A linear attack/sustain/release envelope stepped once per output frame.
#[derive(Debug, Clone)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f32,
    attack_step: f32,
    release_frames: f32,
    release_step: f32,
}

/// Per-frame increment for a ramp of the given length, or `None` when the
/// ramp completes immediately.
fn ramp_step(time: Duration, sample_rate: u32) -> Option<f32> {
    let frames = time.as_secs_f64() * f64::from(sample_rate);
    if frames < 1.0 {
        None
    } else {
        Some((1.0 / frames) as f32)
    }
}

impl Envelope {
    pub fn new(attack: Duration, release: Duration, sample_rate: u32) -> Self {
        let attack_step = ramp_step(attack, sample_rate).unwrap_or(1.0);
        let release_frames = (release.as_secs_f64() * f64::from(sample_rate)) as f32;
        Self {
            stage: EnvelopeStage::Idle,
            level: 0.0,
            attack_step,
            release_frames,
            release_step: 1.0,
        }
    }

    /// Starts the attack from silence. A zero attack goes straight to sustain.
    pub fn trigger(&mut self) {
        self.level = 0.0;
        self.stage = EnvelopeStage::Attack;
        if self.attack_step >= 1.0 {
            self.level = 1.0;
            self.stage = EnvelopeStage::Sustain;
        }
    }

    /// Starts the release from the current level. A zero release goes straight
    /// to idle.
    pub fn release(&mut self) {
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Release => {}
            EnvelopeStage::Attack | EnvelopeStage::Sustain => {
                if self.release_frames < 1.0 || self.level <= 0.0 {
                    self.reset();
                } else {
                    // Fade from wherever the attack got to over the full
                    // release time.
                    self.release_step = self.level / self.release_frames;
                    self.stage = EnvelopeStage::Release;
                }
            }
        }
    }

    /// Silences the envelope immediately.
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.stage = EnvelopeStage::Idle;
    }

    /// Returns the gain for the current frame and advances one frame.
    pub fn next_gain(&mut self) -> f32 {
        let gain = self.level;
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Sustain => {}
            EnvelopeStage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.reset();
                }
            }
        }
        gain
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }
}
