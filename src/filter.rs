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

//! Recursive filters modelling the RC networks on the output of vintage sample
//! playback hardware.
//!
//! Both topologies keep their delay lines per channel and share the same
//! setup/process/clear contract. Setup parameters are clamped to safe values
//! rather than rejected, since they can change from the real-time thread.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Maximum number of channels a filter keeps state for.
pub const MAX_CHANNELS: usize = 2;

/// Rate substituted for a non-positive or non-finite sample rate.
pub const FALLBACK_SAMPLE_RATE: f64 = 44100.0;

/// Lowest accepted cutoff in Hz.
pub const MIN_CUTOFF_HZ: f64 = 1.0;

/// Highest accepted cutoff as a fraction of Nyquist.
const MAX_CUTOFF_FRACTION: f64 = 0.9999;

/// Lowest accepted resonance.
pub const MIN_Q: f64 = 0.1;

/// State magnitudes below this are flushed to zero to keep denormals out of the
/// feedback path.
const DENORMAL_THRESHOLD: f64 = 1e-30;

fn sanitize_rate(sample_rate: f64) -> f64 {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        sample_rate
    } else {
        FALLBACK_SAMPLE_RATE
    }
}

/// Clamps `cutoff` into `[MIN_CUTOFF_HZ, nyquist)` for an already sanitized rate.
fn clamp_cutoff(cutoff: f64, sample_rate: f64) -> f64 {
    let max = sample_rate * 0.5 * MAX_CUTOFF_FRACTION;
    if !cutoff.is_finite() {
        return max;
    }
    cutoff.max(MIN_CUTOFF_HZ).min(max)
}

fn clamp_q(q: f64) -> f64 {
    if q.is_finite() {
        q.max(MIN_Q)
    } else {
        MIN_Q
    }
}

#[inline]
fn flush_denormal(value: f64) -> f64 {
    if value.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        value
    }
}

/// Single-pole RC low-pass, with the high-pass taken as the input minus the
/// low-pass output.
#[derive(Debug, Clone)]
pub struct OnePoleFilter {
    a1: f64,
    a2: f64,
    state: [f64; MAX_CHANNELS],
}

impl OnePoleFilter {
    pub fn new(cutoff: f64, sample_rate: f64) -> Self {
        let mut filter = Self {
            a1: 1.0,
            a2: 0.0,
            state: [0.0; MAX_CHANNELS],
        };
        filter.setup(cutoff, sample_rate);
        filter
    }

    /// Recomputes the coefficients. History is kept.
    pub fn setup(&mut self, cutoff: f64, sample_rate: f64) {
        let sample_rate = sanitize_rate(sample_rate);
        let cutoff = clamp_cutoff(cutoff, sample_rate);

        let a = 2.0 - (2.0 * PI * cutoff / sample_rate).cos();
        let b = a - (a * a - 1.0).sqrt();
        self.a1 = 1.0 - b;
        self.a2 = b;
    }

    /// The `(a1, a2)` coefficient pair.
    pub fn coefficients(&self) -> (f64, f64) {
        (self.a1, self.a2)
    }

    /// Low-pass one sample. Channels past [`MAX_CHANNELS`] pass through.
    #[inline]
    pub fn process_low_pass(&mut self, channel: usize, input: f64) -> f64 {
        let Some(state) = self.state.get_mut(channel) else {
            return input;
        };
        let output = self.a1 * input + self.a2 * *state;
        *state = flush_denormal(output);
        output
    }

    /// High-pass one sample using the low-pass state.
    #[inline]
    pub fn process_high_pass(&mut self, channel: usize, input: f64) -> f64 {
        if channel >= MAX_CHANNELS {
            return input;
        }
        input - self.process_low_pass(channel, input)
    }

    /// Zeroes the history of every channel.
    pub fn clear(&mut self) {
        self.state = [0.0; MAX_CHANNELS];
    }
}

/// Two-pole resonant RC low-pass.
///
/// History per channel: inputs `x[n-1], x[n-2]` in slots 0-1 and outputs
/// `y[n-1], y[n-2]` in slots 2-3.
#[derive(Debug, Clone)]
pub struct TwoPoleFilter {
    a1: f64,
    a2: f64,
    b1: f64,
    b2: f64,
    history: [[f64; 4]; MAX_CHANNELS],
}

/// Coefficients of a [`TwoPoleFilter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoPoleCoefficients {
    pub a1: f64,
    pub a2: f64,
    pub b1: f64,
    pub b2: f64,
}

impl TwoPoleFilter {
    pub fn new(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let mut filter = Self {
            a1: 1.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
            history: [[0.0; 4]; MAX_CHANNELS],
        };
        filter.setup(cutoff, q, sample_rate);
        filter
    }

    /// Recomputes the coefficients. History is kept.
    pub fn setup(&mut self, cutoff: f64, q: f64, sample_rate: f64) {
        let sample_rate = sanitize_rate(sample_rate);
        let cutoff = clamp_cutoff(cutoff, sample_rate);

        let a = 1.0 / (PI * cutoff / sample_rate).tan();
        let b = 1.0 / clamp_q(q);

        self.a1 = 1.0 / (1.0 + b * a + a * a);
        self.a2 = 2.0 * self.a1;
        self.b1 = 2.0 * (1.0 - a * a) * self.a1;
        self.b2 = (1.0 - b * a + a * a) * self.a1;
    }

    pub fn coefficients(&self) -> TwoPoleCoefficients {
        TwoPoleCoefficients {
            a1: self.a1,
            a2: self.a2,
            b1: self.b1,
            b2: self.b2,
        }
    }

    /// Filters one sample. Channels past [`MAX_CHANNELS`] pass through.
    #[inline]
    pub fn process(&mut self, channel: usize, input: f64) -> f64 {
        let Some(h) = self.history.get_mut(channel) else {
            return input;
        };
        let output =
            self.a1 * input + self.a2 * h[0] + self.a1 * h[1] - self.b1 * h[2] - self.b2 * h[3];

        h[1] = h[0];
        h[0] = input;
        h[3] = h[2];
        h[2] = flush_denormal(output);
        output
    }

    /// Zeroes the history of every channel.
    pub fn clear(&mut self) {
        self.history = [[0.0; 4]; MAX_CHANNELS];
    }
}

/// The filter applied to a voice's output.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// No filtering.
    #[default]
    Off,
    /// One-pole low-pass.
    OnePoleLowPass,
    /// One-pole high-pass.
    OnePoleHighPass,
    /// Two-pole resonant low-pass.
    TwoPoleLowPass,
}

/// The RC filter stage of a voice: one active topology with per-channel state.
#[derive(Debug, Clone)]
pub struct FilterBank {
    mode: FilterMode,
    one_pole: OnePoleFilter,
    two_pole: TwoPoleFilter,
}

impl FilterBank {
    pub fn new(mode: FilterMode, cutoff: f64, q: f64, sample_rate: f64) -> Self {
        Self {
            mode,
            one_pole: OnePoleFilter::new(cutoff, sample_rate),
            two_pole: TwoPoleFilter::new(cutoff, q, sample_rate),
        }
    }

    /// A bank that passes audio through untouched.
    pub fn bypass() -> Self {
        Self::new(FilterMode::Off, FALLBACK_SAMPLE_RATE * 0.5, 1.0, FALLBACK_SAMPLE_RATE)
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Filters one sample of the given channel.
    #[inline]
    pub fn process(&mut self, channel: usize, input: f32) -> f32 {
        let input = f64::from(input);
        let output = match self.mode {
            FilterMode::Off => input,
            FilterMode::OnePoleLowPass => self.one_pole.process_low_pass(channel, input),
            FilterMode::OnePoleHighPass => self.one_pole.process_high_pass(channel, input),
            FilterMode::TwoPoleLowPass => self.two_pole.process(channel, input),
        };
        output as f32
    }

    /// Filters one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for (channel, sample) in frame.iter_mut().enumerate() {
            *sample = self.process(channel, *sample);
        }
    }

    /// Zeroes the state of both topologies.
    pub fn clear(&mut self) {
        self.one_pole.clear();
        self.two_pole.clear();
    }
}
