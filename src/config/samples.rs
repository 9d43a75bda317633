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

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File, FileFormat};
use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::voice::{FilterConfig, VoiceConfig, DEFAULT_ROOT_NOTE};
use super::MAX_MIDI_NOTE;
use crate::decode::SampleFormat;

/// Default maximum number of concurrent voices.
pub const DEFAULT_MAX_VOICES: usize = 32;

/// Default largest block the host will ask the engine to render.
pub const DEFAULT_MAX_BLOCK_FRAMES: usize = 1024;

/// Default output rate.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 44100;

/// Default output channel count.
pub const DEFAULT_OUTPUT_CHANNELS: usize = 2;

/// A YAML representation of one sample slot.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct SampleDefinition {
    /// The sample file. Relative paths resolve against the config file's
    /// directory.
    file: String,

    /// Explicit format name, overriding the file extension.
    format: Option<String>,

    /// The note at which the sample plays at its native pitch.
    #[serde(default = "default_root_note")]
    root_note: u8,

    #[serde(default)]
    low_note: u8,

    #[serde(default = "default_high_note")]
    high_note: u8,

    /// The MIDI channel (1-16). Absent or 0 answers every channel.
    channel: Option<u8>,

    /// Attack time as a duration string, e.g. "5ms".
    attack: Option<String>,

    /// Release time as a duration string.
    release: Option<String>,

    #[serde(default = "default_volume")]
    volume: f32,

    #[serde(default)]
    filter: FilterConfig,
}

fn default_root_note() -> u8 {
    DEFAULT_ROOT_NOTE
}

fn default_high_note() -> u8 {
    MAX_MIDI_NOTE
}

fn default_volume() -> f32 {
    1.0
}

fn parse_duration(value: &Option<String>) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::InvalidDuration {
                value: value.clone(),
                reason: e.to_string(),
            })?
            .into()),
        None => Ok(Duration::ZERO),
    }
}

impl SampleDefinition {
    /// Gets the sample file as written in the config.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Resolves the sample file against a base directory.
    pub fn resolve_path(&self, base_dir: Option<&Path>) -> PathBuf {
        let path = PathBuf::from(&self.file);
        match base_dir {
            Some(base_dir) if path.is_relative() => base_dir.join(path),
            _ => path,
        }
    }

    /// Gets the explicit format, if one was given.
    pub fn format(&self) -> Result<Option<SampleFormat>, ConfigError> {
        match self.format.as_deref() {
            Some(name) => SampleFormat::from_extension(name)
                .map(Some)
                .ok_or_else(|| ConfigError::UnknownFormat(name.to_string())),
            None => Ok(None),
        }
    }

    pub fn root_note(&self) -> u8 {
        self.root_note
    }

    /// Builds the voice configuration for this slot.
    pub fn voice_config(
        &self,
        output_sample_rate: u32,
        output_channels: usize,
    ) -> Result<VoiceConfig, ConfigError> {
        if self.low_note > self.high_note {
            return Err(ConfigError::InvalidNoteRange {
                low: self.low_note,
                high: self.high_note,
            });
        }

        self.format()?;

        Ok(VoiceConfig::new(output_sample_rate, output_channels)
            .with_note_range(self.low_note, self.high_note)
            .with_channel(self.channel)
            .with_root_note(self.root_note)
            .with_attack(parse_duration(&self.attack)?)
            .with_release(parse_duration(&self.release)?)
            .with_volume(self.volume)
            .with_filter(self.filter))
    }
}

/// The whole sampler: output format, voice limits and the sample slots.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct SamplerConfig {
    #[serde(default = "default_output_sample_rate")]
    output_sample_rate: u32,

    #[serde(default = "default_output_channels")]
    output_channels: usize,

    /// Maximum number of concurrent voices.
    #[serde(default = "default_max_voices")]
    max_voices: usize,

    /// Largest block the host will render at once.
    #[serde(default = "default_max_block_frames")]
    max_block_frames: usize,

    #[serde(default)]
    samples: Vec<SampleDefinition>,

    /// Directory of the file this config was read from.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_output_sample_rate() -> u32 {
    DEFAULT_OUTPUT_SAMPLE_RATE
}

fn default_output_channels() -> usize {
    DEFAULT_OUTPUT_CHANNELS
}

fn default_max_voices() -> usize {
    DEFAULT_MAX_VOICES
}

fn default_max_block_frames() -> usize {
    DEFAULT_MAX_BLOCK_FRAMES
}

impl SamplerConfig {
    /// Parse a sampler config from a YAML file.
    pub fn from_file(path: &Path) -> Result<SamplerConfig, ConfigError> {
        let mut config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<SamplerConfig>()?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse a sampler config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<SamplerConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<SamplerConfig>()?)
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    pub fn max_block_frames(&self) -> usize {
        self.max_block_frames
    }

    pub fn samples(&self) -> &[SampleDefinition] {
        &self.samples
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}
