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

//! Polyphonic engine that routes notes to sample slots and mixes the voices.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, info, warn};

use super::loader::SampleLoader;
use crate::config::{ConfigError, SamplerConfig, VoiceConfig};
use crate::decode::DecodedSample;
use crate::voice::SampleVoice;

/// Number of commands an [`EngineHandle`] can queue between render blocks.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Controller that silences everything immediately.
const ALL_SOUND_OFF: u8 = 120;

/// Controller that releases every held note.
const ALL_NOTES_OFF: u8 = 123;

/// A control message for the engine. Channels are 1-16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    NoteOn { note: u8, channel: u8, velocity: u8 },
    NoteOff { note: u8, channel: u8 },
    /// Release every voice.
    AllNotesOff,
    /// Silence every voice and clear filter state.
    Reset,
}

impl EngineCommand {
    /// Converts a live MIDI event. Note-on with velocity 0 is a note-off.
    pub fn from_midi(event: &LiveEvent) -> Option<EngineCommand> {
        let LiveEvent::Midi { channel, message } = event else {
            return None;
        };
        // midly channels are 0-based.
        let channel = u8::from(*channel) + 1;

        match message {
            MidiMessage::NoteOn { key, vel } if u8::from(*vel) == 0 => {
                Some(EngineCommand::NoteOff {
                    note: u8::from(*key),
                    channel,
                })
            }
            MidiMessage::NoteOn { key, vel } => Some(EngineCommand::NoteOn {
                note: u8::from(*key),
                channel,
                velocity: u8::from(*vel),
            }),
            MidiMessage::NoteOff { key, .. } => Some(EngineCommand::NoteOff {
                note: u8::from(*key),
                channel,
            }),
            MidiMessage::Controller { controller, .. } => match u8::from(*controller) {
                ALL_SOUND_OFF => Some(EngineCommand::Reset),
                ALL_NOTES_OFF => Some(EngineCommand::AllNotesOff),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Sends commands to a [`SampleEngine`] from other threads.
///
/// Commands queue up and are applied at the start of the engine's next render
/// block. Sending never blocks; a full queue drops the command.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineCommand>,
}

impl EngineHandle {
    /// Queues a command. Returns false if it was dropped.
    pub fn send(&self, command: EngineCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                warn!(command = ?command, "Engine command queue full, dropping command");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn note_on(&self, note: u8, channel: u8, velocity: u8) -> bool {
        self.send(EngineCommand::NoteOn {
            note,
            channel,
            velocity,
        })
    }

    pub fn note_off(&self, note: u8, channel: u8) -> bool {
        self.send(EngineCommand::NoteOff { note, channel })
    }

    pub fn reset(&self) -> bool {
        self.send(EngineCommand::Reset)
    }

    /// Parses a raw MIDI message and queues it. Messages the engine doesn't
    /// act on are ignored and return false.
    pub fn send_midi(&self, raw_event: &[u8]) -> bool {
        let event = match LiveEvent::parse(raw_event) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = ?e, "Failed to parse MIDI event");
                return false;
            }
        };
        match EngineCommand::from_midi(&event) {
            Some(command) => self.send(command),
            None => false,
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("queued", &self.tx.len())
            .finish()
    }
}

/// A decoded sample and the voice settings for playing it.
struct SampleSlot {
    sample: Arc<DecodedSample>,
    config: VoiceConfig,
}

/// The sample engine turns note events into voices and mixes them.
///
/// Everything the render path needs is sized at construction: the voice pool
/// never grows past `max_voices` and mixing goes through a fixed scratch
/// buffer.
pub struct SampleEngine {
    slots: Vec<SampleSlot>,
    voices: Vec<SampleVoice>,
    max_voices: usize,
    output_sample_rate: u32,
    output_channels: usize,
    /// Per-voice render buffer, `max_block_frames` frames long.
    scratch: Vec<f32>,
    command_tx: Sender<EngineCommand>,
    command_rx: Receiver<EngineCommand>,
    /// Note-ons that found the voice pool full.
    dropped_notes: u64,
}

impl SampleEngine {
    /// Creates an engine with no sample slots.
    pub fn new(
        output_sample_rate: u32,
        output_channels: usize,
        max_voices: usize,
        max_block_frames: usize,
    ) -> Self {
        // Normalize the output format the same way voices do.
        let format = VoiceConfig::new(output_sample_rate, output_channels);
        let (command_tx, command_rx) = crossbeam_channel::bounded(COMMAND_QUEUE_CAPACITY);
        Self {
            slots: Vec::new(),
            voices: Vec::with_capacity(max_voices),
            max_voices,
            output_sample_rate: format.output_sample_rate(),
            output_channels: format.output_channels(),
            scratch: vec![0.0; max_block_frames.max(1) * format.output_channels()],
            command_tx,
            command_rx,
            dropped_notes: 0,
        }
    }

    /// Builds an engine from a sampler config, loading every sample through
    /// `loader` in parallel.
    pub fn from_config(
        config: &SamplerConfig,
        loader: &SampleLoader,
    ) -> Result<SampleEngine, ConfigError> {
        let mut engine = SampleEngine::new(
            config.output_sample_rate(),
            config.output_channels(),
            config.max_voices(),
            config.max_block_frames(),
        );

        let requests = config
            .samples()
            .iter()
            .map(|definition| {
                Ok((
                    definition.resolve_path(config.base_dir()),
                    definition.format()?,
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let loaded = loader.load_all(&requests);

        for ((definition, (path, _)), result) in
            config.samples().iter().zip(requests).zip(loaded)
        {
            let sample = result.map_err(|source| ConfigError::Sample { path, source })?;
            let voice_config =
                definition.voice_config(engine.output_sample_rate, engine.output_channels)?;
            engine.add_slot(sample, voice_config);
        }

        info!(
            slots = engine.slots.len(),
            max_voices = engine.max_voices,
            sample_rate = engine.output_sample_rate,
            channels = engine.output_channels,
            "Sample engine configured"
        );
        Ok(engine)
    }

    /// Adds a sample slot. The config's output format is replaced with the
    /// engine's. Returns the slot index.
    pub fn add_slot(&mut self, sample: Arc<DecodedSample>, config: VoiceConfig) -> usize {
        let config = config.with_output(self.output_sample_rate, self.output_channels);
        debug!(
            slot = self.slots.len(),
            low_note = config.low_note(),
            high_note = config.high_note(),
            channel = ?config.channel(),
            "Sample slot added"
        );
        self.slots.push(SampleSlot { sample, config });
        self.slots.len() - 1
    }

    /// Returns a handle for queueing commands from other threads.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Starts a voice on every slot that covers `note` on `channel`.
    /// Velocity 0 is a note-off. Notes that find the pool full are dropped.
    pub fn note_on(&mut self, note: u8, channel: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(note, channel);
            return;
        }

        for slot in &self.slots {
            if !slot.config.applies_to_note(note) || !slot.config.applies_to_channel(channel) {
                continue;
            }
            if self.voices.len() >= self.max_voices {
                self.dropped_notes += 1;
                continue;
            }

            let mut voice = SampleVoice::new(slot.sample.clone(), slot.config);
            voice.note_on(note, Some(channel), velocity);
            if voice.is_active() {
                self.voices.push(voice);
            }
        }
    }

    /// Releases every voice started by `note` on `channel`.
    pub fn note_off(&mut self, note: u8, channel: u8) {
        for voice in self.voices.iter_mut() {
            voice.note_off(note, channel);
        }
        self.voices.retain(SampleVoice::is_active);
    }

    /// Releases every voice.
    pub fn all_notes_off(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.release();
        }
        self.voices.retain(SampleVoice::is_active);
    }

    /// Silences every voice immediately.
    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.reset();
        }
        self.voices.clear();
    }

    /// Applies a live MIDI event directly.
    pub fn handle_midi(&mut self, event: &LiveEvent) {
        if let Some(command) = EngineCommand::from_midi(event) {
            self.apply(command);
        }
    }

    /// Parses and applies a raw MIDI message. Returns false if it couldn't be
    /// parsed.
    pub fn handle_midi_bytes(&mut self, raw_event: &[u8]) -> bool {
        match LiveEvent::parse(raw_event) {
            Ok(event) => {
                self.handle_midi(&event);
                true
            }
            Err(_) => false,
        }
    }

    /// Applies a command directly.
    pub fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::NoteOn {
                note,
                channel,
                velocity,
            } => self.note_on(note, channel, velocity),
            EngineCommand::NoteOff { note, channel } => self.note_off(note, channel),
            EngineCommand::AllNotesOff => self.all_notes_off(),
            EngineCommand::Reset => self.reset(),
        }
    }

    /// Renders interleaved frames into `output`, overwriting it.
    ///
    /// Queued commands are applied first. Blocks longer than the scratch buffer
    /// are rendered in pieces.
    pub fn render_block(&mut self, output: &mut [f32]) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.apply(command);
        }

        output.fill(0.0);
        let block = self.scratch.len();
        for chunk in output.chunks_mut(block) {
            let scratch = &mut self.scratch[..chunk.len()];
            for voice in self.voices.iter_mut() {
                voice.render_block(scratch);
                for (out, sample) in chunk.iter_mut().zip(scratch.iter()) {
                    *out += *sample;
                }
            }
        }

        self.voices.retain(SampleVoice::is_active);
    }

    /// Returns the number of sounding voices.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Returns how many note-ons were dropped because the pool was full.
    pub fn dropped_notes(&self) -> u64 {
        self.dropped_notes
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn output_sample_rate(&self) -> u32 {
        self.output_sample_rate
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }
}

impl std::fmt::Debug for SampleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleEngine")
            .field("slots", &self.slots.len())
            .field("active_voices", &self.voices.len())
            .field("max_voices", &self.max_voices)
            .field("dropped_notes", &self.dropped_notes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::decode::LoopPoints;

    const RATE: u32 = 44100;

    /// A looping sample holding a constant 0.25.
    fn constant_sample() -> Arc<DecodedSample> {
        Arc::new(DecodedSample::from_i16(
            vec![vec![8192; 64]],
            RATE,
            Some(LoopPoints { start: 0, end: 64 }),
            false,
        ))
    }

    fn engine(max_voices: usize) -> SampleEngine {
        SampleEngine::new(RATE, 2, max_voices, 16)
    }

    #[test]
    fn test_note_on_spawns_voice_per_slot() {
        let mut engine = engine(8);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2).with_note_range(0, 64));
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2).with_note_range(60, 127));

        engine.note_on(62, 1, 127);
        assert_eq!(engine.active_voices(), 2);
        engine.note_on(70, 1, 127);
        assert_eq!(engine.active_voices(), 3);
        engine.note_on(10, 1, 127);
        assert_eq!(engine.active_voices(), 4);
    }

    #[test]
    fn test_channel_routing() {
        let mut engine = engine(8);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2).with_channel(Some(10)));

        engine.note_on(36, 1, 127);
        assert_eq!(engine.active_voices(), 0);
        engine.note_on(36, 10, 127);
        assert_eq!(engine.active_voices(), 1);
        engine.note_on(36, 0, 127);
        engine.note_on(36, 17, 127);
        assert_eq!(engine.active_voices(), 1);
    }

    #[test]
    fn test_full_pool_drops_notes() {
        let mut engine = engine(2);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2));

        for note in 60..64 {
            engine.note_on(note, 1, 100);
        }
        assert_eq!(engine.active_voices(), 2);
        assert_eq!(engine.dropped_notes(), 2);
    }

    #[test]
    fn test_note_off_and_zero_velocity() {
        let mut engine = engine(8);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2));

        engine.note_on(60, 1, 100);
        engine.note_on(62, 1, 100);
        engine.note_off(60, 2);
        assert_eq!(engine.active_voices(), 2);
        engine.note_off(60, 1);
        assert_eq!(engine.active_voices(), 1);
        engine.note_on(62, 1, 0);
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn test_render_mixes_voices() {
        let mut engine = engine(8);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2));
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2));
        engine.note_on(60, 1, 127);

        // Longer than the scratch buffer, so it renders in pieces.
        let mut out = vec![1.0f32; 2 * 40];
        engine.render_block(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_render_without_voices_is_silent() {
        let mut engine = engine(8);
        let mut out = vec![1.0f32; 32];
        engine.render_block(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_finished_voices_are_removed() {
        let mut engine = engine(8);
        let one_shot = Arc::new(DecodedSample::from_i16(vec![vec![100; 10]], RATE, None, false));
        engine.add_slot(one_shot, VoiceConfig::new(RATE, 2));
        engine.note_on(60, 1, 127);
        assert_eq!(engine.active_voices(), 1);

        let mut out = vec![0.0f32; 2 * 16];
        engine.render_block(&mut out);
        assert_eq!(engine.active_voices(), 0);
        assert_eq!(&out[20..], &[0.0; 12]);
    }

    #[test]
    fn test_handle_commands_apply_on_render() {
        let mut engine = engine(8);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2));
        let handle = engine.handle();

        assert!(handle.note_on(60, 1, 127));
        assert_eq!(engine.active_voices(), 0);

        let mut out = vec![0.0f32; 8];
        engine.render_block(&mut out);
        assert_eq!(engine.active_voices(), 1);
        assert_eq!(out[0], 0.25);

        assert!(handle.reset());
        engine.render_block(&mut out);
        assert_eq!(engine.active_voices(), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_handle_queue_full() {
        let engine = engine(8);
        let handle = engine.handle();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            assert!(handle.note_off(60, 1));
        }
        assert!(!handle.note_off(60, 1));
    }

    #[test]
    fn test_raw_midi() {
        let mut engine = engine(8);
        engine.add_slot(constant_sample(), VoiceConfig::new(RATE, 2).with_channel(Some(1)));

        // Note on, channel 1 (0-based 0 on the wire).
        assert!(engine.handle_midi_bytes(&[0x90, 60, 100]));
        assert_eq!(engine.active_voices(), 1);
        // Note on, channel 2.
        assert!(engine.handle_midi_bytes(&[0x91, 60, 100]));
        assert_eq!(engine.active_voices(), 1);
        // Note off, channel 1.
        assert!(engine.handle_midi_bytes(&[0x80, 60, 0]));
        assert_eq!(engine.active_voices(), 0);

        assert!(engine.handle_midi_bytes(&[0x90, 60, 100]));
        assert!(engine.handle_midi_bytes(&[0x90, 61, 100]));
        // All notes off.
        assert!(engine.handle_midi_bytes(&[0xB0, 123, 0]));
        assert_eq!(engine.active_voices(), 0);

        assert!(!engine.handle_midi_bytes(&[]));
    }

    #[test]
    fn test_command_from_midi() {
        let event = LiveEvent::parse(&[0x99, 36, 0]).expect("parse");
        assert_eq!(
            EngineCommand::from_midi(&event),
            Some(EngineCommand::NoteOff {
                note: 36,
                channel: 10
            })
        );
        let event = LiveEvent::parse(&[0xB0, 120, 0]).expect("parse");
        assert_eq!(EngineCommand::from_midi(&event), Some(EngineCommand::Reset));
        let event = LiveEvent::parse(&[0xB0, 7, 100]).expect("parse");
        assert_eq!(EngineCommand::from_midi(&event), None);
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sample = std::fs::File::create(dir.path().join("tone.ul")).expect("create");
        sample.write_all(&[0x40; 32]).expect("write");

        let yaml = "output_sample_rate: 48000\n\
                    output_channels: 1\n\
                    max_voices: 4\n\
                    samples:\n  \
                      - file: tone.ul\n    \
                        low_note: 40\n    \
                        high_note: 50\n";
        let config_path = dir.path().join("sampler.yaml");
        let mut file = std::fs::File::create(&config_path).expect("create");
        file.write_all(yaml.as_bytes()).expect("write");

        let config = SamplerConfig::from_file(&config_path).expect("config");
        let loader = SampleLoader::new();
        let mut engine = SampleEngine::from_config(&config, &loader).expect("engine");
        assert_eq!(engine.slot_count(), 1);
        assert_eq!(engine.max_voices(), 4);
        assert_eq!(engine.output_sample_rate(), 48000);
        assert_eq!(engine.output_channels(), 1);

        engine.note_on(45, 1, 127);
        assert_eq!(engine.active_voices(), 1);
        engine.note_on(60, 1, 127);
        assert_eq!(engine.active_voices(), 1);
    }

    #[test]
    fn test_from_config_unknown_format() {
        let config =
            SamplerConfig::from_yaml("samples:\n  - file: tone.raw\n    format: flac\n")
                .expect("config");
        let loader = SampleLoader::new();
        assert!(matches!(
            SampleEngine::from_config(&config, &loader),
            Err(ConfigError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_from_config_missing_sample() {
        let config = SamplerConfig::from_yaml("samples:\n  - file: /nonexistent/tone.brr\n")
            .expect("config");
        let loader = SampleLoader::new();
        assert!(matches!(
            SampleEngine::from_config(&config, &loader),
            Err(ConfigError::Sample { .. })
        ));
    }
}
