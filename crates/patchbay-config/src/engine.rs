//! Engine settings: sample rate, block size and host IO.

use patchbay_core::IoConfig;
use serde::{Deserialize, Serialize};

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default maximum block size in frames.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// How the engine drives a graph.
///
/// Every field has a serde default, so an empty `[engine]` table is a
/// stereo 48 kHz engine with MIDI in and out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum frames per block.
    pub block_size: usize,
    /// Host audio input channels.
    pub audio_inputs: u32,
    /// Host audio output channels.
    pub audio_outputs: u32,
    /// Whether a host MIDI input exists.
    pub midi_input: bool,
    /// Whether a host MIDI output exists.
    pub midi_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            audio_inputs: 2,
            audio_outputs: 2,
            midi_input: true,
            midi_output: true,
        }
    }
}

impl EngineConfig {
    /// Host IO the graph is built against.
    pub fn io(&self) -> IoConfig {
        IoConfig {
            audio_inputs: self.audio_inputs,
            audio_outputs: self.audio_outputs,
            midi_input: self.midi_input,
            midi_output: self.midi_output,
        }
    }

    /// Sample rate as the engine uses it.
    pub fn sample_rate_hz(&self) -> f64 {
        f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.io(), IoConfig::stereo());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let config: EngineConfig = toml::from_str("sample_rate = 44100\nmidi_output = false").unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert!(!config.io().midi_output);
        assert!(config.io().midi_input);
    }
}
