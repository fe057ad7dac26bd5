//! Fixed-gain stage.

use crate::buffer::AudioBuffer;
use crate::midi::MidiPipe;
use crate::port::PortConfig;
use crate::processor::{Processor, StateError};

use super::{read_f32s, write_f32s};

/// Multiplies every channel by a constant linear gain.
///
/// The gain is state, not a smoothed parameter: node-level gain ramps
/// already cover click-free level changes.
///
/// # Example
///
/// ```rust
/// use patchbay_core::processors::GainProcessor;
/// use patchbay_core::{AudioBuffer, MidiPipe, Processor};
///
/// let mut gain = GainProcessor::new(0.5, 1);
/// let mut audio = AudioBuffer::from_channels(vec![vec![1.0; 4]]);
/// gain.process(&mut audio, &mut MidiPipe::default());
/// assert_eq!(audio.channel(0), &[0.5; 4]);
/// ```
#[derive(Debug, Clone)]
pub struct GainProcessor {
    gain: f32,
    channels: u32,
}

impl GainProcessor {
    /// Creates a stage with `channels` ins and outs.
    pub fn new(gain: f32, channels: u32) -> Self {
        Self { gain, channels }
    }

    /// Linear gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Sets the linear gain.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl Processor for GainProcessor {
    fn name(&self) -> &str {
        "Gain"
    }

    fn identifier(&self) -> &str {
        "gain"
    }

    fn port_config(&self) -> PortConfig {
        PortConfig::audio(self.channels, self.channels)
    }

    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}

    fn process(&mut self, audio: &mut AudioBuffer, _midi: &mut MidiPipe) {
        for ch in 0..self.channels as usize {
            audio.apply_gain(ch, self.gain);
        }
    }

    fn state(&self) -> Vec<u8> {
        write_f32s(&[self.gain])
    }

    fn set_state(&mut self, state: &[u8]) -> Result<(), StateError> {
        let [gain] = read_f32s::<1>(state)?;
        self.gain = gain;
        Ok(())
    }
}
