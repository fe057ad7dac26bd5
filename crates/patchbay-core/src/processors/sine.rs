//! Test-tone generator.

use std::f32::consts::TAU;

use crate::buffer::AudioBuffer;
use crate::midi::MidiPipe;
use crate::port::PortConfig;
use crate::processor::{Processor, StateError};

use super::{read_f32s, write_f32s};

/// Sine oscillator writing the same tone to every output channel.
///
/// State is `[frequency, amplitude]` as little-endian `f32`s.
#[derive(Debug, Clone)]
pub struct SineProcessor {
    frequency: f32,
    amplitude: f32,
    channels: u32,
    sample_rate: f32,
    /// Phase in [0, 1).
    phase: f32,
}

impl SineProcessor {
    /// Creates an oscillator with `channels` outputs.
    pub fn new(frequency: f32, amplitude: f32, channels: u32) -> Self {
        Self {
            frequency,
            amplitude,
            channels,
            sample_rate: 48000.0,
            phase: 0.0,
        }
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Peak amplitude.
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl Processor for SineProcessor {
    fn name(&self) -> &str {
        "Sine"
    }

    fn identifier(&self) -> &str {
        "sine"
    }

    fn port_config(&self) -> PortConfig {
        PortConfig::audio(0, self.channels)
    }

    fn prepare(&mut self, sample_rate: f64, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.phase = 0.0;
    }

    fn process(&mut self, audio: &mut AudioBuffer, _midi: &mut MidiPipe) {
        let channels = (self.channels as usize).min(audio.num_channels());
        if channels == 0 {
            return;
        }
        let increment = self.frequency / self.sample_rate;
        let mut phase = self.phase;
        for sample in audio.channel_mut(0) {
            *sample = self.amplitude * (phase * TAU).sin();
            phase = (phase + increment).fract();
        }
        self.phase = phase;
        for ch in 1..channels {
            audio.copy_channel(0, ch);
        }
    }

    fn state(&self) -> Vec<u8> {
        write_f32s(&[self.frequency, self.amplitude])
    }

    fn set_state(&mut self, state: &[u8]) -> Result<(), StateError> {
        let [frequency, amplitude] = read_f32s::<2>(state)?;
        if !(frequency.is_finite() && frequency >= 0.0) {
            return Err(StateError(format!("invalid frequency {frequency}")));
        }
        self.frequency = frequency;
        self.amplitude = amplitude;
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_fills_outputs() {
        let mut sine = SineProcessor::new(1000.0, 0.5, 2);
        sine.prepare(48000.0, 64);
        let mut audio = AudioBuffer::new(2, 64);
        sine.process(&mut audio, &mut MidiPipe::default());
        assert_eq!(audio.channel(0)[0], 0.0);
        let peak = audio.channel(0).iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.45 && peak <= 0.5);
        assert_eq!(audio.channel(0), audio.channel(1));
    }

    #[test]
    fn test_sine_phase_continues() {
        let mut sine = SineProcessor::new(100.0, 1.0, 1);
        sine.prepare(48000.0, 32);
        let mut whole = AudioBuffer::new(1, 64);
        sine.process(&mut whole, &mut MidiPipe::default());

        sine.reset();
        let mut first = AudioBuffer::new(1, 32);
        let mut second = AudioBuffer::new(1, 32);
        sine.process(&mut first, &mut MidiPipe::default());
        sine.process(&mut second, &mut MidiPipe::default());
        for (a, b) in whole.channel(0)[32..].iter().zip(second.channel(0)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_sine_rejects_bad_state() {
        let mut sine = SineProcessor::new(440.0, 1.0, 1);
        assert!(sine.set_state(&write_f32s(&[f32::NAN, 1.0])).is_err());
        assert_eq!(sine.frequency(), 440.0);
    }
}
