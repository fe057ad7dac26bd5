//! Unity pass-through, handy as a bus or a MIDI thru.

use crate::buffer::AudioBuffer;
use crate::midi::MidiPipe;
use crate::port::PortConfig;
use crate::processor::Processor;

/// Leaves audio and MIDI untouched. Lanes are processed in place, so the
/// inputs already sit where the outputs are read.
#[derive(Debug, Clone)]
pub struct PassthroughProcessor {
    channels: u32,
    midi: bool,
}

impl PassthroughProcessor {
    /// Creates a pass-through with `channels` audio lanes and, if `midi`,
    /// one MIDI in and one MIDI out.
    pub fn new(channels: u32, midi: bool) -> Self {
        Self { channels, midi }
    }
}

impl Processor for PassthroughProcessor {
    fn name(&self) -> &str {
        "Passthrough"
    }

    fn identifier(&self) -> &str {
        "passthrough"
    }

    fn port_config(&self) -> PortConfig {
        let midi = u32::from(self.midi);
        PortConfig::audio(self.channels, self.channels).with_midi(midi, midi)
    }

    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}

    fn process(&mut self, _audio: &mut AudioBuffer, _midi: &mut MidiPipe) {}
}
