//! Stand-in for a processor that could not be created.

use crate::buffer::AudioBuffer;
use crate::midi::MidiPipe;
use crate::port::PortConfig;
use crate::processor::{Processor, StateError};

/// Keeps a node's identity, ports and state blob alive when its real
/// processor is unavailable, so arcs and saved state survive a load.
/// Renders silence.
#[derive(Debug, Clone)]
pub struct PlaceholderProcessor {
    identifier: String,
    name: String,
    ports: PortConfig,
    state: Vec<u8>,
}

impl PlaceholderProcessor {
    /// Creates a placeholder reporting `identifier` and the given ports.
    pub fn new(identifier: impl Into<String>, name: impl Into<String>, ports: PortConfig, state: Vec<u8>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            ports,
            state,
        }
    }
}

impl Processor for PlaceholderProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn port_config(&self) -> PortConfig {
        self.ports
    }

    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}

    fn process(&mut self, audio: &mut AudioBuffer, midi: &mut MidiPipe) {
        audio.clear();
        midi.clear();
    }

    fn state(&self) -> Vec<u8> {
        self.state.clone()
    }

    fn set_state(&mut self, state: &[u8]) -> Result<(), StateError> {
        self.state = state.to_vec();
        Ok(())
    }
}
