//! A nested graph wrapped as one processor.

use crate::buffer::AudioBuffer;
use crate::graph::{GraphRenderer, SubGraphHandle};
use crate::midi::{MidiBuffer, MidiPipe};
use crate::port::PortConfig;
use crate::processor::Processor;

/// Renders a nested graph inside the single render op its parent allots.
///
/// The node's audio lanes are the inner graph's host channels, and MIDI
/// lane 0 is the inner host MIDI buffer. Inner edits go through the
/// [`SubGraphHandle`]; the render side only ever uses the inner
/// [`GraphRenderer`], so it never takes the handle's lock.
pub struct SubGraphProcessor {
    handle: SubGraphHandle,
    renderer: GraphRenderer,
    scratch: MidiBuffer,
}

impl std::fmt::Debug for SubGraphProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubGraphProcessor")
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

impl SubGraphProcessor {
    pub(crate) fn new(handle: SubGraphHandle, renderer: GraphRenderer) -> Self {
        Self {
            handle,
            renderer,
            scratch: MidiBuffer::default(),
        }
    }
}

impl Processor for SubGraphProcessor {
    fn name(&self) -> &str {
        "Graph"
    }

    fn identifier(&self) -> &str {
        crate::description::SUBGRAPH_IDENTIFIER
    }

    fn port_config(&self) -> PortConfig {
        let io = self.renderer.io_config();
        PortConfig::audio(io.audio_inputs, io.audio_outputs)
            .with_midi(u32::from(io.midi_input), u32::from(io.midi_output))
    }

    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        self.scratch = MidiBuffer::new();
        self.handle.lock().prepare_to_render(sample_rate, max_block_size);
    }

    fn release(&mut self) {
        self.handle.lock().release_resources();
        self.scratch = MidiBuffer::default();
    }

    fn process(&mut self, audio: &mut AudioBuffer, midi: &mut MidiPipe) {
        let Self { renderer, scratch, .. } = self;
        match midi.get_mut(0) {
            Some(lane) => renderer.render(audio, lane),
            None => {
                scratch.clear();
                renderer.render(audio, scratch);
            }
        }
    }

    fn latency_samples(&self) -> usize {
        self.renderer.latency_samples()
    }

    fn reset(&mut self) {
        self.scratch.clear();
    }
}
