//! The trait every graph-resident processing unit implements.

use crate::buffer::AudioBuffer;
use crate::midi::MidiPipe;
use crate::port::PortConfig;

/// Error restoring a processor from a state blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid processor state: {0}")]
pub struct StateError(pub String);

/// A concrete processing unit wrapped by a [`GraphNode`](crate::GraphNode).
///
/// Processors are rendered in place: on entry the first `audio_inputs`
/// lanes of `audio` hold the input, on return the first `audio_outputs`
/// lanes hold the output. Control lanes follow the audio lanes. MIDI lane
/// `i` of the pipe is MIDI input `i` on entry and MIDI output `i` on return.
///
/// `process` runs on the render thread and must not allocate, lock, or
/// block. Everything else runs on the control thread.
pub trait Processor: Send {
    /// Display name.
    fn name(&self) -> &str;

    /// Registry identifier used to recreate this processor.
    fn identifier(&self) -> &str;

    /// Port counts. Queried at creation and after an IO change.
    fn port_config(&self) -> PortConfig;

    /// Allocates for the given rate and maximum block size.
    fn prepare(&mut self, sample_rate: f64, max_block_size: usize);

    /// Frees what `prepare` allocated.
    fn release(&mut self) {}

    /// Renders one block in place.
    fn process(&mut self, audio: &mut AudioBuffer, midi: &mut MidiPipe);

    /// Processing delay in samples.
    fn latency_samples(&self) -> usize {
        0
    }

    /// Serializable state.
    fn state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restores from [`state`](Self::state).
    fn set_state(&mut self, _state: &[u8]) -> Result<(), StateError> {
        Ok(())
    }

    /// Clears internal history (filters, phases).
    fn reset(&mut self) {}
}
