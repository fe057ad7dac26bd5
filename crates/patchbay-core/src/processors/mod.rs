//! Built-in processors.
//!
//! | Identifier | Type | Ports |
//! |------------|------|-------|
//! | `gain` | [`GainProcessor`] | N audio in, N audio out |
//! | `passthrough` | [`PassthroughProcessor`] | N audio in/out, optional MIDI in/out |
//! | `sine` | [`SineProcessor`] | N audio out |
//! | `audio.input`, `audio.output`, `midi.input`, `midi.output` | [`IoProcessor`] | from the graph's [`IoConfig`](crate::graph::IoConfig) |
//! | `graph` | [`SubGraphProcessor`] | from the nested graph's IO |
//!
//! [`PlaceholderProcessor`] stands in for processors the factory could not
//! create.

mod gain;
mod io;
mod passthrough;
mod placeholder;
mod sine;
mod subgraph;

pub use gain::GainProcessor;
pub use io::{IoNodeType, IoProcessor};
pub use passthrough::PassthroughProcessor;
pub use placeholder::PlaceholderProcessor;
pub use sine::SineProcessor;
pub use subgraph::SubGraphProcessor;

use crate::processor::StateError;

/// Reads `N` little-endian `f32`s from a state blob.
pub(crate) fn read_f32s<const N: usize>(state: &[u8]) -> Result<[f32; N], StateError> {
    if state.len() != N * 4 {
        return Err(StateError(format!(
            "expected {} bytes, got {}",
            N * 4,
            state.len()
        )));
    }
    let mut out = [0.0; N];
    for (value, chunk) in out.iter_mut().zip(state.chunks_exact(4)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(out)
}

/// Writes `f32`s as little-endian bytes.
pub(crate) fn write_f32s(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_state_roundtrip() {
        let bytes = write_f32s(&[0.5, -2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(read_f32s::<2>(&bytes).unwrap(), [0.5, -2.0]);
        assert!(read_f32s::<1>(&bytes).is_err());
    }
}
