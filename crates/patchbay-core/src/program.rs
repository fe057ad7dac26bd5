//! Named MIDI program snapshots kept by a node.

use serde::{Deserialize, Serialize};

/// One saved program: its number, a name, and the processor state blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiProgram {
    /// Program number, 0..=127.
    pub program: i32,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Processor state captured by [`GraphNode::save_midi_program`](crate::GraphNode::save_midi_program).
    #[serde(default)]
    pub state: Vec<u8>,
}

/// A node's program list, ordered by program number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBank {
    programs: Vec<MidiProgram>,
}

impl ProgramBank {
    /// Program by number.
    pub fn get(&self, program: i32) -> Option<&MidiProgram> {
        self.programs.iter().find(|p| p.program == program)
    }

    /// Mutable program by number, created empty if absent.
    pub fn entry(&mut self, program: i32) -> &mut MidiProgram {
        let at = match self.programs.binary_search_by_key(&program, |p| p.program) {
            Ok(at) => at,
            Err(at) => {
                self.programs.insert(
                    at,
                    MidiProgram {
                        program,
                        name: String::new(),
                        state: Vec::new(),
                    },
                );
                at
            }
        };
        &mut self.programs[at]
    }

    /// Removes a program. Returns whether it existed.
    pub fn remove(&mut self, program: i32) -> bool {
        let before = self.programs.len();
        self.programs.retain(|p| p.program != program);
        before != self.programs.len()
    }

    /// Programs in number order.
    pub fn iter(&self) -> impl Iterator<Item = &MidiProgram> {
        self.programs.iter()
    }

    /// Number of saved programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether no programs are saved.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// JSON text, empty for an empty bank.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        if self.programs.is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(self)
    }

    /// Parses [`to_json`](Self::to_json) output. Empty text is an empty bank.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut bank: Self = serde_json::from_str(text)?;
        bank.programs.sort_by_key(|p| p.program);
        bank.programs.dedup_by_key(|p| p.program);
        Ok(bank)
    }
}
