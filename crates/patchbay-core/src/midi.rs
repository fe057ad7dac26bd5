//! MIDI messages, fixed-capacity event buffers, and per-node MIDI pipes.
//!
//! [`MidiBuffer`] never grows past the capacity it was created with, so
//! writing events on the render thread cannot allocate. Events beyond the
//! capacity are dropped and counted.

/// Events a buffer holds when created with [`MidiBuffer::new`].
pub const DEFAULT_MIDI_CAPACITY: usize = 1024;

/// A short (at most three byte) MIDI message at a sample offset in the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMessage {
    /// Sample offset within the current block.
    pub time: u32,
    data: [u8; 3],
    len: u8,
}

impl MidiMessage {
    /// Creates a message from raw bytes. Bytes past the third are ignored.
    pub fn from_bytes(time: u32, bytes: &[u8]) -> Self {
        let mut data = [0; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            time,
            data,
            len: len as u8,
        }
    }

    /// Note-on. `channel` is 1..=16.
    pub fn note_on(channel: u8, note: u8, velocity: u8, time: u32) -> Self {
        Self::from_bytes(time, &[0x90 | channel_bits(channel), note & 0x7f, velocity & 0x7f])
    }

    /// Note-off. `channel` is 1..=16.
    pub fn note_off(channel: u8, note: u8, velocity: u8, time: u32) -> Self {
        Self::from_bytes(time, &[0x80 | channel_bits(channel), note & 0x7f, velocity & 0x7f])
    }

    /// Controller change. `channel` is 1..=16.
    pub fn controller(channel: u8, controller: u8, value: u8, time: u32) -> Self {
        Self::from_bytes(time, &[0xb0 | channel_bits(channel), controller & 0x7f, value & 0x7f])
    }

    /// Program change. `channel` is 1..=16.
    pub fn program_change(channel: u8, program: u8, time: u32) -> Self {
        Self::from_bytes(time, &[0xc0 | channel_bits(channel), program & 0x7f])
    }

    /// Raw bytes of the message.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Status byte, or 0 for an empty message.
    pub fn status(&self) -> u8 {
        if self.len == 0 { 0 } else { self.data[0] }
    }

    /// Channel 1..=16 for channel voice messages, `None` for system messages.
    pub fn channel(&self) -> Option<u8> {
        let status = self.status();
        (0x80..0xf0).contains(&status).then_some((status & 0x0f) + 1)
    }

    /// Note-on with non-zero velocity.
    pub fn is_note_on(&self) -> bool {
        self.status() & 0xf0 == 0x90 && self.len == 3 && self.data[2] > 0
    }

    /// Note-off, including note-on with zero velocity.
    pub fn is_note_off(&self) -> bool {
        let kind = self.status() & 0xf0;
        kind == 0x80 || (kind == 0x90 && self.len == 3 && self.data[2] == 0)
    }

    /// Any message carrying a note number (note on/off, poly aftertouch).
    pub fn has_note_number(&self) -> bool {
        matches!(self.status() & 0xf0, 0x80 | 0x90 | 0xa0) && self.len >= 2
    }

    /// Note number for note messages.
    pub fn note_number(&self) -> Option<u8> {
        self.has_note_number().then_some(self.data[1])
    }

    /// Replaces the note number of a note message.
    pub fn set_note_number(&mut self, note: u8) {
        if self.has_note_number() {
            self.data[1] = note & 0x7f;
        }
    }

    /// Whether this is a program change.
    pub fn is_program_change(&self) -> bool {
        self.status() & 0xf0 == 0xc0 && self.len >= 2
    }

    /// Program number of a program change.
    pub fn program_number(&self) -> Option<u8> {
        self.is_program_change().then_some(self.data[1])
    }
}

fn channel_bits(channel: u8) -> u8 {
    channel.clamp(1, 16) - 1
}

/// Time-ordered MIDI events with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiBuffer {
    events: Vec<MidiMessage>,
    limit: usize,
    dropped: usize,
}

impl Default for MidiBuffer {
    /// A zero-capacity placeholder. Does not allocate.
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl MidiBuffer {
    /// Buffer with [`DEFAULT_MIDI_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MIDI_CAPACITY)
    }

    /// Buffer holding at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            limit: capacity,
            dropped: 0,
        }
    }

    /// Maximum events this buffer holds.
    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the buffer has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped because the buffer was full, since the last clear.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Removes all events.
    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Inserts an event after any events with the same or earlier time.
    ///
    /// Returns `false` and drops the event if the buffer is full.
    pub fn push(&mut self, message: MidiMessage) -> bool {
        if self.events.len() >= self.limit {
            self.dropped += 1;
            return false;
        }
        let at = self.events.partition_point(|e| e.time <= message.time);
        self.events.insert(at, message);
        true
    }

    /// Events in time order.
    pub fn iter(&self) -> impl Iterator<Item = &MidiMessage> {
        self.events.iter()
    }

    /// Events as a slice.
    pub fn as_slice(&self) -> &[MidiMessage] {
        &self.events
    }

    /// Keeps events matching `keep`, mutating the survivors in place.
    pub fn retain_mut(&mut self, keep: impl FnMut(&mut MidiMessage) -> bool) {
        self.events.retain_mut(keep);
    }

    /// Replaces the contents with `other`'s events.
    pub fn copy_from(&mut self, other: &MidiBuffer) {
        self.clear();
        self.merge_from(other);
    }

    /// Merges `other`'s events in time order.
    pub fn merge_from(&mut self, other: &MidiBuffer) {
        for event in &other.events {
            self.push(*event);
        }
    }

    /// Multiplies event times by `factor`, for oversampled processing.
    pub fn scale_times(&mut self, factor: u32) {
        for event in &mut self.events {
            event.time = event.time.saturating_mul(factor);
        }
    }

    /// Divides event times by `factor`, undoing [`scale_times`](Self::scale_times).
    pub fn unscale_times(&mut self, factor: u32) {
        if factor > 1 {
            for event in &mut self.events {
                event.time /= factor;
            }
        }
    }
}

/// The MIDI buffers one node sees during a render call, one per MIDI lane.
///
/// The graph swaps pooled buffers into the pipe before rendering and back
/// out afterwards, so the pipe itself owns only placeholders between calls.
#[derive(Debug, Default)]
pub struct MidiPipe {
    buffers: Vec<MidiBuffer>,
}

impl MidiPipe {
    /// Pipe of `slots` zero-capacity placeholders.
    pub fn placeholder(slots: usize) -> Self {
        Self {
            buffers: (0..slots).map(|_| MidiBuffer::default()).collect(),
        }
    }

    /// Pipe owning the given buffers.
    pub fn with_buffers(buffers: Vec<MidiBuffer>) -> Self {
        Self { buffers }
    }

    /// Number of lanes.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the pipe has no lanes.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer of lane `index`.
    pub fn get(&self, index: usize) -> Option<&MidiBuffer> {
        self.buffers.get(index)
    }

    /// Mutable buffer of lane `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut MidiBuffer> {
        self.buffers.get_mut(index)
    }

    /// Iterates mutable lanes.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MidiBuffer> {
        self.buffers.iter_mut()
    }

    /// Clears every lane.
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }

    pub(crate) fn swap_lane(&mut self, index: usize, other: &mut MidiBuffer) {
        std::mem::swap(&mut self.buffers[index], other);
    }
}

/// Set of enabled MIDI channels 1..=16 as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiChannels(u16);

impl Default for MidiChannels {
    fn default() -> Self {
        Self::all()
    }
}

impl MidiChannels {
    /// All sixteen channels enabled.
    pub const fn all() -> Self {
        Self(u16::MAX)
    }

    /// No channels enabled.
    pub const fn none() -> Self {
        Self(0)
    }

    /// From a raw mask, bit 0 is channel 1.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw mask.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether every channel is enabled.
    pub const fn is_omni(self) -> bool {
        self.0 == u16::MAX
    }

    /// Whether `channel` (1..=16) is enabled.
    pub fn is_on(self, channel: u8) -> bool {
        (1..=16).contains(&channel) && self.0 & (1 << (channel - 1)) != 0
    }

    /// Enables or disables `channel` (1..=16). Out-of-range channels are ignored.
    pub fn set(&mut self, channel: u8, on: bool) {
        if (1..=16).contains(&channel) {
            let bit = 1 << (channel - 1);
            if on {
                self.0 |= bit;
            } else {
                self.0 &= !bit;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_time_order() {
        let mut buffer = MidiBuffer::with_capacity(8);
        buffer.push(MidiMessage::note_on(1, 60, 100, 10));
        buffer.push(MidiMessage::note_on(1, 62, 100, 2));
        buffer.push(MidiMessage::note_off(1, 60, 0, 10));
        let times: Vec<_> = buffer.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![2, 10, 10]);
        assert!(buffer.as_slice()[1].is_note_on());
        assert!(buffer.as_slice()[2].is_note_off());
    }

    #[test]
    fn test_full_buffer_drops() {
        let mut buffer = MidiBuffer::with_capacity(2);
        assert!(buffer.push(MidiMessage::note_on(1, 60, 1, 0)));
        assert!(buffer.push(MidiMessage::note_on(1, 61, 1, 0)));
        assert!(!buffer.push(MidiMessage::note_on(1, 62, 1, 0)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        buffer.clear();
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_merge_interleaves() {
        let mut a = MidiBuffer::with_capacity(8);
        let mut b = MidiBuffer::with_capacity(8);
        a.push(MidiMessage::controller(1, 7, 100, 0));
        a.push(MidiMessage::controller(1, 7, 90, 20));
        b.push(MidiMessage::program_change(2, 5, 10));
        a.merge_from(&b);
        let times: Vec<_> = a.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0, 10, 20]);
        assert_eq!(a.as_slice()[1].program_number(), Some(5));
        assert_eq!(a.as_slice()[1].channel(), Some(2));
    }

    #[test]
    fn test_note_velocity_zero_is_off() {
        let msg = MidiMessage::from_bytes(0, &[0x90, 64, 0]);
        assert!(!msg.is_note_on());
        assert!(msg.is_note_off());
        assert_eq!(msg.note_number(), Some(64));
    }

    #[test]
    fn test_channel_mask() {
        let mut channels = MidiChannels::none();
        channels.set(1, true);
        channels.set(16, true);
        channels.set(17, true);
        assert!(channels.is_on(1));
        assert!(channels.is_on(16));
        assert!(!channels.is_on(2));
        assert!(!channels.is_on(0));
        assert_eq!(channels.bits(), 0x8001);
        assert!(MidiChannels::default().is_omni());
    }

    #[test]
    fn test_time_scaling() {
        let mut buffer = MidiBuffer::with_capacity(4);
        buffer.push(MidiMessage::note_on(1, 60, 1, 3));
        buffer.scale_times(4);
        assert_eq!(buffer.as_slice()[0].time, 12);
        buffer.unscale_times(4);
        assert_eq!(buffer.as_slice()[0].time, 3);
    }
}
