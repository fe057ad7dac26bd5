//! Multichannel audio buffers and the render buffer pool.
//!
//! [`AudioBuffer`] is what processors see: one `Vec<f32>` per lane, audio
//! lanes first, control lanes after. The [`BufferPool`] backs a compiled
//! render sequence; its lanes are swapped into a node's buffer for the
//! duration of one render call, so no samples are copied and nothing is
//! allocated.
//!
//! Pool slots are assigned by liveness analysis at compile time: a slot is
//! live from the op that first writes it to the last op that reads it, then
//! it is free for reuse. A linear chain of stereo nodes needs four slots no
//! matter how long it is.

use crate::midi::MidiBuffer;

/// Owned multichannel sample buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    num_samples: usize,
}

impl AudioBuffer {
    /// Zeroed buffer of `num_channels` x `num_samples`.
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_samples]; num_channels],
            num_samples,
        }
    }

    /// Buffer of `num_channels` empty lanes, filled by swapping storage in.
    pub fn placeholder(num_channels: usize) -> Self {
        Self {
            channels: (0..num_channels).map(|_| Vec::new()).collect(),
            num_samples: 0,
        }
    }

    /// Builds a buffer from per-channel sample vectors. The block length is
    /// the shortest channel.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        let num_samples = channels.iter().map(Vec::len).min().unwrap_or(0);
        Self {
            channels,
            num_samples,
        }
    }

    /// Number of lanes.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Active samples per lane.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Sets the active length. Lanes shorter than `num_samples` expose only
    /// what they hold.
    pub fn set_num_samples(&mut self, num_samples: usize) {
        self.num_samples = num_samples;
    }

    /// Samples of lane `index`.
    pub fn channel(&self, index: usize) -> &[f32] {
        let lane = &self.channels[index];
        &lane[..self.num_samples.min(lane.len())]
    }

    /// Mutable samples of lane `index`.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let len = self.num_samples;
        let lane = &mut self.channels[index];
        let end = len.min(lane.len());
        &mut lane[..end]
    }

    /// Zeroes every lane.
    pub fn clear(&mut self) {
        for index in 0..self.channels.len() {
            self.channel_mut(index).fill(0.0);
        }
    }

    /// Zeroes lanes in `range`, clamped to the lane count.
    pub fn clear_channels(&mut self, range: std::ops::Range<usize>) {
        let end = range.end.min(self.channels.len());
        for index in range.start.min(end)..end {
            self.channel_mut(index).fill(0.0);
        }
    }

    /// Multiplies lane `index` by a constant.
    pub fn apply_gain(&mut self, index: usize, gain: f32) {
        if gain != 1.0 {
            for sample in self.channel_mut(index) {
                *sample *= gain;
            }
        }
    }

    /// Multiplies lane `index` by a linear ramp from `start` to `end`.
    ///
    /// Sample `i` of an `n` sample block is scaled by
    /// `start + (end - start) * i / n`.
    pub fn apply_gain_ramp(&mut self, index: usize, start: f32, end: f32) {
        if start == end {
            self.apply_gain(index, start);
            return;
        }
        let lane = self.channel_mut(index);
        let step = (end - start) / lane.len().max(1) as f32;
        let mut gain = start;
        for sample in lane {
            *sample *= gain;
            gain += step;
        }
    }

    /// Root mean square of lane `index`.
    pub fn rms(&self, index: usize) -> f32 {
        let lane = self.channel(index);
        if lane.is_empty() {
            return 0.0;
        }
        let sum: f32 = lane.iter().map(|s| s * s).sum();
        (sum / lane.len() as f32).sqrt()
    }

    /// Copies the overlapping lanes and samples of `other`.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let lanes = self.num_channels().min(other.num_channels());
        for index in 0..lanes {
            let src = other.channel(index);
            let dst = self.channel_mut(index);
            let n = src.len().min(dst.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
    }

    /// Copies lane `src` over lane `dst` within this buffer.
    pub fn copy_channel(&mut self, src: usize, dst: usize) {
        if src == dst {
            return;
        }
        let len = self.num_samples;
        let (from, to) = if src < dst {
            let (head, tail) = self.channels.split_at_mut(dst);
            (&head[src], &mut tail[0])
        } else {
            let (head, tail) = self.channels.split_at_mut(src);
            (&tail[0], &mut head[dst])
        };
        let n = len.min(from.len()).min(to.len());
        to[..n].copy_from_slice(&from[..n]);
    }

    pub(crate) fn swap_lane(&mut self, index: usize, storage: &mut Vec<f32>) {
        std::mem::swap(&mut self.channels[index], storage);
    }
}

/// Scratch lanes backing one compiled render sequence.
#[derive(Debug, Default)]
pub struct BufferPool {
    audio: Vec<Vec<f32>>,
    midi: Vec<MidiBuffer>,
    block_size: usize,
}

impl BufferPool {
    /// Pool of `audio_count` zeroed sample lanes and `midi_count` MIDI buffers.
    pub fn new(audio_count: usize, midi_count: usize, block_size: usize, midi_capacity: usize) -> Self {
        Self {
            audio: vec![vec![0.0; block_size]; audio_count],
            midi: (0..midi_count)
                .map(|_| MidiBuffer::with_capacity(midi_capacity))
                .collect(),
            block_size,
        }
    }

    /// Number of sample lanes.
    pub fn audio_count(&self) -> usize {
        self.audio.len()
    }

    /// Number of MIDI buffers.
    pub fn midi_count(&self) -> usize {
        self.midi.len()
    }

    /// Samples per lane.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// First `len` samples of lane `idx`.
    pub fn audio(&self, idx: usize, len: usize) -> &[f32] {
        &self.audio[idx][..len]
    }

    /// Mutable first `len` samples of lane `idx`.
    pub fn audio_mut(&mut self, idx: usize, len: usize) -> &mut [f32] {
        &mut self.audio[idx][..len]
    }

    /// Reads lane `src` while writing lane `dst`. The two must differ.
    pub fn audio_pair(&mut self, src: usize, dst: usize, len: usize) -> (&[f32], &mut [f32]) {
        debug_assert_ne!(src, dst);
        if src < dst {
            let (lo, hi) = self.audio.split_at_mut(dst);
            (&lo[src][..len], &mut hi[0][..len])
        } else {
            let (lo, hi) = self.audio.split_at_mut(src);
            (&hi[0][..len], &mut lo[dst][..len])
        }
    }

    /// MIDI buffer `idx`.
    pub fn midi(&self, idx: usize) -> &MidiBuffer {
        &self.midi[idx]
    }

    /// Mutable MIDI buffer `idx`.
    pub fn midi_mut(&mut self, idx: usize) -> &mut MidiBuffer {
        &mut self.midi[idx]
    }

    /// Reads MIDI buffer `src` while writing `dst`. The two must differ.
    pub fn midi_pair(&mut self, src: usize, dst: usize) -> (&MidiBuffer, &mut MidiBuffer) {
        debug_assert_ne!(src, dst);
        if src < dst {
            let (lo, hi) = self.midi.split_at_mut(dst);
            (&lo[src], &mut hi[0])
        } else {
            let (lo, hi) = self.midi.split_at_mut(src);
            (&hi[0], &mut lo[dst])
        }
    }

    pub(crate) fn audio_storage(&mut self, idx: usize) -> &mut Vec<f32> {
        &mut self.audio[idx]
    }

    pub(crate) fn midi_storage(&mut self, idx: usize) -> &mut MidiBuffer {
        &mut self.midi[idx]
    }
}
