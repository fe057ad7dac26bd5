//! Runtime-selectable oversampling for graph nodes.
//!
//! A node with an oversampling factor `F` renders its processor at `F` times
//! the host rate. Input lanes are upsampled by linear interpolation; output
//! lanes go through a 16-tap windowed-sinc lowpass and are decimated back to
//! the host rate.
//!
//! The decimation filter is symmetric, so its group delay is constant at
//! `(FILTER_TAPS - 1) / 2` oversampled samples, which is
//! [`oversampling_latency`] host samples. Nodes report it rounded, on top
//! of their own latency.

use std::f64::consts::PI;

use crate::buffer::AudioBuffer;

/// Largest supported power: `2^3 = 8x`.
pub const MAX_OVERSAMPLING_POW: u32 = 3;

/// Decimation filter length.
pub const FILTER_TAPS: usize = 16;

const FILTER_ORDER: usize = FILTER_TAPS - 1;

/// Oversampling setup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OversamplingError {
    /// Factor is not a power of two up to `2^MAX_OVERSAMPLING_POW`.
    #[error("oversampling factor {0} is not one of 1, 2, 4, 8")]
    InvalidFactor(usize),
    /// Buffer allocation failed.
    #[error("cannot allocate oversampling buffers ({channels} x {samples} samples)")]
    Allocation {
        /// Lanes requested.
        channels: usize,
        /// Samples per lane requested.
        samples: usize,
    },
}

/// Whether `factor` is an accepted oversampling factor.
pub fn is_valid_factor(factor: usize) -> bool {
    factor.is_power_of_two() && factor <= 1 << MAX_OVERSAMPLING_POW
}

/// Delay added by oversampling at `factor`, in host-rate samples.
pub fn oversampling_latency(factor: usize) -> f32 {
    if factor <= 1 {
        0.0
    } else {
        FILTER_ORDER as f32 / 2.0 / factor as f32
    }
}

/// Lowpass for decimation by `factor`: Blackman-windowed sinc, cutoff at
/// 90% of the host Nyquist, normalized to unity DC gain.
fn design_filter(factor: usize) -> [f32; FILTER_TAPS] {
    let cutoff = 0.45 / factor as f64;
    let centre = FILTER_ORDER as f64 / 2.0;
    let mut taps = [0.0f64; FILTER_TAPS];
    for (n, tap) in taps.iter_mut().enumerate() {
        let x = n as f64 - centre;
        let sinc = if x == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * PI * cutoff * x).sin() / (PI * x)
        };
        let phase = 2.0 * PI * n as f64 / FILTER_ORDER as f64;
        let window = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
        *tap = sinc * window;
    }
    let sum: f64 = taps.iter().sum();
    let mut out = [0.0f32; FILTER_TAPS];
    for (o, t) in out.iter_mut().zip(taps) {
        *o = (t / sum) as f32;
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct LaneState {
    prev: f32,
    delay: [f32; FILTER_TAPS],
}

impl LaneState {
    const ZERO: Self = Self {
        prev: 0.0,
        delay: [0.0; FILTER_TAPS],
    };
}

/// Per-node oversampling state.
#[derive(Debug)]
pub struct Oversampler {
    factor: usize,
    coeffs: [f32; FILTER_TAPS],
    lanes: Vec<LaneState>,
    buffer: AudioBuffer,
}

impl Oversampler {
    /// Creates an unprepared oversampler. Does not allocate sample storage.
    pub fn new(factor: usize) -> Result<Self, OversamplingError> {
        if !is_valid_factor(factor) {
            return Err(OversamplingError::InvalidFactor(factor));
        }
        Ok(Self {
            factor,
            coeffs: design_filter(factor),
            lanes: Vec::new(),
            buffer: AudioBuffer::default(),
        })
    }

    /// Allocates storage for `channels` lanes of `max_block_size` host samples.
    pub fn prepare(&mut self, channels: usize, max_block_size: usize) -> Result<(), OversamplingError> {
        let samples = max_block_size.saturating_mul(self.factor);
        let failed = || OversamplingError::Allocation { channels, samples };

        let mut storage: Vec<Vec<f32>> = Vec::new();
        storage.try_reserve_exact(channels).map_err(|_| failed())?;
        for _ in 0..channels {
            let mut lane = Vec::new();
            lane.try_reserve_exact(samples).map_err(|_| failed())?;
            lane.resize(samples, 0.0);
            storage.push(lane);
        }
        let mut lanes = Vec::new();
        lanes.try_reserve_exact(channels).map_err(|_| failed())?;
        lanes.resize(channels, LaneState::ZERO);

        self.buffer = AudioBuffer::from_channels(storage);
        self.lanes = lanes;
        Ok(())
    }

    /// Oversampling factor.
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Added delay in host samples.
    pub fn latency(&self) -> f32 {
        oversampling_latency(self.factor)
    }

    /// Clears interpolation and filter history.
    pub fn reset(&mut self) {
        self.lanes.fill(LaneState::ZERO);
        self.buffer.clear();
    }

    /// Upsamples `input` into the internal buffer and returns it.
    ///
    /// Input past the prepared block size is ignored.
    pub fn upsample(&mut self, input: &AudioBuffer) -> &mut AudioBuffer {
        let factor = self.factor;
        let n = input.num_samples();
        self.buffer.set_num_samples(n * factor);
        let lanes = input.num_channels().min(self.lanes.len());
        let step = 1.0 / factor as f32;
        for ch in 0..lanes {
            let src = input.channel(ch);
            let state = &mut self.lanes[ch];
            let dst = self.buffer.channel_mut(ch);
            let frames = dst.len() / factor;
            for (i, &x) in src.iter().take(frames).enumerate() {
                for k in 0..factor {
                    let t = (k as f32 + 1.0) * step;
                    dst[i * factor + k] = state.prev + t * (x - state.prev);
                }
                state.prev = x;
            }
        }
        &mut self.buffer
    }

    /// Filters and decimates the internal buffer into `output`.
    pub fn downsample(&mut self, output: &mut AudioBuffer) {
        let factor = self.factor;
        let lanes = output.num_channels().min(self.lanes.len());
        for ch in 0..lanes {
            let src = self.buffer.channel(ch);
            let state = &mut self.lanes[ch];
            let dst = output.channel_mut(ch);
            for (i, out) in dst.iter_mut().enumerate() {
                let mut acc = 0.0;
                for k in 0..factor {
                    state.delay.copy_within(0..FILTER_ORDER, 1);
                    state.delay[0] = src.get(i * factor + k).copied().unwrap_or(0.0);
                    if k == factor - 1 {
                        acc = state
                            .delay
                            .iter()
                            .zip(self.coeffs.iter())
                            .map(|(s, c)| s * c)
                            .sum();
                    }
                }
                *out = acc;
            }
        }
    }
}
