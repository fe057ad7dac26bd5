//! WAV file reading and writing via hound.
//!
//! Channels are kept separate (one `Vec<f32>` per channel) since that is
//! how the graph takes and returns audio.

use anyhow::Context;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// Deinterleaved audio with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    /// One vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl WavData {
    /// Frames per channel.
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Read a WAV file, normalizing integer samples to [-1, 1).
pub fn read_wav(path: &Path) -> anyhow::Result<WavData> {
    let reader = WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let frames = samples.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (lane, &s) in out.iter_mut().zip(frame) {
            lane.push(s);
        }
    }
    Ok(WavData {
        channels: out,
        sample_rate: spec.sample_rate,
    })
}

/// Write channels to a WAV file. 32 bits writes float, 16 or 24 writes PCM.
pub fn write_wav(path: &Path, data: &WavData, bits_per_sample: u16) -> anyhow::Result<()> {
    anyhow::ensure!(
        matches!(bits_per_sample, 16 | 24 | 32),
        "unsupported bit depth {bits_per_sample}, use 16, 24 or 32"
    );
    anyhow::ensure!(!data.channels.is_empty(), "nothing to write: the graph has no audio outputs");

    let spec = WavSpec {
        channels: data.channels.len() as u16,
        sample_rate: data.sample_rate,
        bits_per_sample,
        sample_format: if bits_per_sample == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };
    let mut writer = WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;

    let max_val = (1i64 << (bits_per_sample - 1)) as f32;
    for frame in 0..data.num_frames() {
        for lane in &data.channels {
            let sample = lane[frame];
            if bits_per_sample == 32 {
                writer.write_sample(sample)?;
            } else {
                let int_sample = (sample * max_val).clamp(-max_val, max_val - 1.0) as i32;
                writer.write_sample(int_sample)?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}
