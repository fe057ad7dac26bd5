//! Offline rendering of a session to a WAV file.

use crate::commands::common::load_session;
use crate::wav::{WavData, read_wav, write_wav};
use anyhow::Context;
use clap::Args;
use patchbay_core::{AudioBuffer, MidiBuffer};
use std::path::PathBuf;

/// Render a session offline.
#[derive(Args)]
pub struct RenderArgs {
    /// Session file (TOML)
    pub session: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Input WAV file fed to the graph's audio inputs
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Seconds to render when there is no input file
    #[arg(short, long, default_value = "2.0")]
    pub duration: f32,

    /// Extra seconds rendered after the input ends
    #[arg(long, default_value = "0.0")]
    pub tail: f32,

    /// Output bit depth (16, 24 or 32 for float)
    #[arg(long, default_value = "32")]
    pub bits: u16,
}

/// Run the render command.
pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let (session, mut manager, _report) = load_session(&args.session)?;
    let engine = session.engine;
    let block_size = engine.block_size;
    let ins = engine.audio_inputs as usize;
    let outs = engine.audio_outputs as usize;

    let input = match &args.input {
        Some(path) => {
            let data = read_wav(path).with_context(|| format!("reading input {}", path.display()))?;
            if data.sample_rate != engine.sample_rate {
                tracing::warn!(
                    file = data.sample_rate,
                    engine = engine.sample_rate,
                    "input sample rate differs from the engine; no resampling is done"
                );
            }
            Some(data)
        }
        None => None,
    };

    let rate = engine.sample_rate_hz();
    let body = match &input {
        Some(data) => data.num_frames(),
        None => seconds_to_frames(args.duration, rate),
    };
    let frames = body + seconds_to_frames(args.tail, rate);

    manager.prepare_to_render(rate, block_size);
    let renderer = manager.renderer();
    tracing::info!(
        frames,
        block_size,
        latency = renderer.latency_samples(),
        "rendering"
    );

    let mut audio = AudioBuffer::new(ins.max(outs), block_size);
    let mut midi = MidiBuffer::new();
    let mut output = WavData {
        channels: vec![Vec::with_capacity(frames); outs],
        sample_rate: engine.sample_rate,
    };

    let mut pos = 0;
    while pos < frames {
        let n = block_size.min(frames - pos);
        audio.set_num_samples(n);
        for ch in 0..ins {
            fill_input(audio.channel_mut(ch), input.as_ref(), ch, pos);
        }
        midi.clear();

        renderer.render(&mut audio, &mut midi);

        for (ch, lane) in output.channels.iter_mut().enumerate() {
            lane.extend_from_slice(audio.channel(ch));
        }
        manager.process_pending();
        pos += n;
    }

    write_wav(&args.output, &output, args.bits)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "Rendered {} frames ({:.3}s, {} channels) to {}",
        frames,
        frames as f64 / rate,
        outs,
        args.output.display()
    );
    Ok(())
}

fn seconds_to_frames(seconds: f32, rate: f64) -> usize {
    (f64::from(seconds.max(0.0)) * rate).round() as usize
}

/// Copies input channel `ch` (wrapping onto the file's channels) at frame
/// `pos`, zero-padding past the end of the file.
fn fill_input(dst: &mut [f32], input: Option<&WavData>, ch: usize, pos: usize) {
    dst.fill(0.0);
    let Some(data) = input else {
        return;
    };
    if data.channels.is_empty() {
        return;
    }
    let src = &data.channels[ch % data.channels.len()];
    if pos < src.len() {
        let n = dst.len().min(src.len() - pos);
        dst[..n].copy_from_slice(&src[pos..pos + n]);
    }
}
