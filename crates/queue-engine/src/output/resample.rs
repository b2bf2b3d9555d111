//! Sample-rate conversion between the decode queue and the output queue.
//!
//! Runs Rubato's async sinc resampler on a background thread. The output queue is closed
//! once the input queue has closed and its tail has been flushed through.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::queue::{Pop, SampleQueue, capacity_for};

const SINC_LEN: usize = 128;
const OVERSAMPLING: usize = 256;
const MAX_RATIO_RELATIVE: f64 = 1.1;

/// Rate pair and sizing for one resampler stage.
#[derive(Clone, Copy, Debug)]
pub struct ResampleSpec {
    pub src_rate: u32,
    pub dst_rate: u32,
    pub channels: usize,
    pub chunk_frames: usize,
    pub buffer_seconds: f32,
}

/// Spawn the resampler. Returns the output queue and the thread handle.
pub fn spawn_resampler(
    input: Arc<SampleQueue>,
    spec: ResampleSpec,
) -> Result<(Arc<SampleQueue>, JoinHandle<()>)> {
    if spec.src_rate == 0 || spec.dst_rate == 0 {
        return Err(anyhow!(
            "invalid resample rates {} -> {}",
            spec.src_rate,
            spec.dst_rate
        ));
    }
    let channels = spec.channels.max(1);
    let chunk_frames = spec.chunk_frames.max(1);

    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: calculate_cutoff(SINC_LEN, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: OVERSAMPLING,
        window,
    };
    let ratio = spec.dst_rate as f64 / spec.src_rate as f64;

    let output = Arc::new(SampleQueue::new(
        channels,
        capacity_for(spec.dst_rate, channels, spec.buffer_seconds),
    ));
    let output_thread = output.clone();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    let handle = thread::spawn(move || {
        // Built on the worker so the resampler never has to cross threads.
        let resampler = match Async::<f32>::new_sinc(
            ratio,
            MAX_RATIO_RELATIVE,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        ) {
            Ok(resampler) => resampler,
            Err(err) => {
                let _ = ready_tx.send(Err(anyhow!("resampler init: {err}")));
                output_thread.close();
                return;
            }
        };
        let _ = ready_tx.send(Ok(()));

        let mut stage = Stage {
            resampler: Box::new(resampler),
            out: vec![0.0f32; channels * chunk_frames * 3],
            channels,
        };
        if let Err(err) = stage.run(&input, &output_thread, chunk_frames) {
            tracing::error!(error = %format!("{err:#}"), "resampler stopped");
        }
        output_thread.close();
        tracing::debug!("resampler finished");
    });
    ready_rx
        .recv()
        .context("resampler thread exited during init")??;

    tracing::info!(
        from_hz = spec.src_rate,
        to_hz = spec.dst_rate,
        chunk_frames,
        "resampling"
    );
    Ok((output, handle))
}

struct Stage {
    resampler: Box<dyn Resampler<f32>>,
    out: Vec<f32>,
    channels: usize,
}

impl Stage {
    fn run(
        &mut self,
        input: &SampleQueue,
        output: &SampleQueue,
        chunk_frames: usize,
    ) -> Result<()> {
        while let Some(chunk) = input.pop(Pop::Exact { frames: chunk_frames }) {
            if !self.process(&chunk, None, output)? {
                return Ok(());
            }
        }
        // Input closed: flush whatever is left as partial chunks.
        while let Some(tail) = input.pop(Pop::UpTo { max_frames: chunk_frames }) {
            let frames = tail.len() / self.channels;
            if !self.process(&tail, Some(frames), output)? {
                break;
            }
        }
        Ok(())
    }

    /// Resample one chunk into `output`. Returns `false` once `output` is closed.
    fn process(
        &mut self,
        chunk: &[f32],
        partial: Option<usize>,
        output: &SampleQueue,
    ) -> Result<bool> {
        let frames = chunk.len() / self.channels;
        let input_adapter = InterleavedSlice::new(chunk, self.channels, frames)
            .map_err(|e| anyhow!("input adapter: {e}"))?;
        let capacity = self.out.len() / self.channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.out, self.channels, capacity)
            .map_err(|e| anyhow!("output adapter: {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };
        let (_consumed, produced) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .context("resample chunk")?;

        let produced_samples = produced * self.channels;
        if produced_samples == 0 {
            return Ok(true);
        }
        Ok(output.push_blocking(&self.out[..produced_samples]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rates() {
        let input = Arc::new(SampleQueue::new(2, 64));
        let spec = ResampleSpec {
            src_rate: 0,
            dst_rate: 48_000,
            channels: 2,
            chunk_frames: 256,
            buffer_seconds: 0.5,
        };
        assert!(spawn_resampler(input, spec).is_err());
    }

    #[test]
    fn converts_length_by_rate_ratio_and_closes_output() {
        let input = Arc::new(SampleQueue::new(1, 1 << 16));
        let spec = ResampleSpec {
            src_rate: 22_050,
            dst_rate: 44_100,
            channels: 1,
            chunk_frames: 512,
            buffer_seconds: 2.0,
        };
        let (output, handle) = spawn_resampler(input.clone(), spec).unwrap();

        let samples: Vec<f32> = (0..22_050).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        input.push_blocking(&samples);
        input.close();

        let mut produced = 0usize;
        while let Some(chunk) = output.pop(Pop::UpTo { max_frames: 4096 }) {
            produced += chunk.len();
        }
        handle.join().unwrap();

        assert!(output.is_closed());
        let expected = 44_100f64;
        assert!(
            (produced as f64 - expected).abs() < expected * 0.05,
            "produced {produced} frames"
        );
    }
}
