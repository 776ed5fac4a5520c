//! `FFTPlan` (spec.md §4.4).
//!
//! Grounded on `examples/original_source/scopehal/FFTFilter.cpp`'s use of a
//! vendored FFT library (vkFFT there; `rustfft` here, the closest match in
//! the retrieval pack's dependency set) and on this crate's own
//! [`crate::pipeline_cache::PipelineCache`] for the "stored in the raw
//! pipeline cache to avoid rebuilding on restart" requirement.
//!
//! `rustfft` builds its internal plan (twiddle factor tables) from scratch
//! on every `FftPlanner::plan_fft` call and has no public blob-serialization
//! format, unlike the GPU FFT libraries the original wraps. The raw cache
//! entry therefore stores only the plan's key parameters as a sanity-check
//! marker rather than opaque planner state; construction cost for the
//! power-of-two sizes this crate uses is low enough that "serialize, then
//! skip replanning" degrades gracefully to "key matches, replan anyway"
//! (documented as an Open Question resolution in DESIGN.md).

use std::sync::Arc;

use ash::vk;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::buffer::DualResidentBuffer;
use crate::context::Context;
use scope_compute_core::FatalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeDomainDtype {
    Real,
    Complex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PlanKey {
    direction: Direction,
    dtype: TimeDomainDtype,
    n: usize,
    num_batches: usize,
}

impl PlanKey {
    fn cache_key(&self) -> String {
        format!(
            "fft-{:?}-{:?}-{}-{}",
            self.direction, self.dtype, self.n, self.num_batches
        )
    }
}

/// A 1-D FFT plan wrapping `rustfft`, keyed by `(direction, R2C|C2C, N,
/// numBatches)` (spec.md §4.4).
pub struct FFTPlan {
    ctx: Arc<Context>,
    key: PlanKey,
    num_outs: usize,
    fft: Arc<dyn Fft<f32>>,
}

impl FFTPlan {
    pub fn new(ctx: Arc<Context>, n: usize, direction: Direction, num_batches: usize, dtype: TimeDomainDtype) -> Self {
        let key = PlanKey { direction, dtype, n, num_batches };
        let num_outs = n / 2 + 1;
        let mut cache = ctx.pipeline_cache().lock();
        if cache.get_raw(&key.cache_key()).is_none() {
            cache.put_raw(&key.cache_key(), n.to_le_bytes().to_vec());
        }
        drop(cache);

        let mut planner = FftPlanner::<f32>::new();
        let fft: Arc<dyn Fft<f32>> = match direction {
            Direction::Forward => planner.plan_fft_forward(n),
            Direction::Reverse => planner.plan_fft_inverse(n),
        };
        Self { ctx, key, num_outs, fft }
    }

    pub fn len(&self) -> usize {
        self.key.n
    }

    pub fn num_outs(&self) -> usize {
        self.num_outs
    }

    /// `AppendForward(dataIn, dataOut, cmd)` (spec.md §4.4): real-input ->
    /// interleaved complex output, or complex -> complex. `cmd` is accepted
    /// for API symmetry with the GPU compute pipelines this plan is used
    /// alongside, but the transform itself runs on the host once both
    /// buffers are synced, since no GPU FFT kernel exists in this crate's
    /// dependency stack.
    pub fn append_forward(
        &self,
        data_in: &mut DualResidentBuffer<f32>,
        data_out: &mut DualResidentBuffer<Complex32>,
        _cmd: vk::CommandBuffer,
    ) -> Result<(), FatalError> {
        assert_eq!(self.key.direction, Direction::Forward, "plan was built for the opposite direction");
        data_in.prepare_for_host_access()?;
        data_out.resize(self.num_outs * self.key.num_batches)?;

        for batch in 0..self.key.num_batches {
            let in_slice = &data_in.as_slice()[batch * self.key.n..(batch + 1) * self.key.n];
            let mut scratch: Vec<Complex32> = match self.key.dtype {
                TimeDomainDtype::Real => in_slice.iter().map(|&x| Complex32::new(x, 0.0)).collect(),
                TimeDomainDtype::Complex => {
                    // Caller packed complex samples as interleaved re/im pairs.
                    in_slice
                        .chunks_exact(2)
                        .map(|c| Complex32::new(c[0], c[1]))
                        .collect()
                }
            };
            self.fft.process(&mut scratch);
            let out = data_out.as_mut_slice();
            out[batch * self.num_outs..(batch + 1) * self.num_outs].copy_from_slice(&scratch[..self.num_outs]);
        }
        data_out.mark_modified_from_host();
        Ok(())
    }

    /// `AppendReverse(dataIn, dataOut, cmd)` (spec.md §4.4): inverse
    /// transform, writing back into `data_in` for the R2C-inverse case to
    /// match the vendored library's in-place convention.
    pub fn append_reverse(
        &self,
        data_in: &mut DualResidentBuffer<Complex32>,
        data_out: &mut DualResidentBuffer<f32>,
        _cmd: vk::CommandBuffer,
    ) -> Result<(), FatalError> {
        assert_eq!(self.key.direction, Direction::Reverse, "plan was built for the opposite direction");
        data_in.prepare_for_host_access()?;
        data_out.resize(self.key.n * self.key.num_batches)?;

        for batch in 0..self.key.num_batches {
            let in_slice = &data_in.as_slice()[batch * self.num_outs..(batch + 1) * self.num_outs];
            // Reconstruct the conjugate-symmetric second half for the
            // real-valued inverse transform.
            let mut scratch = vec![Complex32::new(0.0, 0.0); self.key.n];
            scratch[..self.num_outs].copy_from_slice(in_slice);
            for i in self.num_outs..self.key.n {
                scratch[i] = scratch[self.key.n - i].conj();
            }
            self.fft.process(&mut scratch);
            let scale = 1.0 / self.key.n as f32;
            let out = data_out.as_mut_slice();
            for (dst, src) in out[batch * self.key.n..(batch + 1) * self.key.n].iter_mut().zip(scratch.iter()) {
                *dst = src.re * scale;
            }
        }
        data_out.mark_modified_from_host();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_key_formats_are_stable_across_batch_counts() {
        let k1 = PlanKey { direction: Direction::Forward, dtype: TimeDomainDtype::Real, n: 1024, num_batches: 1 };
        let k2 = PlanKey { direction: Direction::Forward, dtype: TimeDomainDtype::Real, n: 1024, num_batches: 4 };
        assert_ne!(k1.cache_key(), k2.cache_key());
    }
}
