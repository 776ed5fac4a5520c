//! `LevelCrossingDetector` (spec.md §4.5).
//!
//! Grounded on `examples/original_source/scopehal/LevelCrossingDetector.cpp`'s
//! three-kernel scan/prefix-scan/compact pipeline, expressed here over
//! [`crate::pipeline::ComputePipeline`] the way every other GPU kernel in
//! this crate is: SPIR-V is an opaque `&[u32]` supplied by the caller (shader
//! compilation and the embedded-binary asset pipeline are out of scope per
//! spec.md §1), so this module owns dispatch order and buffer wiring, not
//! the shaders themselves.

use std::sync::Arc;

use ash::vk;

use crate::buffer::DualResidentBuffer;
use crate::context::Context;
use crate::pipeline::{ComputePipeline, PipelineLayoutDesc};
use scope_compute_core::FatalError;

const GPU_THREAD_COUNT: u32 = 8192;

/// SPIR-V for the three fast-path kernels (spec.md §4.5): per-thread scan,
/// prefix-scan of per-thread counts, and final compaction.
pub struct LevelCrossingShaders<'a> {
    pub scan: &'a [u32],
    pub prefix_scan: &'a [u32],
    pub compact: &'a [u32],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ScanPushConstants {
    threshold: f32,
    timescale_fs: i64,
    trigger_phase_fs: i64,
    num_samples: u32,
    num_threads: u32,
}

pub struct LevelCrossingDetector {
    ctx: Arc<Context>,
    scan_pipeline: ComputePipeline,
    prefix_scan_pipeline: ComputePipeline,
    compact_pipeline: ComputePipeline,
}

impl LevelCrossingDetector {
    pub fn new(ctx: Arc<Context>) -> Self {
        let scan_desc = PipelineLayoutDesc {
            spirv_path: "level_crossing_scan.comp.spv".into(),
            num_storage_buffers: 3,
            num_storage_images: 0,
            num_sampled_images: 0,
            push_constant_bytes: std::mem::size_of::<ScanPushConstants>() as u32,
        };
        let prefix_desc = PipelineLayoutDesc {
            spirv_path: "level_crossing_prefix_scan.comp.spv".into(),
            num_storage_buffers: 1,
            num_storage_images: 0,
            num_sampled_images: 0,
            push_constant_bytes: 4,
        };
        let compact_desc = PipelineLayoutDesc {
            spirv_path: "level_crossing_compact.comp.spv".into(),
            num_storage_buffers: 3,
            num_storage_images: 0,
            num_sampled_images: 0,
            push_constant_bytes: 4,
        };
        Self {
            scan_pipeline: ComputePipeline::new(Arc::clone(&ctx), scan_desc),
            prefix_scan_pipeline: ComputePipeline::new(Arc::clone(&ctx), prefix_desc),
            compact_pipeline: ComputePipeline::new(Arc::clone(&ctx), compact_desc),
            ctx,
        }
    }

    /// `sign(w[i] - threshold) != sign(w[i+1] - threshold)` (spec.md §4.5).
    fn crosses(a: f32, b: f32, threshold: f32) -> bool {
        (a - threshold).is_sign_negative() != (b - threshold).is_sign_negative()
    }

    fn fractional_crossing_time(w: &[f32], i: usize, threshold: f32, timescale_fs: i64, trigger_phase_fs: i64) -> i64 {
        let frac = (threshold - w[i]) / (w[i + 1] - w[i]);
        trigger_phase_fs + (timescale_fs as f64 * (i as f64 + frac as f64)).round() as i64
    }

    /// Single-threaded host scan (spec.md §4.5 fallback, also used whenever
    /// `w.len() < 2`).
    pub fn scan_cpu(w: &[f32], threshold: f32, timescale_fs: i64, trigger_phase_fs: i64) -> Vec<i64> {
        if w.len() < 2 {
            return Vec::new();
        }
        let mut out = Vec::new();
        for i in 0..w.len() - 1 {
            if Self::crosses(w[i], w[i + 1], threshold) {
                out.push(Self::fractional_crossing_time(w, i, threshold, timescale_fs, trigger_phase_fs));
            }
        }
        out
    }

    /// `Detect` (spec.md §4.5): dispatches the three-kernel GPU pipeline
    /// when the device supports 64-bit integer shaders, falling back to the
    /// host scan otherwise.
    pub fn detect(
        &mut self,
        shaders: &LevelCrossingShaders<'_>,
        input: &mut DualResidentBuffer<f32>,
        threshold: f32,
        timescale_fs: i64,
        trigger_phase_fs: i64,
        cmd: vk::CommandBuffer,
    ) -> Result<DualResidentBuffer<i64>, FatalError> {
        let mut output = DualResidentBuffer::new(
            Arc::clone(&self.ctx),
            "LevelCrossingDetector.output",
            crate::buffer::UsageHint::Unlikely,
            crate::buffer::UsageHint::Likely,
        );

        if input.len() < 2 {
            return Ok(output);
        }

        if !self.ctx.caps().int64_shaders {
            input.prepare_for_host_access()?;
            let crossings = Self::scan_cpu(input.as_slice(), threshold, timescale_fs, trigger_phase_fs);
            output.resize(crossings.len())?;
            output.as_mut_slice().copy_from_slice(&crossings);
            output.mark_modified_from_host();
            return Ok(output);
        }

        // GPU fast path: candidate scratch sized generously (one slot per
        // sample, since every sample can at most produce one crossing)
        // plus a per-thread count buffer consumed by the prefix-scan pass.
        let mut candidates = DualResidentBuffer::new(
            Arc::clone(&self.ctx),
            "LevelCrossingDetector.candidates",
            crate::buffer::UsageHint::Never,
            crate::buffer::UsageHint::Likely,
        );
        candidates.resize(input.len())?;
        let mut counts = DualResidentBuffer::new(
            Arc::clone(&self.ctx),
            "LevelCrossingDetector.counts",
            crate::buffer::UsageHint::Never,
            crate::buffer::UsageHint::Likely,
        );
        counts.resize(GPU_THREAD_COUNT as usize)?;

        let push = ScanPushConstants {
            threshold,
            timescale_fs,
            trigger_phase_fs,
            num_samples: input.len() as u32,
            num_threads: GPU_THREAD_COUNT,
        };
        self.scan_pipeline
            .bind_buffer(shaders.scan, 0, input, cmd, false)?;
        self.scan_pipeline
            .bind_buffer(shaders.scan, 1, &mut candidates, cmd, true)?;
        self.scan_pipeline
            .bind_buffer(shaders.scan, 2, &mut counts, cmd, true)?;
        self.scan_pipeline
            .dispatch(shaders.scan, cmd, bytemuck::bytes_of(&push), GPU_THREAD_COUNT / 256, 1, 1)?;
        self.scan_pipeline.add_compute_memory_barrier(cmd);

        self.prefix_scan_pipeline.bind_buffer(shaders.prefix_scan, 0, &mut counts, cmd, false)?;
        self.prefix_scan_pipeline
            .dispatch(shaders.prefix_scan, cmd, &[], 1, 1, 1)?;
        self.prefix_scan_pipeline.add_compute_memory_barrier(cmd);

        // Total count lives in the last slot of the (now prefix-summed)
        // counts buffer after the scan kernel's per-thread tail write.
        counts.prepare_for_host_access()?;
        let total = *counts.as_slice().last().unwrap_or(&0) as usize;
        output.resize(total)?;

        self.compact_pipeline.bind_buffer(shaders.compact, 0, &mut candidates, cmd, false)?;
        self.compact_pipeline.bind_buffer(shaders.compact, 1, &mut counts, cmd, false)?;
        self.compact_pipeline.bind_buffer(shaders.compact, 2, &mut output, cmd, true)?;
        self.compact_pipeline
            .dispatch(shaders.compact, cmd, &[], GPU_THREAD_COUNT / 256, 1, 1)?;

        output.mark_modified_from_device();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_single_rising_crossing() {
        let w = [-1.0f32, 1.0];
        let crossings = LevelCrossingDetector::scan_cpu(&w, 0.0, 1000, 0);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0], 500);
    }

    #[test]
    fn empty_for_fewer_than_two_samples() {
        assert!(LevelCrossingDetector::scan_cpu(&[], 0.0, 1000, 0).is_empty());
        assert!(LevelCrossingDetector::scan_cpu(&[1.0], 0.0, 1000, 0).is_empty());
    }

    #[test]
    fn ignores_samples_that_never_cross() {
        let w = [1.0f32, 2.0, 3.0, 4.0];
        assert!(LevelCrossingDetector::scan_cpu(&w, 0.0, 1000, 0).is_empty());
    }

    #[test]
    fn finds_multiple_crossings_in_order() {
        let w = [-1.0f32, 1.0, -1.0, 1.0];
        let crossings = LevelCrossingDetector::scan_cpu(&w, 0.0, 1000, 0);
        assert_eq!(crossings.len(), 3);
        assert!(crossings.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
