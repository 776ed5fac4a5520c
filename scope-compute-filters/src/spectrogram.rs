//! Spectrogram & waterfall (spec.md §4.9).
//!
//! Grounded on `examples/original_source/scopeprotocols/SpectrogramFilter.cpp`
//! and `WaterfallFilter.cpp`: blocked batched FFT for the spectrogram, and a
//! fixed-column resample + row-shift for the waterfall.

use std::sync::Arc;

use scope_compute_vulkan::{Context, Direction, DualResidentBuffer, FFTPlan, TimeDomainDtype, UsageHint};

/// Partitions `input` into `floor(N/L)` non-overlapping blocks of length
/// `L`, windows and forward-FFTs each (batched), then converts to dB and
/// normalizes into `[0,1]` against `(range_min, range_max)` dBm (spec.md
/// §4.9 "Spectrogram").
pub struct SpectrogramOutput {
    pub width: usize,
    pub height: usize,
    pub bin_size_hz: f64,
    pub pixels: Vec<f32>,
}

pub fn compute(
    ctx: Arc<Context>,
    input: &[f32],
    sample_rate_hz: f64,
    block_len: usize,
    range_min_dbm: f64,
    range_max_dbm: f64,
) -> SpectrogramOutput {
    assert!(block_len.is_power_of_two(), "block length must be a power of two");
    let num_blocks = input.len() / block_len;
    let height = block_len / 2 + 1;
    let mut pixels = vec![0.0f32; num_blocks * height];

    if num_blocks == 0 {
        return SpectrogramOutput { width: 0, height, bin_size_hz: (sample_rate_hz / block_len as f64).round(), pixels };
    }

    let mut windowed: DualResidentBuffer<f32> =
        DualResidentBuffer::new(Arc::clone(&ctx), "Spectrogram.input", UsageHint::Likely, UsageHint::Likely);
    windowed.resize(block_len * num_blocks).expect("spectrogram input allocation");
    {
        let dst = windowed.as_mut_slice();
        for b in 0..num_blocks {
            for i in 0..block_len {
                // Hann window, matching the default used when a spectrogram
                // filter does not expose a separate window parameter.
                let w = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (block_len - 1) as f64).cos();
                dst[b * block_len + i] = input[b * block_len + i] * w as f32;
            }
        }
    }

    let mut spectrum: DualResidentBuffer<num_complex::Complex32> =
        DualResidentBuffer::new(Arc::clone(&ctx), "Spectrogram.spectrum", UsageHint::Likely, UsageHint::Likely);
    let plan = FFTPlan::new(Arc::clone(&ctx), block_len, Direction::Forward, num_blocks, TimeDomainDtype::Real);
    plan.append_forward(&mut windowed, &mut spectrum, ash::vk::CommandBuffer::null())
        .expect("spectrogram forward transform");

    spectrum.prepare_for_host_access().expect("spectrogram readback");
    let range = (range_max_dbm - range_min_dbm).max(1e-9);
    for (i, c) in spectrum.as_slice().iter().enumerate() {
        let mag_sq = (c.re as f64).powi(2) + (c.im as f64).powi(2);
        let dbm = 10.0 * mag_sq.max(1e-300).log10();
        pixels[i] = (((dbm - range_min_dbm) / range).clamp(0.0, 1.0)) as f32;
    }

    SpectrogramOutput {
        width: num_blocks,
        height,
        bin_size_hz: (sample_rate_hz / block_len as f64).round(),
        pixels,
    }
}

/// Resamples `new_row` onto `width` columns, shifts `history` down by one
/// row and writes the resampled row at the top (spec.md §4.9 "Waterfall":
/// "shift the existing rows down by one, and write the new row at the
/// top"). `history` is `width * height`, row-major, row 0 = newest.
pub fn waterfall_step(history: &mut [f32], width: usize, height: usize, new_row: &[f32]) {
    if height == 0 {
        return;
    }
    history.copy_within(0..width * (height - 1), width);
    let resampled = resample_row(new_row, width);
    history[..width].copy_from_slice(&resampled);
}

fn resample_row(row: &[f32], width: usize) -> Vec<f32> {
    if row.is_empty() || width == 0 {
        return vec![0.0; width];
    }
    (0..width)
        .map(|x| {
            let src_pos = x as f64 * (row.len() - 1).max(1) as f64 / (width - 1).max(1) as f64;
            let lo = src_pos.floor() as usize;
            let hi = (lo + 1).min(row.len() - 1);
            let frac = src_pos - lo as f64;
            (row[lo] as f64 * (1.0 - frac) + row[hi] as f64 * frac) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_row_preserves_endpoints() {
        let row = vec![0.0f32, 1.0, 2.0, 3.0];
        let out = resample_row(&row, 8);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[7] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn waterfall_step_shifts_history_and_inserts_new_row_at_top() {
        let width = 2;
        let height = 3;
        let mut history = vec![
            9.0, 9.0, // row 0 (newest, about to be shifted down)
            1.0, 1.0, // row 1
            0.0, 0.0, // row 2 (oldest, falls off)
        ];
        waterfall_step(&mut history, width, height, &[5.0, 5.0]);
        assert_eq!(&history[0..2], &[5.0, 5.0]);
        assert_eq!(&history[2..4], &[9.0, 9.0]);
    }
}
