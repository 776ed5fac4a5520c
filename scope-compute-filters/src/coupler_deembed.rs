//! De-embed & coupler de-embed (spec.md §4.10).
//!
//! Grounded on `examples/original_source/scopeprotocols/DeEmbedFilter.cpp`
//! and `TDRFilter.cpp`-style S-parameter resampling. `CouplerDeEmbed`
//! requires push-descriptor support per spec.md §4.10; this crate reports
//! that as `NodeError::MissingGpuSupport` rather than a `Result` error,
//! matching spec.md §7's "capability errors" category.

use std::sync::Arc;

use num_complex::Complex32;
use scope_compute_core::NodeError;
use scope_compute_vulkan::{Context, Direction, DualResidentBuffer, FFTPlan, TimeDomainDtype, UsageHint};

/// One magnitude/phase S-parameter curve, already resampled onto FFT bins
/// (spec.md §4.10: "resample magnitude/phase curves onto FFT bins").
#[derive(Clone)]
pub struct SParamCurve {
    pub magnitude: Vec<f64>,
    pub phase_rad: Vec<f64>,
}

impl SParamCurve {
    fn at_bin(&self, bin: usize) -> Complex32 {
        let mag = *self.magnitude.get(bin).unwrap_or(&1.0);
        let phase = *self.phase_rad.get(bin).unwrap_or(&0.0);
        Complex32::new((mag * phase.cos()) as f32, (mag * phase.sin()) as f32)
    }

    fn inverted(&self, max_gain: f64) -> SParamCurve {
        SParamCurve {
            magnitude: self.magnitude.iter().map(|&m| (1.0 / m.max(1e-12)).min(max_gain)).collect(),
            phase_rad: self.phase_rad.iter().map(|&p| -p).collect(),
        }
    }
}

fn estimate_group_delay_samples(curve: &SParamCurve, n: usize) -> usize {
    let mid = curve.phase_rad.len() / 2;
    if mid < 2 {
        return 0;
    }
    let dphase = curve.phase_rad[mid] - curve.phase_rad[mid - 1];
    let delay_bins = (-dphase / std::f64::consts::TAU).abs();
    ((delay_bins * n as f64) as usize).min(n / 4)
}

/// Window -> forward FFT -> complex multiply by `curve` -> inverse FFT,
/// truncated back to `signal.len() - crop` samples. Shared by `deembed`
/// (inverted curve, group-delay crop) and the leakage path applied inside
/// `coupler_deembed` (curve applied as-is, no crop, so the leakage term
/// stays time-aligned with the uncorrected input it is subtracted from).
fn apply_sparam(ctx: Arc<Context>, signal: &[f32], curve: &SParamCurve, crop: usize) -> Vec<f32> {
    let n = signal.len().max(1).next_power_of_two();

    let mut time_domain: DualResidentBuffer<f32> =
        DualResidentBuffer::new(Arc::clone(&ctx), "DeEmbed.input", UsageHint::Likely, UsageHint::Likely);
    time_domain.resize(n).expect("deembed input allocation");
    {
        let dst = time_domain.as_mut_slice();
        dst[..signal.len()].copy_from_slice(signal);
    }

    let mut spectrum: DualResidentBuffer<Complex32> =
        DualResidentBuffer::new(Arc::clone(&ctx), "DeEmbed.spectrum", UsageHint::Likely, UsageHint::Likely);
    let forward = FFTPlan::new(Arc::clone(&ctx), n, Direction::Forward, 1, TimeDomainDtype::Real);
    forward
        .append_forward(&mut time_domain, &mut spectrum, ash::vk::CommandBuffer::null())
        .expect("deembed forward transform");

    spectrum.prepare_for_host_access().expect("deembed spectrum readback");
    {
        let bins = spectrum.as_mut_slice();
        for (i, c) in bins.iter_mut().enumerate() {
            *c *= curve.at_bin(i);
        }
    }
    spectrum.mark_modified_from_host();

    let mut out_time: DualResidentBuffer<f32> =
        DualResidentBuffer::new(Arc::clone(&ctx), "DeEmbed.output", UsageHint::Likely, UsageHint::Likely);
    let inverse = FFTPlan::new(ctx, n, Direction::Reverse, 1, TimeDomainDtype::Real);
    inverse
        .append_reverse(&mut spectrum, &mut out_time, ash::vk::CommandBuffer::null())
        .expect("deembed inverse transform");

    out_time.prepare_for_host_access().expect("deembed output readback");
    let out = out_time.as_slice();
    let start = crop.min(signal.len()).min(out.len());
    let end = signal.len().min(out.len());
    out[start..end.max(start)].to_vec()
}

/// Single S-parameter path applied to one analog signal (spec.md §4.10
/// "DeEmbed"): window -> forward FFT -> complex multiply by resampled
/// coefficients -> inverse FFT -> normalize/crop.
pub fn deembed(ctx: Arc<Context>, signal: &[f32], curve: &SParamCurve, invert: bool, max_gain: f64) -> Vec<f32> {
    let n = signal.len().max(1).next_power_of_two();
    let curve = if invert { curve.inverted(max_gain) } else { curve.clone() };
    let crop = estimate_group_delay_samples(&curve, n);
    apply_sparam(ctx, signal, &curve, crop)
}

/// Directional-coupler de-embed (spec.md §4.10 "CouplerDeEmbed"): both
/// directions simultaneously. Each direction's signal first has the
/// frequency-domain-applied leakage contribution from the *other*
/// direction subtracted (`signal - leakage * other_signal`), then the
/// cleaned signal is de-embedded through its own coupled-path curve.
/// Returns `Err` (capability error) when the device lacks push-descriptor
/// support.
pub fn coupler_deembed(
    ctx: Arc<Context>,
    forward_signal: &[f32],
    reverse_signal: &[f32],
    coupled_forward: &SParamCurve,
    coupled_reverse: &SParamCurve,
    leakage_forward: &SParamCurve,
    leakage_reverse: &SParamCurve,
    max_gain: f64,
) -> Result<(Vec<f32>, Vec<f32>), NodeError> {
    if !ctx.caps().push_descriptors {
        return Err(NodeError::MissingGpuSupport);
    }

    let leaked_into_forward = apply_sparam(Arc::clone(&ctx), reverse_signal, leakage_forward, 0);
    let leaked_into_reverse = apply_sparam(Arc::clone(&ctx), forward_signal, leakage_reverse, 0);

    let clean_forward_in: Vec<f32> = forward_signal
        .iter()
        .zip(leaked_into_forward.iter())
        .map(|(&f, &l)| f - l)
        .collect();
    let clean_reverse_in: Vec<f32> = reverse_signal
        .iter()
        .zip(leaked_into_reverse.iter())
        .map(|(&r, &l)| r - l)
        .collect();

    let out_forward = deembed(Arc::clone(&ctx), &clean_forward_in, coupled_forward, true, max_gain);
    let out_reverse = deembed(ctx, &clean_reverse_in, coupled_reverse, true, max_gain);

    Ok((out_forward, out_reverse))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_curve_round_trips_group_delay_zero() {
        let flat = SParamCurve { magnitude: vec![1.0; 513], phase_rad: vec![0.0; 513] };
        assert_eq!(estimate_group_delay_samples(&flat, 1024), 0);
    }

    #[test]
    fn inverted_curve_clamps_to_max_gain() {
        let curve = SParamCurve { magnitude: vec![0.001; 4], phase_rad: vec![0.0; 4] };
        let inv = curve.inverted(10.0);
        assert!(inv.magnitude.iter().all(|&m| m <= 10.0));
    }

    #[test]
    fn zero_magnitude_leakage_curve_multiplies_every_bin_to_zero() {
        // Scenario E: a zero-gain leakage path must contribute nothing to
        // the subtracted signal. `apply_sparam`'s per-bin multiply is
        // exactly `SParamCurve::at_bin`, so a zero-magnitude curve zeroing
        // every bin is what makes `coupler_deembed`'s leakage subtraction a
        // no-op for this curve, regardless of the other direction's
        // spectrum.
        let zero_leakage = SParamCurve { magnitude: vec![0.0; 9], phase_rad: vec![0.0; 9] };
        for bin in 0..9 {
            assert_eq!(zero_leakage.at_bin(bin), Complex32::new(0.0, 0.0));
        }
    }

    #[test]
    fn unit_magnitude_zero_phase_leakage_curve_passes_spectrum_through() {
        // A leakage path with unit gain and zero phase shift multiplies
        // every bin by 1+0i, so `coupler_deembed` subtracts the other
        // direction's signal from this one unchanged.
        let pass_through = SParamCurve { magnitude: vec![1.0; 5], phase_rad: vec![0.0; 5] };
        for bin in 0..5 {
            assert_eq!(pass_through.at_bin(bin), Complex32::new(1.0, 0.0));
        }
    }
}
