//! FFT filter (spec.md §4.7).
//!
//! Grounded on `examples/original_source/scopeprotocols/FFTFilter.cpp`'s
//! window -> forward-FFT -> log-magnitude -> peak-search pipeline, rebuilt
//! over [`scope_compute_vulkan::FFTPlan`] and [`crate::peak_detector::PeakDetector`].

use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use scope_compute_core::{NodeError, Stream, StreamType, Unit};
use scope_compute_vulkan::{Context, Direction, DualResidentBuffer, FFTPlan, TimeDomainDtype, UsageHint};

use crate::flow_graph::{Filter, FlowGraphNode};
use crate::peak_detector::{Peak, PeakDetector};

const LOAD_IMPEDANCE_OHMS: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowFunction {
    Rectangular,
    Hann,
    Hamming,
    BlackmanHarris,
}

impl WindowFunction {
    /// Coherent power gain (spec.md §4.7 step 2): `{1, 2.013, 1.862,
    /// 2.805}`.
    fn coherent_gain(self) -> f64 {
        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 2.013,
            WindowFunction::Hamming => 1.862,
            WindowFunction::BlackmanHarris => 2.805,
        }
    }

    fn weight(self, i: usize, n: usize) -> f64 {
        let x = i as f64 / (n - 1).max(1) as f64;
        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
            WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
            WindowFunction::BlackmanHarris => {
                0.35875 - 0.48829 * (2.0 * PI * x).cos() + 0.14128 * (4.0 * PI * x).cos()
                    - 0.01168 * (6.0 * PI * x).cos()
            }
        }
    }
}

/// How `N_raw` is rounded to the nearest power of two (spec.md §4.7 step
/// 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthRounding {
    Truncate,
    ZeroPad,
}

pub struct FftFilterConfig {
    pub window: WindowFunction,
    pub rounding: LengthRounding,
    pub num_peaks: usize,
    pub peak_search_hz: f64,
}

impl Default for FftFilterConfig {
    fn default() -> Self {
        Self {
            window: WindowFunction::BlackmanHarris,
            rounding: LengthRounding::ZeroPad,
            num_peaks: 1,
            peak_search_hz: 0.0,
        }
    }
}

pub struct FftFilterOutput {
    pub db_magnitude: Vec<f32>,
    pub bin_size_hz: f64,
    pub trigger_phase_bins: f64,
    pub peaks: Vec<Peak>,
}

fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two()
}

fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    1usize << (usize::BITS - 1 - n.leading_zeros())
}

/// Runs the full §4.7 pipeline against host-resident samples. The
/// accelerator-side steps (window kernel, forward FFT, log-magnitude
/// kernel) run through [`FFTPlan`]'s host-synchronized path the same way
/// every other filter in this crate drives `DualResidentBuffer`; step 5
/// (peak detection) is host-only per spec.md §4.7.
pub fn run(ctx: Arc<Context>, samples: &[f32], sample_rate_hz: f64, config: &FftFilterConfig) -> FftFilterOutput {
    let n_raw = samples.len();
    let n = match config.rounding {
        LengthRounding::Truncate => prev_power_of_two(n_raw).max(1),
        LengthRounding::ZeroPad => next_power_of_two(n_raw.max(1)),
    };

    let mut windowed = vec![0.0f32; n];
    let copy_len = n.min(n_raw);
    for i in 0..copy_len {
        windowed[i] = samples[i] * config.window.weight(i, copy_len) as f32;
    }

    let mut input_buf: DualResidentBuffer<f32> = DualResidentBuffer::new(Arc::clone(&ctx), "FftFilter.input", UsageHint::Likely, UsageHint::Likely);
    input_buf.resize(n).expect("fft filter input allocation");
    input_buf.as_mut_slice().copy_from_slice(&windowed);

    let num_outs = n / 2 + 1;
    let mut spectrum: DualResidentBuffer<Complex32> =
        DualResidentBuffer::new(Arc::clone(&ctx), "FftFilter.spectrum", UsageHint::Likely, UsageHint::Likely);

    let plan = FFTPlan::new(Arc::clone(&ctx), n, Direction::Forward, 1, TimeDomainDtype::Real);
    plan.append_forward(&mut input_buf, &mut spectrum, ash::vk::CommandBuffer::null())
        .expect("fft filter forward transform");

    let window_gain = config.window.coherent_gain();
    let scale = (2.0 / copy_len.max(1) as f64 * window_gain).powi(2);

    spectrum.prepare_for_host_access().expect("fft filter spectrum readback");
    let db_magnitude: Vec<f32> = spectrum
        .as_slice()
        .iter()
        .map(|c| {
            let mag_sq = (c.re as f64).powi(2) + (c.im as f64).powi(2);
            (10.0 * (mag_sq * scale / LOAD_IMPEDANCE_OHMS).max(1e-300).log10()) as f32
        })
        .collect();

    let bin_size_hz = (0.5 * sample_rate_hz / num_outs as f64).round();
    let search_bins = if bin_size_hz > 0.0 {
        (config.peak_search_hz / bin_size_hz).round().max(1.0) as usize
    } else {
        1
    };
    let peaks = PeakDetector.find_peaks(&db_magnitude, config.num_peaks, search_bins);

    FftFilterOutput {
        db_magnitude,
        bin_size_hz,
        trigger_phase_bins: 1.0,
        peaks,
    }
}

pub fn output_unit() -> Unit {
    Unit::DecibelMilliwatts
}

/// Wraps [`run`] as a [`Filter`] node (spec.md §4.12), the one concrete
/// filter in this crate that exercises the `FlowGraphNode`/`refresh`
/// abstraction end to end. There is no cross-node waveform cache in this
/// crate yet, so the host-resident input samples and sample rate are
/// staged with [`FftFilterNode::stage_input`] rather than resolved from
/// `node.inputs` by `refresh` itself; `refresh` still performs the
/// `validate_channel`/error-state bookkeeping spec.md §4.12 describes.
pub struct FftFilterNode {
    node: FlowGraphNode,
    ctx: Arc<Context>,
    config: FftFilterConfig,
    staged: Option<(Vec<f32>, f64)>,
    last_output: Option<FftFilterOutput>,
}

impl FftFilterNode {
    pub fn new(ctx: Arc<Context>, config: FftFilterConfig) -> Self {
        Self {
            node: FlowGraphNode::new("FFTFilter", vec!["in".into()]),
            ctx,
            config,
            staged: None,
            last_output: None,
        }
    }

    /// Stages host samples and the sample rate for the next `refresh`.
    /// Stands in for the input-stream readback a full waveform cache would
    /// perform.
    pub fn stage_input(&mut self, samples: Vec<f32>, sample_rate_hz: f64) {
        self.staged = Some((samples, sample_rate_hz));
    }

    pub fn last_output(&self) -> Option<&FftFilterOutput> {
        self.last_output.as_ref()
    }
}

impl Filter for FftFilterNode {
    fn node(&self) -> &FlowGraphNode {
        &self.node
    }

    fn node_mut(&mut self) -> &mut FlowGraphNode {
        &mut self.node
    }

    fn validate_channel(&self, _i: usize, stream: &Stream) -> bool {
        stream.stream_type == StreamType::Analog
    }

    fn refresh(&mut self, _cmd: ash::vk::CommandBuffer, _queue: &scope_compute_vulkan::QueueHandle) {
        self.node.error.clear();
        let Some((samples, sample_rate_hz)) = self.staged.as_ref() else {
            self.node.error.set("FFTFilter", &NodeError::MissingInput("in".into()));
            return;
        };
        self.last_output = Some(run(Arc::clone(&self.ctx), samples, *sample_rate_hz, &self.config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_coherent_gains_match_spec_table() {
        assert_eq!(WindowFunction::Rectangular.coherent_gain(), 1.0);
        assert_eq!(WindowFunction::Hann.coherent_gain(), 2.013);
        assert_eq!(WindowFunction::Hamming.coherent_gain(), 1.862);
        assert_eq!(WindowFunction::BlackmanHarris.coherent_gain(), 2.805);
    }

    #[test]
    fn power_of_two_rounding_helpers() {
        assert_eq!(next_power_of_two(1000), 1024);
        assert_eq!(prev_power_of_two(1000), 512);
        assert_eq!(next_power_of_two(1024), 1024);
    }
}
