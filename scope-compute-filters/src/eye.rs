//! Eye pattern (spec.md §4.8).
//!
//! Grounded on `examples/original_source/scopeprotocols/EyePattern.cpp`'s
//! dense CPU integration path; the GPU atomic-scatter path (int64 +
//! atomic-int64 gated) is structurally identical to the level-crossing
//! three-kernel dispatch in `scope_compute_vulkan::level_crossing` and is
//! left to that crate's `ComputePipeline` plumbing once real SPIR-V assets
//! exist. `EYE_ACCUM_SCALE` sub-pixel splitting and the reduce-max/scale
//! normalize pass are implemented here on the host so §8 property 6 is
//! directly testable.

pub const EYE_ACCUM_SCALE: i64 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockEdgePolarity {
    Rising,
    Falling,
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockAlignment {
    Center,
    Edge,
}

pub struct EyeParams {
    pub width: usize,
    pub height: usize,
    pub saturation_level: f32,
    pub center_voltage: f32,
    pub vertical_range: f32,
    pub num_levels: u32,
}

pub struct EyeAccumulator {
    pub width: usize,
    pub height: usize,
    pub accum: Vec<i64>,
    pub total_uis: u64,
    pub total_samples: u64,
}

impl EyeAccumulator {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            accum: vec![0i64; width * height],
            total_uis: 0,
            total_samples: 0,
        }
    }

    fn add(&mut self, x: usize, y_sub: i64) {
        if x >= self.width {
            return;
        }
        let y_floor = (y_sub / EYE_ACCUM_SCALE).clamp(0, self.height as i64 - 1) as usize;
        let frac = y_sub.rem_euclid(EYE_ACCUM_SCALE);
        // The fractional weight destined for the row below always lands
        // somewhere, even in the top row, where it folds back onto
        // `y_floor` itself: every call deposits exactly `EYE_ACCUM_SCALE`.
        let y_next = (y_floor + 1).min(self.height - 1);
        self.accum[y_floor * self.width + x] += EYE_ACCUM_SCALE - frac;
        self.accum[y_next * self.width + x] += frac;
    }
}

/// Estimates UI width from the first `<=1000` inter-edge intervals,
/// trimming the top/bottom 10% before averaging (spec.md §4.8 "UI width
/// estimation").
pub fn estimate_ui_width_fs(edges_fs: &[i64]) -> i64 {
    if edges_fs.len() < 2 {
        return 0;
    }
    let mut intervals: Vec<i64> = edges_fs.windows(2).take(1000).map(|w| w[1] - w[0]).collect();
    intervals.sort();
    let trim = intervals.len() / 10;
    let kept = &intervals[trim..intervals.len() - trim.min(intervals.len())];
    if kept.is_empty() {
        return intervals.first().copied().unwrap_or(0);
    }
    (kept.iter().sum::<i64>() as f64 / kept.len() as f64).round() as i64
}

/// Dense CPU integration path (spec.md §4.8 "CPU paths"): walks a uniform
/// waveform against already-center-aligned clock edges, wrapping each
/// sample into `[0, 2*ui_width)` on X and `(vertical_range, center_voltage)`
/// on Y, and splitting the pixel weight between the two bracketing rows.
pub fn integrate_dense(
    samples: &[f32],
    timescale_fs: i64,
    edges_fs: &[i64],
    ui_width_fs: i64,
    params: &EyeParams,
) -> EyeAccumulator {
    let mut acc = EyeAccumulator::new(params.width, params.height);
    if edges_fs.len() < 2 || ui_width_fs <= 0 {
        return acc;
    }
    acc.total_uis = edges_fs.len() as u64;
    acc.total_samples = samples.len() as u64;

    let mut edge_idx = 0usize;
    for (i, &sample) in samples.iter().enumerate() {
        let t = i as i64 * timescale_fs;
        while edge_idx + 1 < edges_fs.len() && t >= edges_fs[edge_idx + 1] {
            edge_idx += 1;
        }
        if edge_idx + 1 >= edges_fs.len() {
            break;
        }
        let rel = t - edges_fs[edge_idx];
        if rel < 0 || rel > ui_width_fs {
            continue;
        }
        let x = ((rel as f64 / ui_width_fs as f64) * (2 * params.width) as f64) as usize;
        let x = x.min(2 * params.width - 1) % params.width;

        let half_range = params.vertical_range / 2.0;
        let norm = (sample - params.center_voltage + half_range) / params.vertical_range;
        let y_sub = (norm as f64 * (params.height * EYE_ACCUM_SCALE as usize) as f64) as i64;
        acc.add(x, y_sub);
    }
    acc
}

/// Two-kernel normalize: reduce-max, then `out[i] = min(1, accum[i] *
/// 2*saturation / max)` (spec.md §4.8 "Normalize").
pub fn normalize(acc: &EyeAccumulator, saturation_level: f32) -> Vec<f32> {
    let max = acc.accum.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return vec![0.0; acc.accum.len()];
    }
    let scale = 2.0 * saturation_level as f64 / max as f64;
    acc.accum.iter().map(|&v| (v as f64 * scale).min(1.0) as f32).collect()
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct MaskPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct MaskPolygon {
    pub points: Vec<MaskPoint>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct MaskProtocol {
    pub name: String,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct MaskUnits {
    pub xscale: String,
    pub yscale: String,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct MaskConditions {
    pub hitrate: f64,
}

/// The eye mask YAML file format (spec.md §6).
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub struct EyeMask {
    pub protocol: MaskProtocol,
    pub units: MaskUnits,
    pub conditions: MaskConditions,
    pub mask: Vec<MaskPolygon>,
}

impl EyeMask {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_width_estimate_matches_uniform_spacing() {
        let edges: Vec<i64> = (0..100).map(|i| i * 100_000).collect();
        assert_eq!(estimate_ui_width_fs(&edges), 100_000);
    }

    #[test]
    fn normalize_clamps_at_one_and_scales_by_saturation() {
        let mut acc = EyeAccumulator::new(2, 2);
        acc.accum = vec![0, 10, 20, 5];
        let out = normalize(&acc, 1.0);
        assert_eq!(out[2], 1.0);
        assert!(out.iter().all(|&v| v <= 1.0));
    }

    #[test]
    fn total_uis_equals_edge_count() {
        let edges: Vec<i64> = (0..50).map(|i| i * 800_000).collect();
        let samples = vec![0.0f32; 100];
        let params = EyeParams { width: 32, height: 32, saturation_level: 1.0, center_voltage: 0.0, vertical_range: 2.0, num_levels: 2 };
        let acc = integrate_dense(&samples, 50_000, &edges, 800_000, &params);
        assert_eq!(acc.total_uis, edges.len() as u64);
    }

    #[test]
    fn accumulator_add_always_deposits_exactly_one_scale_unit() {
        let mut acc = EyeAccumulator::new(4, 4);
        // A sample landing exactly on the top row's boundary would have
        // previously dropped its fractional weight when there is no row
        // above to receive it.
        let top_row_y_sub = (acc.height as i64 - 1) * EYE_ACCUM_SCALE + EYE_ACCUM_SCALE / 2;
        acc.add(0, top_row_y_sub);
        let total: i64 = acc.accum.iter().sum();
        assert_eq!(total, EYE_ACCUM_SCALE);

        let mut acc2 = EyeAccumulator::new(4, 4);
        acc2.add(1, EYE_ACCUM_SCALE + EYE_ACCUM_SCALE / 3);
        let total2: i64 = acc2.accum.iter().sum();
        assert_eq!(total2, EYE_ACCUM_SCALE);
    }

    #[test]
    fn parses_eye_mask_yaml() {
        let yaml = r#"
protocol: { name: "PCIe" }
units: { xscale: ui, yscale: v }
conditions: { hitrate: 0.0 }
mask:
  - points:
      - { x: 0.0, y: 0.0 }
      - { x: 1.0, y: 1.0 }
"#;
        let mask = EyeMask::from_yaml(yaml).unwrap();
        assert_eq!(mask.protocol.name, "PCIe");
        assert_eq!(mask.mask[0].points.len(), 2);
    }
}
