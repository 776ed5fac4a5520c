//! Constellation diagram (spec.md §4.11).
//!
//! Grounded on `examples/original_source/scopeprotocols/ConstellationFilter.cpp`'s
//! dense 2-D pixel accumulation and histogram-based "Normalize" action.

/// Standard modulation constellations the filter can overlay nominal
/// symbol points for (spec.md §4.11 "optional modulation enumerant").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modulation {
    None,
    Qam4,
    Qam9,
    Qam16,
    Qam32,
    Qam64,
    Psk8,
}

impl Modulation {
    /// Nominal `(I, Q)` symbol points, unit circle / unit square scaled.
    pub fn nominal_points(self) -> Vec<(f64, f64)> {
        match self {
            Modulation::None => Vec::new(),
            Modulation::Qam4 => square_qam(2),
            Modulation::Qam9 => square_qam(3),
            Modulation::Qam16 => square_qam(4),
            Modulation::Qam32 => cross_qam32(),
            Modulation::Qam64 => square_qam(8),
            Modulation::Psk8 => (0..8)
                .map(|k| {
                    let theta = std::f64::consts::TAU * k as f64 / 8.0;
                    (theta.cos(), theta.sin())
                })
                .collect(),
        }
    }
}

fn square_qam(side: usize) -> Vec<(f64, f64)> {
    let half = (side as f64 - 1.0) / 2.0;
    let mut pts = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            pts.push(((col as f64 - half) / half.max(1.0), (row as f64 - half) / half.max(1.0)));
        }
    }
    pts
}

fn cross_qam32() -> Vec<(f64, f64)> {
    // 6x6 square grid with the four corners removed.
    square_qam(6)
        .into_iter()
        .filter(|&(i, q)| !(i.abs() > 0.9 && q.abs() > 0.9))
        .collect()
}

pub struct ConstellationAccumulator {
    pub width: usize,
    pub height: usize,
    pub accum: Vec<u64>,
    pub center_i: f64,
    pub center_q: f64,
    pub radius: f64,
    evm_sum_sq_volts: f64,
    evm_sum_sq_normalized: f64,
    symbol_count: u64,
}

impl ConstellationAccumulator {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            accum: vec![0u64; width * height],
            center_i: 0.0,
            center_q: 0.0,
            radius: 1.0,
            evm_sum_sq_volts: 0.0,
            evm_sum_sq_normalized: 0.0,
            symbol_count: 0,
        }
    }

    /// Integrates one `(I, Q)` sample pair onto the pixel grid and updates
    /// the running EVM accumulators (spec.md §4.11 "continuously-averaged
    /// EVM").
    pub fn add(&mut self, i: f64, q: f64, modulation: Modulation) {
        let px = (((i - self.center_i) / (2.0 * self.radius) + 0.5) * self.width as f64) as i64;
        let py = (((q - self.center_q) / (2.0 * self.radius) + 0.5) * self.height as f64) as i64;
        if px >= 0 && py >= 0 && (px as usize) < self.width && (py as usize) < self.height {
            self.accum[py as usize * self.width + px as usize] += 1;
        }

        if let Some((nearest_i, nearest_q)) = nearest_nominal(i - self.center_i, q - self.center_q, modulation) {
            let err_sq = (i - self.center_i - nearest_i * self.radius).powi(2)
                + (q - self.center_q - nearest_q * self.radius).powi(2);
            self.evm_sum_sq_volts += err_sq;
            let ref_sq = (nearest_i * self.radius).powi(2) + (nearest_q * self.radius).powi(2);
            if ref_sq > 0.0 {
                self.evm_sum_sq_normalized += err_sq / ref_sq;
            }
            self.symbol_count += 1;
        }
    }

    /// RMS EVM in raw volts (spec.md §4.11 output stream 1).
    pub fn evm_volts(&self) -> f64 {
        if self.symbol_count == 0 {
            return 0.0;
        }
        (self.evm_sum_sq_volts / self.symbol_count as f64).sqrt()
    }

    /// RMS EVM normalized to nominal radius, as a percent (spec.md §4.11
    /// output stream 2).
    pub fn evm_percent(&self) -> f64 {
        if self.symbol_count == 0 {
            return 0.0;
        }
        100.0 * (self.evm_sum_sq_normalized / self.symbol_count as f64).sqrt()
    }

    /// Histogram-based autoscale (spec.md §4.11 "Normalize" action):
    /// per-axis histograms, take the top `order` peaks on each axis, and
    /// set center/radius from their span.
    pub fn normalize(&mut self, samples: &[(f64, f64)], order: usize) {
        if samples.is_empty() || order == 0 {
            return;
        }
        let (ci, ri) = axis_peaks(samples.iter().map(|&(i, _)| i), order);
        let (cq, rq) = axis_peaks(samples.iter().map(|&(_, q)| q), order);
        self.center_i = ci;
        self.center_q = cq;
        self.radius = ri.max(rq).max(1e-9);
    }
}

fn nearest_nominal(i: f64, q: f64, modulation: Modulation) -> Option<(f64, f64)> {
    let pts = modulation.nominal_points();
    pts.into_iter()
        .map(|(ni, nq)| ((ni, nq), (i - ni).powi(2) + (q - nq).powi(2)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(p, _)| p)
}

/// Bins `values` into a coarse histogram, finds the `order` tallest bins,
/// and returns `(center, half_span)` of their value range.
fn axis_peaks(values: impl Iterator<Item = f64>, order: usize) -> (f64, f64) {
    const BINS: usize = 256;
    let values: Vec<f64> = values.collect();
    let (lo, hi) = values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(hi > lo) {
        return (lo, 1.0);
    }
    let mut hist = vec![0u32; BINS];
    for &v in &values {
        let bin = (((v - lo) / (hi - lo)) * (BINS - 1) as f64) as usize;
        hist[bin.min(BINS - 1)] += 1;
    }
    let mut indexed: Vec<(usize, u32)> = hist.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.cmp(&a.1));
    let peak_bins: Vec<usize> = indexed.into_iter().take(order).map(|(i, _)| i).collect();
    let to_value = |bin: usize| lo + (bin as f64 / (BINS - 1) as f64) * (hi - lo);
    let peak_min = peak_bins.iter().copied().min().map(to_value).unwrap_or(lo);
    let peak_max = peak_bins.iter().copied().max().map(to_value).unwrap_or(hi);
    ((peak_min + peak_max) / 2.0, ((peak_max - peak_min) / 2.0).max((hi - lo) / (2.0 * BINS as f64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qam16_has_sixteen_distinct_points() {
        let pts = Modulation::Qam16.nominal_points();
        assert_eq!(pts.len(), 16);
    }

    #[test]
    fn qam32_cross_drops_four_corners() {
        assert_eq!(Modulation::Qam32.nominal_points().len(), 32);
    }

    #[test]
    fn evm_is_zero_for_exact_symbol_hits() {
        let mut acc = ConstellationAccumulator::new(64, 64);
        for &(i, q) in &Modulation::Qam4.nominal_points() {
            acc.add(i, q, Modulation::Qam4);
        }
        assert!(acc.evm_volts() < 1e-9);
    }

    #[test]
    fn normalize_centers_on_symbol_cluster() {
        let mut acc = ConstellationAccumulator::new(64, 64);
        let samples = vec![(1.0, 1.0); 50]
            .into_iter()
            .chain(vec![(-1.0, -1.0); 50])
            .collect::<Vec<_>>();
        acc.normalize(&samples, 2);
        assert!(acc.radius > 0.0);
    }
}
