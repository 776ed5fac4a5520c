//! Weighted-parabolic peak search (spec.md §4.7 step 5).
//!
//! Grounded on `examples/original_source/scopehal/PeakDetectionFilter.h/.cpp`,
//! composed into [`crate::fft_filter::FftFilter`] as a plain struct rather
//! than inherited (spec.md §9 redesign note).

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub bin: usize,
    /// Weighted-average-refined bin position (fractional).
    pub refined_bin: f64,
    pub value: f32,
}

#[derive(Default)]
pub struct PeakDetector;

impl PeakDetector {
    /// Finds up to `num_peaks` local maxima in `bins`, separated by at
    /// least `min_separation_bins`, each refined by a weighted average over
    /// `+/-10` neighboring bins (spec.md §4.7: "refined by weighted-average
    /// over +/-10 bins").
    pub fn find_peaks(&self, bins: &[f32], num_peaks: usize, min_separation_bins: usize) -> Vec<Peak> {
        if bins.len() < 3 || num_peaks == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(usize, f32)> = (1..bins.len() - 1)
            .filter(|&i| bins[i] >= bins[i - 1] && bins[i] >= bins[i + 1])
            .map(|i| (i, bins[i]))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut peaks: Vec<Peak> = Vec::new();
        for (bin, value) in candidates {
            if peaks.len() >= num_peaks {
                break;
            }
            if peaks.iter().any(|p| bin.abs_diff(p.bin) < min_separation_bins) {
                continue;
            }
            peaks.push(Peak {
                bin,
                refined_bin: Self::weighted_refine(bins, bin),
                value,
            });
        }
        peaks.sort_by_key(|p| p.bin);
        peaks
    }

    fn weighted_refine(bins: &[f32], center: usize) -> f64 {
        let lo = center.saturating_sub(10);
        let hi = (center + 10).min(bins.len() - 1);
        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        for i in lo..=hi {
            let w = bins[i] as f64;
            weighted_sum += i as f64 * w;
            weight_total += w;
        }
        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            center as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_single_peak_at_the_right_bin() {
        let mut bins = vec![0.0f32; 32];
        bins[10] = 1.0;
        let peaks = PeakDetector.find_peaks(&bins, 4, 2);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].bin, 10);
    }

    #[test]
    fn respects_minimum_separation() {
        let mut bins = vec![0.0f32; 32];
        bins[10] = 1.0;
        bins[11] = 0.9;
        let peaks = PeakDetector.find_peaks(&bins, 4, 4);
        assert_eq!(peaks.len(), 1);
    }

    #[test]
    fn orders_output_by_bin_ascending() {
        let mut bins = vec![0.0f32; 64];
        bins[50] = 1.0;
        bins[10] = 0.8;
        let peaks = PeakDetector.find_peaks(&bins, 4, 2);
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].bin < peaks[1].bin);
    }
}
