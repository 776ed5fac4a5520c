//! Time Interval Error (spec.md §4.11's TIE block / original
//! `TIEMeasurement.cpp`).
//!
//! Grounded on `examples/original_source/scopeprotocols/TIEMeasurement.cpp`:
//! bracket each signal-clock edge between the golden-clock edge pair that
//! straddles it, take the pair's midpoint, and report `signal - midpoint`.
//! The two-pass GPU fast path (golden edges from a CDR filter, int64
//! shaders available) is noted but left unimplemented for the reason given
//! in `clock_recovery.rs`'s module doc; the host loop below is exact and is
//! what spec.md §8 exercises.

/// Sparse TIE waveform: `offsets_fs[i]`/`durations_fs[i]` describe the span
/// between consecutive golden-clock midpoints, `samples[i]` is the TIE
/// value in femtoseconds for the signal edge bracketed by that span.
pub struct TieOutput {
    pub offsets_fs: Vec<i64>,
    pub durations_fs: Vec<i64>,
    pub samples: Vec<i64>,
}

/// Computes TIE for every `signal_edges_fs` entry bracketed by two
/// consecutive `golden_edges_fs` entries. Edges outside the golden clock's
/// span are dropped (spec.md: "signal edges before the first or after the
/// last golden edge produce no output").
pub fn compute(signal_edges_fs: &[i64], golden_edges_fs: &[i64]) -> TieOutput {
    let mut offsets_fs = Vec::new();
    let mut durations_fs = Vec::new();
    let mut samples = Vec::new();

    if golden_edges_fs.len() < 2 || signal_edges_fs.is_empty() {
        return TieOutput { offsets_fs, durations_fs, samples };
    }

    let last_golden = *golden_edges_fs.last().unwrap();
    let mut golden_idx = 0usize;
    for &signal_edge in signal_edges_fs {
        if signal_edge < golden_edges_fs[0] || signal_edge > last_golden {
            continue;
        }
        while golden_idx + 2 < golden_edges_fs.len() && golden_edges_fs[golden_idx + 1] <= signal_edge {
            golden_idx += 1;
        }
        let lo = golden_edges_fs[golden_idx];
        let hi = golden_edges_fs[golden_idx + 1];

        let midpoint = (lo + hi) / 2;
        offsets_fs.push(midpoint);
        samples.push(signal_edge - midpoint);
    }

    // Durations are the gap to the next recorded midpoint; the final entry
    // has no successor so it gets a zero-length duration.
    durations_fs = vec![0i64; offsets_fs.len()];
    for i in 0..offsets_fs.len().saturating_sub(1) {
        durations_fs[i] = offsets_fs[i + 1] - offsets_fs[i];
    }

    TieOutput { offsets_fs, durations_fs, samples }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_golden_edge_hits_produce_zero_tie() {
        let golden: Vec<i64> = (0..10).map(|i| i * 1000).collect();
        let signal: Vec<i64> = golden.clone();
        let out = compute(&signal, &golden);
        assert!(out.samples.iter().all(|&t| t == 0));
    }

    #[test]
    fn offset_signal_edge_reports_nonzero_tie() {
        let golden: Vec<i64> = (0..10).map(|i| i * 1000).collect();
        let signal = vec![1050i64, 2100, 3150];
        let out = compute(&signal, &golden);
        assert_eq!(out.samples.len(), 3);
        assert_eq!(out.samples[0], 50);
    }

    #[test]
    fn edges_outside_golden_span_are_dropped() {
        let golden: Vec<i64> = (0..5).map(|i| i * 1000).collect();
        let signal = vec![-500i64, 10_000];
        let out = compute(&signal, &golden);
        assert!(out.samples.is_empty());
    }

    #[test]
    fn durations_span_consecutive_recorded_offsets() {
        let golden: Vec<i64> = (0..10).map(|i| i * 1000).collect();
        let signal = vec![1050i64, 2100, 3150];
        let out = compute(&signal, &golden);
        assert_eq!(out.durations_fs.len(), 3);
        assert_eq!(out.durations_fs[0], out.offsets_fs[1] - out.offsets_fs[0]);
    }
}
