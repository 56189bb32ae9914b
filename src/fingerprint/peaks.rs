//! Local maximum detection over a dB spectrogram.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FingerprintError;
use crate::fingerprint::extraction::Spectrogram;

/// A `(frequency_bin, time_frame)` coordinate. Ordering is row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Peak {
    pub frequency_bin: usize,
    pub time_frame: usize,
}

impl Peak {
    pub fn new(frequency_bin: usize, time_frame: usize) -> Self {
        Self { frequency_bin, time_frame }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub threshold_db: f32,
    /// Side of the square neighbourhood a peak must dominate.
    pub neighborhood_size: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self { threshold_db: -40.0, neighborhood_size: 20 }
    }
}

impl PeakConfig {
    pub fn validate(&self) -> Result<(), FingerprintError> {
        if self.neighborhood_size == 0 {
            return Err(FingerprintError::Configuration(
                "neighborhood_size must be positive".into(),
            ));
        }
        if self.threshold_db.is_nan() {
            return Err(FingerprintError::Configuration("threshold_db is NaN".into()));
        }
        Ok(())
    }

    /// Cells covered before and after the centre along one axis.
    fn reach(&self) -> (usize, usize) {
        let before = self.neighborhood_size / 2;
        (before, self.neighborhood_size - 1 - before)
    }
}

/// Find every cell that equals its neighbourhood maximum and reaches the
/// threshold. Plateaus yield one peak per cell. Output is row-major.
pub fn extract(spectrogram: &Spectrogram, config: &PeakConfig) -> Result<Vec<Peak>, FingerprintError> {
    config.validate()?;
    if spectrogram.is_empty() {
        return Ok(Vec::new());
    }

    let maxima = neighborhood_max(spectrogram, config.reach());
    let frames = spectrogram.frames();

    let peaks: Vec<Peak> = spectrogram
        .values()
        .iter()
        .zip(maxima.iter())
        .enumerate()
        .filter(|&(_, (&value, &max))| value == max && value >= config.threshold_db)
        .map(|(index, _)| Peak::new(index / frames, index % frames))
        .collect();

    debug!(peaks = peaks.len(), "peaks extracted");
    Ok(peaks)
}

/// Rectangular maximum filter with edge clamping, as two 1-D passes.
fn neighborhood_max(spectrogram: &Spectrogram, (before, after): (usize, usize)) -> Vec<f32> {
    let bins = spectrogram.bins();
    let frames = spectrogram.frames();

    let mut along_time = vec![0.0_f32; bins * frames];
    for bin in 0..bins {
        sliding_max(
            spectrogram.row(bin),
            before,
            after,
            &mut along_time[bin * frames..(bin + 1) * frames],
        );
    }

    let mut result = vec![0.0_f32; bins * frames];
    let mut column = vec![0.0_f32; bins];
    let mut column_max = vec![0.0_f32; bins];
    for frame in 0..frames {
        for bin in 0..bins {
            column[bin] = along_time[bin * frames + frame];
        }
        sliding_max(&column, before, after, &mut column_max);
        for bin in 0..bins {
            result[bin * frames + frame] = column_max[bin];
        }
    }

    result
}

/// `out[i] = max(input[i - before ..= i + after])`, clamped to the slice.
fn sliding_max(input: &[f32], before: usize, after: usize, out: &mut [f32]) {
    let n = input.len();
    let mut window: VecDeque<usize> = VecDeque::new();
    let mut next = 0;

    for i in 0..n {
        let hi = (i + after).min(n - 1);
        while next <= hi {
            while window.back().is_some_and(|&b| input[b] <= input[next]) {
                window.pop_back();
            }
            window.push_back(next);
            next += 1;
        }

        let lo = i.saturating_sub(before);
        while window.front().is_some_and(|&f| f < lo) {
            window.pop_front();
        }

        if let Some(&front) = window.front() {
            out[i] = input[front];
        }
    }
}

#[cfg(test)]
pub(crate) fn extract_naive(spectrogram: &Spectrogram, config: &PeakConfig) -> Vec<Peak> {
    let (before, after) = config.reach();
    let mut peaks = Vec::new();

    for bin in 0..spectrogram.bins() {
        for frame in 0..spectrogram.frames() {
            let value = spectrogram.get(bin, frame);
            let bins = bin.saturating_sub(before)..=(bin + after).min(spectrogram.bins() - 1);
            let mut max = f32::NEG_INFINITY;
            for b in bins {
                let frames = frame.saturating_sub(before)..=(frame + after).min(spectrogram.frames() - 1);
                for t in frames {
                    max = max.max(spectrogram.get(b, t));
                }
            }
            if value == max && value >= config.threshold_db {
                peaks.push(Peak::new(bin, frame));
            }
        }
    }

    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn filled(bins: usize, frames: usize, value: f32) -> Vec<Vec<f32>> {
        vec![vec![value; frames]; bins]
    }

    #[test]
    fn single_isolated_peak() {
        let mut rows = filled(12, 8, -60.0);
        rows[5][2] = 0.0;
        let spec = Spectrogram::from_rows(rows).unwrap();

        let peaks = extract(&spec, &PeakConfig::default()).unwrap();
        assert_eq!(peaks, vec![Peak::new(5, 2)]);
    }

    #[test]
    fn all_below_threshold_yields_nothing() {
        let spec = Spectrogram::from_rows(filled(30, 30, -60.0)).unwrap();
        assert!(extract(&spec, &PeakConfig::default()).unwrap().is_empty());

        let silent = Spectrogram::from_rows(filled(30, 30, f32::NEG_INFINITY)).unwrap();
        assert!(extract(&silent, &PeakConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let config = PeakConfig { threshold_db: -40.0, neighborhood_size: 3 };

        let mut rows = filled(5, 5, -80.0);
        rows[2][2] = -40.0;
        let at = Spectrogram::from_rows(rows.clone()).unwrap();
        assert_eq!(extract(&at, &config).unwrap(), vec![Peak::new(2, 2)]);

        rows[2][2] = -41.0;
        let below = Spectrogram::from_rows(rows).unwrap();
        assert!(extract(&below, &config).unwrap().is_empty());
    }

    #[test]
    fn plateaus_are_kept_whole() {
        let mut rows = filled(6, 6, -70.0);
        rows[2][2] = -10.0;
        rows[2][3] = -10.0;
        rows[3][2] = -10.0;
        let spec = Spectrogram::from_rows(rows).unwrap();

        let peaks = extract(&spec, &PeakConfig { threshold_db: -40.0, neighborhood_size: 5 }).unwrap();
        assert_eq!(peaks, vec![Peak::new(2, 2), Peak::new(2, 3), Peak::new(3, 2)]);
    }

    #[test]
    fn neighbourhood_is_clamped_at_edges() {
        let mut rows = filled(4, 4, -50.0);
        rows[0][0] = -5.0;
        rows[3][3] = -6.0;
        let spec = Spectrogram::from_rows(rows).unwrap();

        // size 3 keeps the corners apart; size 20 lets the louder one win
        let small = extract(&spec, &PeakConfig { threshold_db: -40.0, neighborhood_size: 3 }).unwrap();
        assert_eq!(small, vec![Peak::new(0, 0), Peak::new(3, 3)]);

        let large = extract(&spec, &PeakConfig::default()).unwrap();
        assert_eq!(large, vec![Peak::new(0, 0)]);
    }

    #[test]
    fn even_neighbourhoods_reach_one_cell_further_back() {
        // size 4 covers offsets -2..=1
        let spec = Spectrogram::from_rows(vec![vec![-20.0, -50.0, -10.0, -50.0, -30.0, -50.0]]).unwrap();

        let peaks = extract(&spec, &PeakConfig { threshold_db: -40.0, neighborhood_size: 4 }).unwrap();
        assert_eq!(peaks, vec![Peak::new(0, 0), Peak::new(0, 2)]);
    }

    #[test]
    fn rejects_zero_neighbourhood() {
        let spec = Spectrogram::from_rows(filled(2, 2, 0.0)).unwrap();
        let config = PeakConfig { neighborhood_size: 0, ..Default::default() };
        assert!(matches!(extract(&spec, &config), Err(FingerprintError::Configuration(_))));
    }

    #[test]
    fn empty_spectrogram_has_no_peaks() {
        let peaks = extract(&Spectrogram::empty(128), &PeakConfig::default()).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn separable_filter_matches_naive_definition() {
        let mut rng = StdRng::seed_from_u64(7);

        for round in 0..60 {
            let bins = rng.random_range(1..40);
            let frames = rng.random_range(1..60);
            // quantized values produce plenty of plateaus
            let quantize = round % 2 == 0;
            let rows: Vec<Vec<f32>> = (0..bins)
                .map(|_| {
                    (0..frames)
                        .map(|_| {
                            let v: f32 = rng.random_range(-80.0..0.0);
                            if quantize { (v / 10.0).round() * 10.0 } else { v }
                        })
                        .collect()
                })
                .collect();
            let spec = Spectrogram::from_rows(rows).unwrap();
            let config = PeakConfig {
                threshold_db: rng.random_range(-70.0..-10.0),
                neighborhood_size: rng.random_range(1..25),
            };

            assert_eq!(
                extract(&spec, &config).unwrap(),
                extract_naive(&spec, &config),
                "round {round}: {bins}x{frames}, {config:?}"
            );
        }
    }
}
