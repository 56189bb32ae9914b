//! Slaney-style mel filter bank.

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4_f64.ln() / 27.0
}

pub(crate) fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub(crate) fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Sparse triangular filters, one per mel band, over `fft_len / 2 + 1` power
/// bins. Each filter is normalized to unit area in Hz.
pub(crate) struct MelBank {
    filters: Vec<Vec<(usize, f32)>>,
}

impl MelBank {
    pub(crate) fn new(
        sample_rate: u32,
        fft_len: usize,
        mel_bands: usize,
        f_min: f64,
        f_max: f64,
    ) -> Self {
        let bins = fft_len / 2 + 1;
        let fft_freqs: Vec<f64> = (0..bins)
            .map(|k| k as f64 * sample_rate as f64 / fft_len as f64)
            .collect();

        let mel_min = hz_to_mel(f_min);
        let mel_max = hz_to_mel(f_max);
        let hz_points: Vec<f64> = (0..mel_bands + 2)
            .map(|i| {
                let t = i as f64 / (mel_bands + 1) as f64;
                mel_to_hz(mel_min + (mel_max - mel_min) * t)
            })
            .collect();

        let filters = (0..mel_bands)
            .map(|m| {
                let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
                let norm = 2.0 / (right - left);

                fft_freqs
                    .iter()
                    .enumerate()
                    .filter_map(|(bin, &freq)| {
                        let lower = (freq - left) / (center - left);
                        let upper = (right - freq) / (right - center);
                        let weight = lower.min(upper).max(0.0) * norm;
                        (weight > 0.0).then_some((bin, weight as f32))
                    })
                    .collect()
            })
            .collect();

        Self { filters }
    }

    pub(crate) fn bands(&self) -> usize {
        self.filters.len()
    }

    /// Project one frame of linear power onto the mel bands.
    pub(crate) fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| {
                filter
                    .iter()
                    .map(|&(bin, weight)| power.get(bin).copied().unwrap_or(0.0) as f64 * weight as f64)
                    .sum::<f64>() as f32
            })
            .collect()
    }
}
