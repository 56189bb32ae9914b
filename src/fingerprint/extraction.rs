//! Spectral extraction.
//!
//! Frames the waveform, applies a Hann window, computes FFT power per frame,
//! projects it onto a mel filter bank and converts the result to decibels
//! relative to the loudest cell of the clip.

use std::f32::consts::PI;

use rayon::prelude::*;
use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FingerprintError;
use crate::fingerprint::mel::MelBank;

/// Power floor used before taking logarithms.
const AMIN: f32 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub window_size: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f32,
    /// Upper edge of the mel bank, Nyquist when unset.
    pub f_max: Option<f32>,
    /// Dynamic range kept below the loudest cell.
    pub top_db: Option<f32>,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_length: 512,
            n_mels: 128,
            f_min: 0.0,
            f_max: None,
            top_db: Some(80.0),
        }
    }
}

impl SpectrogramConfig {
    pub fn validate(&self) -> Result<(), FingerprintError> {
        let fail = |msg: String| Err(FingerprintError::Configuration(msg));

        if self.window_size == 0 || self.hop_length == 0 {
            return fail(format!(
                "window_size ({}) and hop_length ({}) must be positive",
                self.window_size, self.hop_length
            ));
        }
        if self.window_size < self.hop_length {
            return fail(format!(
                "window_size ({}) must not be smaller than hop_length ({})",
                self.window_size, self.hop_length
            ));
        }
        if self.n_mels == 0 {
            return fail("n_mels must be positive".into());
        }
        if !self.f_min.is_finite() || self.f_min < 0.0 {
            return fail(format!("f_min ({}) must be a non-negative frequency", self.f_min));
        }
        if let Some(f_max) = self.f_max {
            if !f_max.is_finite() || f_max <= self.f_min {
                return fail(format!("f_max ({f_max}) must be above f_min ({})", self.f_min));
            }
        }
        if let Some(top_db) = self.top_db {
            if !top_db.is_finite() || top_db < 0.0 {
                return fail(format!("top_db ({top_db}) must be a non-negative number"));
            }
        }

        Ok(())
    }

    fn upper_frequency(&self, sample_rate: u32) -> f32 {
        self.f_max.unwrap_or(sample_rate as f32 / 2.0)
    }
}

/// Mel power in dB, stored row-major by mel bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    values: Vec<f32>,
    bins: usize,
    frames: usize,
}

impl Spectrogram {
    pub fn empty(bins: usize) -> Self {
        Self { values: Vec::new(), bins, frames: 0 }
    }

    /// Build a spectrogram from one row per frequency bin.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, FingerprintError> {
        let bins = rows.len();
        let frames = rows.first().map_or(0, Vec::len);

        if rows.iter().any(|row| row.len() != frames) {
            return Err(FingerprintError::InvalidAudioData(
                "spectrogram rows must all have the same length".into(),
            ));
        }
        if rows.iter().flatten().any(|v| v.is_nan()) {
            return Err(FingerprintError::InvalidAudioData(
                "spectrogram contains NaN".into(),
            ));
        }

        Ok(Self { values: rows.into_iter().flatten().collect(), bins, frames })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.bins == 0
    }

    pub fn get(&self, bin: usize, frame: usize) -> f32 {
        self.values[bin * self.frames + frame]
    }

    pub fn row(&self, bin: usize) -> &[f32] {
        &self.values[bin * self.frames..(bin + 1) * self.frames]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Number of full windows that fit in `len` samples.
pub fn frame_count(len: usize, window_size: usize, hop_length: usize) -> usize {
    if len < window_size {
        0
    } else {
        (len - window_size) / hop_length + 1
    }
}

/// Compute the dB-scaled mel spectrogram of a mono waveform.
pub fn generate(
    samples: &[f32],
    sample_rate: u32,
    config: &SpectrogramConfig,
) -> Result<Spectrogram, FingerprintError> {
    config.validate()?;
    validate_samples(samples, sample_rate)?;

    let f_max = config.upper_frequency(sample_rate);
    if f_max <= config.f_min {
        return Err(FingerprintError::Configuration(format!(
            "f_min ({}) must be below the upper mel edge ({f_max})",
            config.f_min
        )));
    }

    let frames = frame_count(samples.len(), config.window_size, config.hop_length);
    if frames == 0 {
        debug!(
            samples = samples.len(),
            window_size = config.window_size,
            "waveform shorter than one window"
        );
        return Ok(Spectrogram::empty(config.n_mels));
    }

    let bank = MelBank::new(
        sample_rate,
        config.window_size,
        config.n_mels,
        config.f_min as f64,
        f_max as f64,
    );
    let mel_frames = mel_power_frames(samples, config, frames, &bank);

    let bins = bank.bands();
    let mut values = vec![0.0_f32; bins * frames];
    for (t, mel) in mel_frames.iter().enumerate() {
        for (m, &power) in mel.iter().enumerate() {
            values[m * frames + t] = power;
        }
    }

    power_to_db(&mut values, config.top_db);
    debug!(bins, frames, "spectrogram generated");

    Ok(Spectrogram { values, bins, frames })
}

fn validate_samples(samples: &[f32], sample_rate: u32) -> Result<(), FingerprintError> {
    if sample_rate == 0 {
        return Err(FingerprintError::InvalidAudioData("sample rate must be positive".into()));
    }
    if samples.is_empty() {
        return Err(FingerprintError::InvalidAudioData("waveform is empty".into()));
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(FingerprintError::InvalidAudioData(format!(
            "non-finite sample at index {index}"
        )));
    }
    Ok(())
}

/// Mel power for each frame, in frame order.
fn mel_power_frames(
    samples: &[f32],
    config: &SpectrogramConfig,
    frames: usize,
    bank: &MelBank,
) -> Vec<Vec<f32>> {
    let n = config.window_size;
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);
    let window = hann_window(n);

    (0..frames)
        .into_par_iter()
        .map(|t| {
            let start = t * config.hop_length;
            let mut buffer: Vec<Complex<f32>> = samples[start..start + n]
                .iter()
                .zip(window.iter())
                .map(|(&s, &w)| Complex { re: s * w, im: 0.0 })
                .collect();
            fft.process(&mut buffer);

            let power: Vec<f32> = buffer[..n / 2 + 1]
                .iter()
                .map(|c| c.re * c.re + c.im * c.im)
                .collect();
            bank.apply(&power)
        })
        .collect()
}

/// Periodic Hann window.
fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n).cos()))
        .collect()
}

/// Convert power to dB relative to the largest value.
///
/// A matrix with no energy at all becomes `-inf` everywhere. Any other
/// matrix keeps its loudest cell at 0 dB, with both sides floored at `AMIN`.
fn power_to_db(values: &mut [f32], top_db: Option<f32>) {
    let reference = values.iter().copied().fold(0.0_f32, f32::max);
    if reference == 0.0 {
        values.fill(f32::NEG_INFINITY);
        return;
    }

    let reference_db = 10.0 * reference.max(AMIN).log10();
    for v in values.iter_mut() {
        *v = 10.0 * v.max(AMIN).log10() - reference_db;
    }

    if let Some(top_db) = top_db {
        for v in values.iter_mut() {
            *v = v.max(-top_db);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn loudest_bin(spec: &Spectrogram, frame: usize) -> usize {
        (0..spec.bins())
            .max_by(|&a, &b| spec.get(a, frame).total_cmp(&spec.get(b, frame)))
            .unwrap()
    }

    #[test]
    fn frame_count_follows_window_and_hop() {
        assert_eq!(frame_count(2048, 2048, 512), 1);
        assert_eq!(frame_count(2048 + 512 * 3 + 100, 2048, 512), 4);
        assert_eq!(frame_count(2047, 2048, 512), 0);
    }

    #[test]
    fn spectrogram_shape_is_mels_by_frames() {
        let samples = sine(440.0, 22_050, 2048 + 512 * 9, 0.5);
        let spec = generate(&samples, 22_050, &SpectrogramConfig::default()).unwrap();

        assert_eq!(spec.bins(), 128);
        assert_eq!(spec.frames(), 10);
        assert_eq!(spec.values().len(), 128 * 10);
    }

    #[test]
    fn short_waveform_yields_empty_spectrogram() {
        let spec = generate(&[0.1; 1000], 22_050, &SpectrogramConfig::default()).unwrap();
        assert!(spec.is_empty());
        assert_eq!(spec.bins(), 128);
        assert_eq!(spec.frames(), 0);
    }

    #[test]
    fn rejects_empty_and_non_finite_waveforms() {
        let config = SpectrogramConfig::default();

        assert!(matches!(
            generate(&[], 22_050, &config),
            Err(FingerprintError::InvalidAudioData(_))
        ));

        let mut samples = vec![0.0; 4096];
        samples[17] = f32::NAN;
        let err = generate(&samples, 22_050, &config).unwrap_err();
        assert_eq!(err, FingerprintError::InvalidAudioData("non-finite sample at index 17".into()));

        samples[17] = f32::INFINITY;
        assert!(generate(&samples, 22_050, &config).is_err());
        assert!(generate(&[0.0; 4096], 0, &config).is_err());
    }

    #[test]
    fn rejects_bad_window_configuration() {
        let samples = vec![0.0; 4096];
        for config in [
            SpectrogramConfig { hop_length: 0, ..Default::default() },
            SpectrogramConfig { window_size: 256, hop_length: 512, ..Default::default() },
            SpectrogramConfig { n_mels: 0, ..Default::default() },
            SpectrogramConfig { f_min: 500.0, f_max: Some(400.0), ..Default::default() },
        ] {
            assert!(matches!(
                generate(&samples, 22_050, &config),
                Err(FingerprintError::Configuration(_))
            ));
        }
    }

    #[test]
    fn loudest_cell_is_zero_db() {
        let samples = sine(1000.0, 22_050, 22_050, 0.8);
        let spec = generate(&samples, 22_050, &SpectrogramConfig::default()).unwrap();

        let max = spec.values().iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(max, 0.0);
        assert!(spec.values().iter().all(|&v| v <= 0.0 && v >= -80.0));
    }

    #[test]
    fn normalization_is_loudness_invariant() {
        let config = SpectrogramConfig::default();
        let loud = generate(&sine(1000.0, 22_050, 8192, 0.9), 22_050, &config).unwrap();
        let quiet = generate(&sine(1000.0, 22_050, 8192, 0.09), 22_050, &config).unwrap();

        for (a, b) in loud.values().iter().zip(quiet.values()) {
            assert!((a - b).abs() < 1e-2, "{a} vs {b}");
        }
    }

    #[test]
    fn higher_tones_land_in_higher_mel_bins() {
        let config = SpectrogramConfig::default();
        let low = generate(&sine(440.0, 22_050, 8192, 0.5), 22_050, &config).unwrap();
        let high = generate(&sine(4000.0, 22_050, 8192, 0.5), 22_050, &config).unwrap();

        assert!(loudest_bin(&low, 1) < loudest_bin(&high, 1));
    }

    #[test]
    fn digital_silence_has_no_finite_cells() {
        let spec = generate(&[0.0; 8192], 22_050, &SpectrogramConfig::default()).unwrap();
        assert!(spec.frames() > 0);
        assert!(spec.values().iter().all(|&v| v == f32::NEG_INFINITY));
    }

    #[test]
    fn faint_power_is_normalized_not_silenced() {
        let mut values = vec![1e-7, 1e-9, 0.0];
        power_to_db(&mut values, None);
        assert!((values[0] - 0.0).abs() < 1e-4);
        assert!((values[1] + 20.0).abs() < 1e-3);
        assert!((values[2] + 30.0).abs() < 1e-3);

        let mut below_floor = vec![4e-12, 0.0];
        power_to_db(&mut below_floor, Some(80.0));
        assert_eq!(below_floor, vec![0.0, 0.0]);
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        assert!(Spectrogram::from_rows(vec![vec![0.0; 3], vec![0.0; 2]]).is_err());
        let spec = Spectrogram::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(spec.get(1, 0), 3.0);
        assert_eq!(spec.row(0), &[1.0, 2.0]);
    }
}
