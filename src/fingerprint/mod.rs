//! Fingerprint pipeline glue.
//!
//! Wires decoding, spectral analysis, peak picking and hashing together to
//! produce a [`FingerprintMap`].

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FingerprintError, Result};

pub mod decode;
pub mod extraction;
pub mod hashing;
mod mel;
pub mod peaks;

pub use decode::Waveform;
pub use extraction::{Spectrogram, SpectrogramConfig};
pub use hashing::{FingerprintEntry, FingerprintMap, PairingConfig, fingerprint_hash};
pub use peaks::{Peak, PeakConfig};

/// Every tunable of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Rate decoded audio is resampled to before analysis.
    pub sample_rate: u32,
    pub spectrogram: SpectrogramConfig,
    pub peaks: PeakConfig,
    pub pairing: PairingConfig,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            spectrogram: SpectrogramConfig::default(),
            peaks: PeakConfig::default(),
            pairing: PairingConfig::default(),
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> Result<(), FingerprintError> {
        if self.sample_rate == 0 {
            return Err(FingerprintError::Configuration("sample_rate must be positive".into()));
        }
        self.spectrogram.validate()?;
        self.peaks.validate()?;
        self.pairing.validate()
    }
}

/// Run spectrogram, peak and hash stages over a mono waveform.
///
/// All configuration is checked before any work is done, so an error never
/// comes with partial output.
pub fn fingerprint_pipeline(
    samples: &[f32],
    sample_rate: u32,
    config: &FingerprintConfig,
) -> Result<FingerprintMap, FingerprintError> {
    config.spectrogram.validate()?;
    config.peaks.validate()?;
    config.pairing.validate()?;

    let spectrogram = extraction::generate(samples, sample_rate, &config.spectrogram)?;
    let peaks = peaks::extract(&spectrogram, &config.peaks)?;
    let fingerprints = hashing::generate_hashes(&peaks, &config.pairing)?;

    info!(
        frames = spectrogram.frames(),
        peaks = peaks.len(),
        hashes = fingerprints.len(),
        "fingerprint generated"
    );
    Ok(fingerprints)
}

/// Decode encoded audio and fingerprint it.
pub fn fingerprint_audio(
    audio_bytes: &[u8],
    extension: Option<&str>,
    config: &FingerprintConfig,
) -> Result<FingerprintMap> {
    config.validate()?;

    let waveform = decode::ingest(audio_bytes, extension, config.sample_rate)?;
    info!(duration_secs = waveform.duration_secs(), "audio ingested");

    Ok(fingerprint_pipeline(&waveform.samples, waveform.sample_rate, config)?)
}
