use std::{env, fs};

use anyhow::Context;
use tracing::info;

use tunehash::config::AppConfig;
use tunehash::fingerprint::fingerprint_audio;
use tunehash::{logging, server};

/// `tunehash` serves the HTTP API; `tunehash <file>` prints the file's
/// fingerprint map as JSON.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    logging::init(&config.log_level);

    match env::args().nth(1) {
        Some(path) => {
            let audio_bytes = fs::read(&path).with_context(|| format!("reading {path}"))?;
            let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
            let fingerprints = fingerprint_audio(&audio_bytes, extension.as_deref(), &config.fingerprint)?;

            info!(path = %path, hashes = fingerprints.len(), "fingerprinted file");
            println!("{}", serde_json::to_string_pretty(&fingerprints)?);
            Ok(())
        }
        None => server::serve(config).await,
    }
}
