//! Merge settings from the command line and an optional JSON file

use std::path::Path;

use anyhow::{bail, Context, Result};
use midi_merge::MergeConfig;

/// Load settings from `path`, then apply command-line overrides
///
/// Missing keys in the file keep their defaults.
pub fn load(path: Option<&Path>, max_streams: Option<usize>) -> Result<MergeConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            parse(&json).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => MergeConfig::default(),
    };

    if let Some(max) = max_streams {
        config.max_streams = max;
    }
    if config.max_streams < 2 {
        bail!(
            "max_streams must be at least 2 (one source and the destination), got {}",
            config.max_streams
        );
    }

    Ok(config)
}

fn parse(json: &str) -> Result<MergeConfig> {
    Ok(serde_json::from_str(json)?)
}
