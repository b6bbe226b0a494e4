//! TOML config loading for the supcon CLI.
//!
//! Deserializes an optional TOML file with `[training]` and `[encoder]`
//! sections, then merges with CLI overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use supcon::model::backbone::BackboneConfig;
use supcon::model::encoder::EncoderConfig;
use supcon::training::trainer::SupConTrainingConfig;

/// Images per batch when neither TOML nor CLI set one.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Top-level structure of a supcon TOML file. Both sections are optional.
#[derive(Debug, Default, Deserialize)]
pub struct SupConToml {
    #[serde(default)]
    pub training: TrainingOverrides,
    #[serde(default)]
    pub encoder: EncoderOverrides,
}

/// Optional overrides for `SupConTrainingConfig` plus data loading knobs.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingOverrides {
    pub num_classes: Option<usize>,
    pub lr: Option<f64>,
    pub weight_decay: Option<f64>,
    pub temperature: Option<f64>,
    pub momentum: Option<f64>,
    pub queue_size: Option<usize>,
    pub grad_clip_value: Option<f64>,
    pub total_epochs: Option<usize>,
    pub log_interval: Option<usize>,
    pub checkpoint_dir: Option<String>,
    /// Images per batch.
    pub batch_size: Option<usize>,
    /// Seed for per-epoch shuffling. Unset means dataset order.
    pub shuffle_seed: Option<u64>,
}

/// Optional overrides for `EncoderConfig`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderOverrides {
    pub in_channels: Option<usize>,
    pub stem_channels: Option<usize>,
    pub stage_channels: Option<Vec<usize>>,
    pub d_hidden: Option<usize>,
    pub d_embed: Option<usize>,
}

/// Training values settable from the command line.
#[derive(Debug, Default)]
pub struct TrainingCliOverrides {
    pub num_classes: Option<usize>,
    pub lr: Option<f64>,
    pub total_epochs: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
}

/// Load and deserialize a `SupConToml` from a TOML file.
pub fn load_supcon_toml(path: &Path) -> anyhow::Result<SupConToml> {
    let contents = std::fs::read_to_string(path)?;
    let config: SupConToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded training config");
    Ok(config)
}

/// Build a `SupConTrainingConfig` from defaults, TOML overrides, and CLI flags.
///
/// Priority chain: `SupConTrainingConfig::new()` defaults < TOML values < CLI flags.
pub fn build_training_config(
    overrides: &TrainingOverrides,
    cli: &TrainingCliOverrides,
) -> SupConTrainingConfig {
    let mut config = SupConTrainingConfig::new();

    // Apply TOML overrides
    if let Some(n) = overrides.num_classes {
        config.num_classes = n;
    }
    if let Some(v) = overrides.lr {
        config.lr = v;
    }
    if let Some(v) = overrides.weight_decay {
        config.weight_decay = v;
    }
    if let Some(v) = overrides.temperature {
        config.temperature = v;
    }
    if let Some(v) = overrides.momentum {
        config.momentum = v;
    }
    if let Some(n) = overrides.queue_size {
        config.queue_size = n;
    }
    if let Some(v) = overrides.grad_clip_value {
        config.grad_clip_value = v;
    }
    if let Some(n) = overrides.total_epochs {
        config.total_epochs = n;
    }
    if let Some(n) = overrides.log_interval {
        config.log_interval = n;
    }
    if let Some(dir) = &overrides.checkpoint_dir {
        config.checkpoint_dir = dir.clone();
    }

    // CLI overrides take highest priority
    if let Some(n) = cli.num_classes {
        config.num_classes = n;
    }
    if let Some(v) = cli.lr {
        config.lr = v;
    }
    if let Some(n) = cli.total_epochs {
        config.total_epochs = n;
    }
    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoint_dir = dir.display().to_string();
    }

    config
}

/// Build an `EncoderConfig` from defaults, TOML overrides, and `--channels`.
pub fn build_encoder_config(
    overrides: &EncoderOverrides,
    channels_cli: Option<usize>,
) -> EncoderConfig {
    let mut backbone = BackboneConfig::new();
    if let Some(n) = overrides.in_channels {
        backbone.in_channels = n;
    }
    if let Some(n) = overrides.stem_channels {
        backbone.stem_channels = n;
    }
    if let Some(stages) = &overrides.stage_channels {
        backbone.stage_channels = stages.clone();
    }
    if let Some(n) = channels_cli {
        backbone.in_channels = n;
    }

    let mut config = EncoderConfig::new().with_backbone(backbone);
    if let Some(n) = overrides.d_hidden {
        config.d_hidden = n;
    }
    if let Some(n) = overrides.d_embed {
        config.d_embed = n;
    }
    config
}
