//! Training and dataset inspection pipelines behind the CLI subcommands.

use std::path::PathBuf;
use std::time::Instant;

use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::config::Config;
use imageset::{ImageReader, ImageShape};
use supcon::model::encoder::Encoder;
use supcon::training::data::ImageBatchSource;
use supcon::training::source::BatchSource;
use supcon::training::trainer::TrainingSession;

use crate::config::{
    build_encoder_config, build_training_config, load_supcon_toml, SupConToml, TrainingCliOverrides,
    DEFAULT_BATCH_SIZE,
};

type TrainBackend = Autodiff<NdArray<f32>>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Image Parquet files to train on.
    pub data: Vec<PathBuf>,
    /// Optional TOML file with `[training]` / `[encoder]` overrides.
    pub config: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub total_epochs: Option<usize>,
    pub lr: Option<f64>,
    pub checkpoint_dir: Option<PathBuf>,
    pub num_classes: Option<usize>,
    /// Side length of the square input images.
    pub image_size: usize,
    pub channels: Option<usize>,
    pub shuffle_seed: Option<u64>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    /// Path to the image Parquet file.
    pub input: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Train student and teacher encoders on image Parquet data.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Resolve config: defaults < TOML < CLI
    let toml = match &args.config {
        Some(path) => load_supcon_toml(path)?,
        None => SupConToml::default(),
    };
    let training = build_training_config(
        &toml.training,
        &TrainingCliOverrides {
            num_classes: args.num_classes,
            lr: args.lr,
            total_epochs: args.total_epochs,
            checkpoint_dir: args.checkpoint_dir.clone(),
        },
    );
    let encoder = build_encoder_config(&toml.encoder, args.channels);
    let batch_size = args
        .batch_size
        .or(toml.training.batch_size)
        .unwrap_or(DEFAULT_BATCH_SIZE);
    let shuffle_seed = args.shuffle_seed.or(toml.training.shuffle_seed);

    // 2. Load data
    let device = NdArrayDevice::default();
    let shape = ImageShape::square(encoder.backbone.in_channels, args.image_size);
    let mut source =
        ImageBatchSource::<TrainBackend>::from_parquet(&args.data, shape, batch_size, &device)?;
    if let Some(seed) = shuffle_seed {
        source = source.with_shuffle(seed);
    }
    if source.is_empty() {
        anyhow::bail!("No image records found in {} file(s)", args.data.len());
    }
    if source.min_num_classes() > training.num_classes {
        anyhow::bail!(
            "Dataset has labels up to {} but num_classes is {}",
            source.min_num_classes() - 1,
            training.num_classes
        );
    }

    // 3. Record the resolved configs next to the checkpoints
    let checkpoint_dir = PathBuf::from(&training.checkpoint_dir);
    std::fs::create_dir_all(&checkpoint_dir)?;
    training.save(checkpoint_dir.join("training_config.json"))?;
    encoder.save(checkpoint_dir.join("encoder_config.json"))?;

    // 4. Train
    tracing::info!(
        records = source.len(),
        batches = source.num_batches(),
        batch_size,
        shape = %shape,
        feature_dim = encoder.backbone.feature_dim(),
        d_embed = encoder.d_embed,
        "Building training session"
    );
    let optimizer = training
        .optimizer()
        .init::<TrainBackend, Encoder<TrainBackend>>();
    let mut session = TrainingSession::new(training, &encoder, optimizer, &device)?;
    let history = session.fit(&source)?;

    let elapsed = start.elapsed();
    println!("\n--- Training Summary ---");
    for m in &history {
        println!(
            "Epoch {}: loss = {:.4} ({} trained, {} skipped, {:.1}s)",
            m.epoch, m.mean_loss, m.trained_steps, m.skipped_steps, m.elapsed_secs
        );
    }
    println!("Epochs completed: {}", session.epochs_completed());
    println!("Trained steps: {}", session.trained_steps());
    println!("Skipped steps: {}", session.skipped_steps());
    println!("Checkpoints: {}", checkpoint_dir.display());
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Print statistics from an image Parquet file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = ImageReader::read_summary(&args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Dataset Summary ---");
    println!("File: {}", args.input.display());
    println!("Total records: {}", summary.total_records);
    println!("Pixel values per image: {}", summary.pixel_len);
    println!("Classes seen: {}", summary.num_classes_seen());
    println!("Minimum num_classes: {}", summary.min_num_classes());
    for (label, count) in &summary.per_class {
        println!("  class {label}: {count}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageset::{ImageRecord, ImageWriter};

    fn write_dataset(path: &std::path::Path, n: u32, shape: ImageShape) {
        let mut writer = ImageWriter::new(path.to_path_buf());
        for i in 0..n {
            let pixels: Vec<f32> = (0..shape.num_values())
                .map(|p| ((p as u32 * 3 + i) % 11) as f32 / 11.0)
                .collect();
            writer.record(ImageRecord::new(1 + i % 2, pixels));
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_run_summary() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("images.parquet");
        write_dataset(&path, 6, ImageShape::square(1, 4));

        run_summary(SummaryArgs { input: path.clone(), json: false }).unwrap();
        run_summary(SummaryArgs { input: path, json: true }).unwrap();
    }

    #[test]
    fn test_run_train_tiny() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data = tmp.path().join("train.parquet");
        write_dataset(&data, 8, ImageShape::square(1, 8));

        let config_path = tmp.path().join("supcon.toml");
        std::fs::write(
            &config_path,
            r#"
[training]
num_classes = 3
queue_size = 2

[encoder]
in_channels = 1
stem_channels = 4
stage_channels = [4, 8]
d_hidden = 16
d_embed = 8
"#,
        )
        .unwrap();

        let ckpt = tmp.path().join("ckpt");
        run_train(TrainArgs {
            data: vec![data],
            config: Some(config_path),
            batch_size: Some(4),
            total_epochs: Some(1),
            lr: None,
            checkpoint_dir: Some(ckpt.clone()),
            num_classes: None,
            image_size: 8,
            channels: None,
            shuffle_seed: Some(3),
        })
        .unwrap();

        for file in [
            "student.mpk",
            "teacher.mpk",
            "optimizer.mpk",
            "meta.json",
            "training_config.json",
            "encoder_config.json",
        ] {
            assert!(ckpt.join(file).exists(), "{file} should be written");
        }
    }

    #[test]
    fn test_run_train_rejects_too_few_classes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data = tmp.path().join("train.parquet");
        write_dataset(&data, 4, ImageShape::square(1, 8));

        let result = run_train(TrainArgs {
            data: vec![data],
            config: None,
            batch_size: Some(2),
            total_epochs: Some(1),
            lr: None,
            checkpoint_dir: Some(tmp.path().join("ckpt")),
            num_classes: Some(2),
            image_size: 8,
            channels: Some(1),
            shuffle_seed: None,
        });
        let err = result.unwrap_err().to_string();
        assert!(err.contains("num_classes"), "unexpected error: {err}");
    }
}
