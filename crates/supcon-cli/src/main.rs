mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{SummaryArgs, TrainArgs};

/// supcon: supervised contrastive training with a momentum teacher and a
/// class-indexed memory queue.
#[derive(Parser)]
#[command(name = "supcon", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training and dataset inspection.
#[derive(Subcommand)]
enum Command {
    /// Train student and teacher encoders on image Parquet files.
    Train {
        /// Path(s) to image Parquet files.
        #[arg(long, required = true, num_args = 1..)]
        data: Vec<PathBuf>,
        /// Path to a TOML file with [training] and [encoder] overrides.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Images per batch. Default: 128.
        #[arg(long, short = 'b')]
        batch_size: Option<usize>,
        /// Total epochs across all runs on the checkpoint directory; a resumed
        /// run trains only the epochs still missing. Default: 10.
        #[arg(long, short = 't')]
        total_epoch: Option<usize>,
        /// Learning rate. Default: 1e-4.
        #[arg(long, short = 'l')]
        lr: Option<f64>,
        /// Directory for saving and resuming checkpoints. Default: checkpoints/supcon.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Number of classes. Default: 60.
        #[arg(long)]
        num_classes: Option<usize>,
        /// Side length of the square input images.
        #[arg(long, default_value_t = 224)]
        image_size: usize,
        /// Image channels (overrides the encoder's input channels).
        #[arg(long)]
        channels: Option<usize>,
        /// Shuffle records every epoch with this seed.
        #[arg(long)]
        shuffle_seed: Option<u64>,
    },
    /// Print statistics from an image Parquet file.
    Summary {
        /// Path to the image Parquet file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            data,
            config,
            batch_size,
            total_epoch,
            lr,
            checkpoint_dir,
            num_classes,
            image_size,
            channels,
            shuffle_seed,
        } => pipeline::run_train(TrainArgs {
            data,
            config,
            batch_size,
            total_epochs: total_epoch,
            lr,
            checkpoint_dir,
            num_classes,
            image_size,
            channels,
            shuffle_seed,
        }),
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train() {
        let cli = Cli::try_parse_from([
            "supcon", "train", "--data", "a.parquet", "b.parquet", "-b", "64", "--lr", "3e-4",
        ])
        .unwrap();
        match cli.command {
            Command::Train {
                data,
                batch_size,
                lr,
                total_epoch,
                image_size,
                ..
            } => {
                assert_eq!(data.len(), 2);
                assert_eq!(batch_size, Some(64));
                assert_eq!(lr, Some(3e-4));
                assert_eq!(total_epoch, None);
                assert_eq!(image_size, 224);
            }
            Command::Summary { .. } => panic!("expected train"),
        }
    }

    #[test]
    fn test_total_epoch_help_describes_resume() {
        let cli = Cli::command();
        let train = cli.find_subcommand("train").expect("train subcommand");
        let arg = train
            .get_arguments()
            .find(|a| a.get_id() == "total_epoch")
            .expect("--total-epoch argument");
        let help = arg.get_help().expect("help text").to_string();
        assert!(help.contains("across all runs"), "unexpected help: {help}");
        assert!(help.contains("resumed"), "unexpected help: {help}");
    }

    #[test]
    fn test_train_requires_data() {
        assert!(Cli::try_parse_from(["supcon", "train"]).is_err());
    }
}
