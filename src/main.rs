use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ldc_classifier::dataset::run_preprocess;
use ldc_classifier::model::{artifact_path, AppConfig, DeviceType, InputScaling};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live/dead cell patch extraction and classification")]
struct Cli {
    /// 設定ファイル(JSON)のパス
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    /// デバッグログを出力
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// XMLアノテーションからパッチを切り出して data/{train,val}/{live,dead} に保存
    Preprocess {
        #[arg(long)]
        original_dir: Option<PathBuf>,
        #[arg(long)]
        output_root: Option<PathBuf>,
        #[arg(long)]
        train_ratio: Option<f64>,
        #[arg(long)]
        patch_size: Option<u32>,
        /// 分割シャッフルのシード（省略時は毎回ランダム）
        #[arg(long)]
        seed: Option<u64>,
        /// 集計結果をJSONで保存
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// パッチデータセットでCNNを学習
    #[cfg(feature = "ml")]
    Train {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long, value_enum)]
        device: Option<DeviceArg>,
    },
    /// 1枚の画像を live/dead に分類
    #[cfg(feature = "ml")]
    Predict {
        image: PathBuf,
        #[arg(long)]
        model: Option<PathBuf>,
        /// 推論時の画素スケーリング
        #[arg(long, value_enum)]
        scaling: Option<ScalingArg>,
        #[arg(long, value_enum)]
        device: Option<DeviceArg>,
    },
    /// モデルのメタデータを表示
    Info {
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// 有効な設定を表示
    Config {
        /// 表示した設定を --config のパスに書き出す
        #[arg(long)]
        save: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    Wgpu,
    Cpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Wgpu => DeviceType::Wgpu,
            DeviceArg::Cpu => DeviceType::Cpu,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ScalingArg {
    Raw,
    UnitRange,
}

impl From<ScalingArg> for InputScaling {
    fn from(arg: ScalingArg) -> Self {
        match arg {
            ScalingArg::Raw => InputScaling::Raw,
            ScalingArg::UnitRange => InputScaling::UnitRange,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("ldc_classifier={level},warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_target(false))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = AppConfig::load_or_default(&cli.config);

    match cli.command {
        Command::Preprocess {
            original_dir,
            output_root,
            train_ratio,
            patch_size,
            seed,
            report,
        } => {
            let settings = &mut config.preprocess;
            if let Some(dir) = original_dir {
                settings.original_dir = dir;
            }
            if let Some(root) = output_root {
                settings.output_root = root;
            }
            if let Some(ratio) = train_ratio {
                settings.train_ratio = ratio;
            }
            if let Some(size) = patch_size {
                settings.patch_size = size;
            }
            if seed.is_some() {
                settings.seed = seed;
            }

            let result = run_preprocess(settings)?;
            if let Some(report_path) = report {
                result.write_json(&report_path)?;
                tracing::info!("レポートを保存しました: {}", report_path.display());
            }
            println!(
                "Patches written to: {}/train and {}/val",
                settings.output_root.display(),
                settings.output_root.display()
            );
        }
        #[cfg(feature = "ml")]
        Command::Train {
            data_dir,
            model,
            epochs,
            batch_size,
            learning_rate,
            device,
        } => {
            if let Some(dir) = data_dir {
                config.training.data_dir = dir;
            }
            if let Some(path) = model {
                config.model.model_path = path;
            }
            if let Some(n) = epochs {
                config.training.num_epochs = n;
            }
            if let Some(n) = batch_size {
                config.training.batch_size = n;
            }
            if let Some(lr) = learning_rate {
                config.training.learning_rate = lr;
            }
            if let Some(device) = device {
                config.device_type = device.into();
            }
            config.validate()?;

            let request = ldc_classifier::ml::TrainingRequest::from_config(&config);
            let summary = ldc_classifier::ml::train_model(&request)?;
            println!("Model saved to: {}", summary.model_path.display());
        }
        #[cfg(feature = "ml")]
        Command::Predict {
            image,
            model,
            scaling,
            device,
        } => {
            use ldc_classifier::BinaryClassifier;

            let model_path = artifact_path(&model.unwrap_or(config.model.model_path));
            let scaling = scaling.map(Into::into).unwrap_or(config.inference.input_scaling);
            let device = device.map(Into::into).unwrap_or(config.device_type);

            let engine = ldc_classifier::ml::InferenceEngine::load(&model_path, device, scaling)?;
            if cli.verbose {
                engine.config().print_info();
            }
            let prediction = engine.classify_path(&image)?;
            ldc_classifier::print_prediction(&image, &prediction);
        }
        Command::Info { model } => {
            let model_path = artifact_path(&model.unwrap_or(config.model.model_path));
            let metadata = ldc_classifier::model::load_metadata(&model_path)?;
            ldc_classifier::model::print_metadata_info(&metadata);
        }
        Command::Config { save } => {
            config.display();
            if save {
                config.save(&cli.config)?;
                println!("Config saved to: {}", cli.config.display());
            }
        }
    }

    Ok(())
}
