//! モデル学習
//!
//! `<data_dir>/{train,val}/<class>/*.png` のディレクトリ構成をそのまま読み込み、
//! クラス名はサブディレクトリ名のアルファベット順でインデックスを割り当てる。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    backend::{Autodiff, Wgpu},
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    data::dataset::Dataset,
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use image::imageops::FilterType;

use crate::ml::ml_model::{load_image_data, CellClassifier, ModelConfig, NUM_CLASSES};
use crate::model::config::{AppConfig, DeviceType, InputScaling, MIN_PATCH_SIZE};
use crate::model::{save_model_with_metadata, ModelMetadata};
use crate::types::{CellClass, Split};

/// 学習時の画素スケーリング（[0,1] に正規化）
pub const TRAINING_INPUT_SCALING: InputScaling = InputScaling::UnitRange;

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "png" || ext == "jpg" || ext == "jpeg"
            })
            .unwrap_or(false)
}

/// 学習データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct PatchDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
}

impl PatchDataset {
    /// サブディレクトリ名をクラスとしてディレクトリから読み込む
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(data_dir)
            .context(format!("データセットディレクトリを読めません: {}", data_dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", path.display()))?;
                class_names.push(name.to_string());
            }
        }
        class_names.sort();
        Self::from_directory_with_order(data_dir, &class_names)
    }

    /// 指定された順序でクラスIDを割り当てて読み込む
    pub fn from_directory_with_order(data_dir: &Path, class_order: &[String]) -> Result<Self> {
        let mut samples = Vec::new();
        for (class_id, class_name) in class_order.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.exists() {
                continue;
            }
            let mut paths: Vec<PathBuf> = std::fs::read_dir(&class_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect();
            paths.sort();
            samples.extend(paths.into_iter().map(|p| (p, class_id)));
        }

        Ok(Self {
            samples,
            class_names: class_order.to_vec(),
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.class_names.iter().position(|c| c == name)
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn class_count(&self, class_id: usize) -> usize {
        self.samples.iter().filter(|(_, id)| *id == class_id).count()
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct PatchItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<PatchItem> for PatchDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        let (path, label) = self.samples.get(index)?;
        Some(PatchItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct PatchBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
    scaling: InputScaling,
}

impl<B: Backend> PatchBatcher<B> {
    pub fn new(device: B::Device, image_size: usize, scaling: InputScaling) -> Self {
        Self {
            device,
            image_size,
            scaling,
        }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct PatchBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher<B> {
    fn batch(&self, items: Vec<PatchItem>, _device: &B::Device) -> PatchBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            match load_image_data(&item.path, size, self.scaling, FilterType::Triangle) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    // 読めない画像はゼロで埋めてバッチの形を保つ
                    tracing::warn!("画像読み込み失敗 {}: {}", item.path.display(), e);
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        PatchBatch { images, targets }
    }
}

impl<B: AutodiffBackend> TrainStep<PatchBatch<B>, ClassificationOutput<B>> for CellClassifier<B> {
    fn step(&self, batch: PatchBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<PatchBatch<B>, ClassificationOutput<B>> for CellClassifier<B> {
    fn step(&self, batch: PatchBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習の入力
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    pub data_dir: PathBuf,
    pub output_model_path: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub dropout: f64,
    pub device: DeviceType,
}

impl TrainingRequest {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            data_dir: config.training.data_dir.clone(),
            output_model_path: config.model.model_path.clone(),
            num_epochs: config.training.num_epochs,
            batch_size: config.training.batch_size,
            learning_rate: config.training.learning_rate,
            seed: config.training.seed,
            dropout: config.model.dropout,
            device: config.device_type,
        }
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub model_path: PathBuf,
    pub metadata: ModelMetadata,
}

/// 学習前の検証で得られた情報
#[derive(Debug, Clone)]
pub struct DatasetCheck {
    pub image_size: u32,
    pub train_samples: usize,
    pub val_samples: usize,
}

/// train/val の各クラスディレクトリを検証し、画像サイズを決定する
///
/// 各クラスの先頭1枚のみサイズを確認する。
pub fn validate_dataset(data_dir: &Path) -> Result<DatasetCheck> {
    let mut empty_dirs = Vec::new();
    let mut sizes: Vec<(PathBuf, u32, u32)> = Vec::new();
    let mut counts = [0usize; 2];

    for (split_idx, split) in Split::ALL.iter().enumerate() {
        for class in CellClass::ALL {
            let class_dir = data_dir.join(split.as_str()).join(class.as_str());
            if !class_dir.is_dir() {
                empty_dirs.push(format!("{}/{} (存在しません)", split, class));
                continue;
            }

            let mut images: Vec<PathBuf> = std::fs::read_dir(&class_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_file(p))
                .collect();
            images.sort();

            tracing::info!("  {}/{}: {} 枚", split, class, images.len());
            if images.is_empty() {
                empty_dirs.push(format!("{}/{}", split, class));
                continue;
            }
            counts[split_idx] += images.len();

            let (w, h) = image::image_dimensions(&images[0])
                .context(format!("画像サイズを取得できません: {}", images[0].display()))?;
            sizes.push((images[0].clone(), w, h));
        }
    }

    if !empty_dirs.is_empty() {
        anyhow::bail!(
            "以下のクラスディレクトリに画像が1枚もありません: {}",
            empty_dirs.join(", ")
        );
    }

    let (_, width, height) = sizes[0].clone();
    let invalid: Vec<String> = sizes
        .iter()
        .filter(|(_, w, h)| *w != width || *h != height || w != h)
        .map(|(p, w, h)| format!("{}: {}x{}", p.display(), w, h))
        .collect();
    if !invalid.is_empty() || width != height {
        anyhow::bail!(
            "画像サイズが揃っていないか正方形ではありません (基準 {}x{}):\n{}",
            width,
            height,
            invalid.join("\n")
        );
    }
    if width < MIN_PATCH_SIZE {
        anyhow::bail!("画像サイズが小さすぎます: {}x{} (最小{})", width, height, MIN_PATCH_SIZE);
    }

    Ok(DatasetCheck {
        image_size: width,
        train_samples: counts[0],
        val_samples: counts[1],
    })
}

/// 指定バックエンドで学習し、推論用のモデルを返す
fn fit<B: AutodiffBackend>(
    request: &TrainingRequest,
    check: &DatasetCheck,
    device: B::Device,
) -> Result<(CellClassifier<B::InnerBackend>, Vec<String>)> {
    let image_size = check.image_size as usize;

    let dataset_train = PatchDataset::from_directory(&request.data_dir.join(Split::Train.as_str()))?;
    let dataset_val = PatchDataset::from_directory_with_order(
        &request.data_dir.join(Split::Val.as_str()),
        dataset_train.class_names(),
    )?;
    let class_names = dataset_train.class_names().to_vec();
    tracing::info!("検出クラス: {:?}", class_names);
    if class_names.len() != NUM_CLASSES {
        anyhow::bail!(
            "train/ 以下のクラスディレクトリは {} 個である必要があります: {:?}",
            NUM_CLASSES,
            class_names
        );
    }

    let model_config = ModelConfig::new()
        .with_num_classes(class_names.len())
        .with_dropout(request.dropout)
        .with_image_size(image_size);

    let batcher_train = PatchBatcher::<B>::new(device.clone(), image_size, TRAINING_INPUT_SCALING);
    let batcher_val =
        PatchBatcher::<B::InnerBackend>::new(device.clone(), image_size, TRAINING_INPUT_SCALING);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(request.batch_size)
        .shuffle(request.seed)
        .num_workers(0)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(request.batch_size)
        .num_workers(0)
        .build(dataset_val);

    let model = model_config.init::<B>(&device);

    // アーティファクトディレクトリ（学習ログ・メトリクス）
    let artifact_dir = std::env::temp_dir().join("ldc_classifier_training");
    std::fs::create_dir_all(&artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    tracing::info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        request.num_epochs,
        request.batch_size,
        request.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(request.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), request.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_val);

    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok((model_trained.model, class_names))
}

/// モデル学習を実行し、メタデータと共に保存する
pub fn train_model(request: &TrainingRequest) -> Result<TrainingSummary> {
    tracing::info!("学習データの検証を開始します: {}", request.data_dir.display());
    let check = validate_dataset(&request.data_dir)?;
    tracing::info!(
        "検証完了: 入力サイズ {}x{}, train {} 枚 / val {} 枚",
        check.image_size,
        check.image_size,
        check.train_samples,
        check.val_samples
    );

    tracing::info!("{} で学習を開始します", request.device);
    let (model_binary, class_names) = match request.device {
        DeviceType::Wgpu => {
            let (model, class_names) =
                fit::<Autodiff<Wgpu>>(request, &check, WgpuDevice::default())?;
            (record_to_bytes(model)?, class_names)
        }
        DeviceType::Cpu => {
            let (model, class_names) =
                fit::<Autodiff<NdArray<f32>>>(request, &check, NdArrayDevice::Cpu)?;
            (record_to_bytes(model)?, class_names)
        }
    };

    let metadata = ModelMetadata::new(
        class_names,
        check.image_size,
        TRAINING_INPUT_SCALING,
        request.dropout,
        request.num_epochs as u32,
        request.batch_size as u32,
        request.learning_rate,
    )
    .with_sample_counts(check.train_samples, check.val_samples);

    let model_path = save_model_with_metadata(&request.output_model_path, &metadata, &model_binary)?;
    tracing::info!(
        "モデルを保存しました: {} ({:.2} MB)",
        model_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    Ok(TrainingSummary {
        model_path,
        metadata,
    })
}

/// モデルの重みをバイト列にする（f32精度）
pub fn record_to_bytes<B: Backend>(model: CellClassifier<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの保存エラー: {:?}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_patches(root: &Path, split: &str, class: &str, count: usize, size: u32) {
        let dir = root.join(split).join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(size, size, Rgb([i as u8, 50, 50]))
                .save(dir.join(format!("p{}.png", i)))
                .unwrap();
        }
    }

    #[test]
    fn test_dataset_class_order_is_alphabetical() {
        let dir = tempfile::tempdir().unwrap();
        write_patches(dir.path(), "train", "live", 3, 24);
        write_patches(dir.path(), "train", "dead", 2, 24);

        let dataset = PatchDataset::from_directory(&dir.path().join("train")).unwrap();
        assert_eq!(dataset.class_names(), &["dead".to_string(), "live".to_string()]);
        assert_eq!(dataset.class_index("live"), Some(1));
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.class_count(0), 2);
        assert_eq!(dataset.class_count(1), 3);
        assert_eq!(dataset.get(0).unwrap().label, 0);
        assert!(dataset.get(5).is_none());
    }

    #[test]
    fn test_validate_dataset() {
        let dir = tempfile::tempdir().unwrap();
        for split in ["train", "val"] {
            for class in ["live", "dead"] {
                write_patches(dir.path(), split, class, 2, 32);
            }
        }
        let check = validate_dataset(dir.path()).unwrap();
        assert_eq!(check.image_size, 32);
        assert_eq!(check.train_samples, 4);
        assert_eq!(check.val_samples, 4);
    }

    #[test]
    fn test_validate_dataset_empty_class() {
        let dir = tempfile::tempdir().unwrap();
        write_patches(dir.path(), "train", "live", 2, 32);
        write_patches(dir.path(), "train", "dead", 2, 32);
        write_patches(dir.path(), "val", "live", 1, 32);
        std::fs::create_dir_all(dir.path().join("val").join("dead")).unwrap();

        let err = validate_dataset(dir.path()).unwrap_err();
        assert!(err.to_string().contains("val/dead"));
    }

    #[test]
    fn test_validate_dataset_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_patches(dir.path(), "train", "live", 1, 32);
        write_patches(dir.path(), "train", "dead", 1, 48);
        write_patches(dir.path(), "val", "live", 1, 32);
        write_patches(dir.path(), "val", "dead", 1, 32);

        assert!(validate_dataset(dir.path()).is_err());
    }

    #[test]
    fn test_train_save_and_classify_on_cpu() {
        use crate::classifier::BinaryClassifier;
        use crate::ml::inference::InferenceEngine;

        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        for split in ["train", "val"] {
            for class in ["live", "dead"] {
                write_patches(&data_dir, split, class, 2, 24);
            }
        }

        let request = TrainingRequest {
            data_dir: data_dir.clone(),
            output_model_path: dir.path().join("models/tiny"),
            num_epochs: 1,
            batch_size: 4,
            learning_rate: 1e-3,
            seed: 7,
            dropout: 0.5,
            device: DeviceType::Cpu,
        };
        let summary = train_model(&request).unwrap();

        assert!(summary.model_path.ends_with("models/tiny.tar.gz"));
        assert!(summary.model_path.exists());
        assert_eq!(summary.metadata.class_names, vec!["dead", "live"]);
        assert_eq!(summary.metadata.image_size, 24);
        assert_eq!(summary.metadata.train_samples, 4);
        assert_eq!(summary.metadata.val_samples, 4);

        let engine =
            InferenceEngine::load(&summary.model_path, DeviceType::Cpu, InputScaling::UnitRange).unwrap();
        let prediction = engine
            .classify_path(&data_dir.join("val/live/p0.png"))
            .unwrap();
        assert!(prediction.class == CellClass::Live || prediction.class == CellClass::Dead);
        assert!(prediction.confidence >= 0.5 && prediction.confidence <= 1.0);
    }

    #[test]
    fn test_extra_class_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        for split in ["train", "val"] {
            for class in ["live", "dead"] {
                write_patches(&data_dir, split, class, 1, 24);
            }
        }
        write_patches(&data_dir, "train", "debris", 1, 24);

        let request = TrainingRequest {
            data_dir,
            output_model_path: dir.path().join("model"),
            num_epochs: 1,
            batch_size: 2,
            learning_rate: 1e-3,
            seed: 1,
            dropout: 0.5,
            device: DeviceType::Cpu,
        };
        let err = train_model(&request).unwrap_err();
        assert!(err.to_string().contains("debris"));
        assert!(!dir.path().join("model.tar.gz").exists());
    }

    #[test]
    fn test_batcher_shapes_and_scaling() {
        type B = NdArray<f32>;
        let dir = tempfile::tempdir().unwrap();
        write_patches(dir.path(), "train", "live", 2, 24);
        write_patches(dir.path(), "train", "dead", 1, 24);

        let dataset = PatchDataset::from_directory(&dir.path().join("train")).unwrap();
        let items: Vec<PatchItem> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();

        let device = NdArrayDevice::Cpu;
        let batcher = PatchBatcher::<B>::new(device.clone(), 24, TRAINING_INPUT_SCALING);
        let batch = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 24, 24]);
        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1, 1]);

        let max = batch.images.max().into_scalar();
        assert!(max <= 1.0);
    }
}
