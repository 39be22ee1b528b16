//! モデル推論機能

use anyhow::Result;
use burn::{
    backend::Wgpu,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use image::imageops::FilterType;
use image::RgbImage;
use std::path::Path;

use crate::classifier::BinaryClassifier;
use crate::ml::ml_model::{fit_to_size, image_to_chw, CellClassifier, ModelConfig};
use crate::model::config::{DeviceType, InputScaling, MIN_PATCH_SIZE};
use crate::model::{load_model_with_metadata, InferenceConfig};

/// 推論エンジン
pub enum InferenceEngine {
    Wgpu {
        model: CellClassifier<Wgpu>,
        config: InferenceConfig,
        device: WgpuDevice,
    },
    NdArray {
        model: CellClassifier<NdArray<f32>>,
        config: InferenceConfig,
        device: NdArrayDevice,
    },
}

/// バイト列から重みを復元したモデルを作る
fn restore_model<B: Backend>(
    config: &InferenceConfig,
    model_binary: Vec<u8>,
    device: &B::Device,
) -> Result<CellClassifier<B>> {
    if config.image_size < MIN_PATCH_SIZE {
        anyhow::bail!(
            "メタデータの入力サイズが小さすぎます: {} (最小{})",
            config.image_size,
            MIN_PATCH_SIZE
        );
    }

    // 推論時はドロップアウトなし
    let model_config = ModelConfig::new()
        .with_num_classes(config.num_classes())
        .with_dropout(0.0)
        .with_image_size(config.image_size as usize);
    let model = model_config.init::<B>(device);

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = Recorder::<B>::load(&recorder, model_binary, device)
        .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

    Ok(model.load_record(record))
}

/// 1枚の画像の P(live) を計算
fn live_probability<B: Backend>(
    model: &CellClassifier<B>,
    config: &InferenceConfig,
    device: &B::Device,
    image: &RgbImage,
) -> Result<f32> {
    let size = config.image_size as usize;
    // 単一画像の読み込みは最近傍でリサイズする
    let resized = fit_to_size(image, size, FilterType::Nearest);
    let data = image_to_chw(&resized, config.input_scaling);

    let tensor = Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([1, 3, size, size]);
    let probs = model
        .class_probability(tensor, config.live_index()?)
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

    probs
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))
}

impl InferenceEngine {
    /// モデルを読み込んで推論エンジンを初期化
    ///
    /// `input_scaling` が学習時のスケーリングと異なる場合は警告を出す。
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        device_type: DeviceType,
        input_scaling: InputScaling,
    ) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let config = InferenceConfig::from_metadata(&metadata, input_scaling);
        config.live_index()?;

        if config.has_scaling_mismatch() {
            tracing::warn!(
                "推論時の画素スケーリング ({}) が学習時 ({}) と異なります。確率が偏る可能性があります",
                config.input_scaling,
                config.training_input_scaling
            );
        }

        let engine = match device_type {
            DeviceType::Wgpu => {
                let device = WgpuDevice::default();
                let model = restore_model::<Wgpu>(&config, model_binary, &device)?;
                InferenceEngine::Wgpu { model, config, device }
            }
            DeviceType::Cpu => {
                let device = NdArrayDevice::Cpu;
                let model = restore_model::<NdArray<f32>>(&config, model_binary, &device)?;
                InferenceEngine::NdArray { model, config, device }
            }
        };
        Ok(engine)
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        match self {
            InferenceEngine::Wgpu { config, .. } => config,
            InferenceEngine::NdArray { config, .. } => config,
        }
    }
}

impl BinaryClassifier for InferenceEngine {
    fn predict_probability(&self, image: &RgbImage) -> Result<f32> {
        match self {
            InferenceEngine::Wgpu { model, config, device } => {
                live_probability(model, config, device, image)
            }
            InferenceEngine::NdArray { model, config, device } => {
                live_probability(model, config, device, image)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::training::record_to_bytes;
    use crate::model::{save_model_with_metadata, ModelMetadata};
    use crate::types::CellClass;

    fn write_untrained_model(path: &Path, image_size: usize) {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new()
            .with_image_size(image_size)
            .init::<NdArray<f32>>(&device);
        let binary = record_to_bytes(model).unwrap();
        let metadata = ModelMetadata::new(
            vec!["dead".to_string(), "live".to_string()],
            image_size as u32,
            InputScaling::UnitRange,
            0.5,
            1,
            4,
            1e-3,
        );
        save_model_with_metadata(path, &metadata, &binary).unwrap();
    }

    #[test]
    fn test_load_and_classify_on_cpu() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.tar.gz");
        write_untrained_model(&model_path, 32);

        let engine = InferenceEngine::load(&model_path, DeviceType::Cpu, InputScaling::UnitRange).unwrap();
        assert!(!engine.config().has_scaling_mismatch());

        // モデルと異なるサイズの画像もリサイズされる
        let image = RgbImage::from_pixel(50, 40, image::Rgb([120, 60, 200]));
        let p = engine.predict_probability(&image).unwrap();
        assert!((0.0..=1.0).contains(&p));

        let prediction = engine.classify(&image).unwrap();
        assert!(prediction.class == CellClass::Live || prediction.class == CellClass::Dead);
        assert!(prediction.confidence >= 0.5 && prediction.confidence <= 1.0);
    }

    #[test]
    fn test_raw_scaling_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.tar.gz");
        write_untrained_model(&model_path, 24);

        let engine = InferenceEngine::load(&model_path, DeviceType::Cpu, InputScaling::Raw).unwrap();
        assert!(engine.config().has_scaling_mismatch());
        let p = engine
            .predict_probability(&RgbImage::from_pixel(24, 24, image::Rgb([255, 255, 255])))
            .unwrap();
        assert!((0.0..=1.0).contains(&p));
    }
}
