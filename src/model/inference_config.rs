//! モデルメタデータから推論に必要な情報を取り出す

use anyhow::Result;

use crate::model::config::InputScaling;
use crate::model::model_metadata::ModelMetadata;
use crate::types::CellClass;

/// 推論設定
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// クラス名（モデル出力のインデックス順）
    pub class_names: Vec<String>,
    /// モデル入力解像度
    pub image_size: u32,
    /// 学習時の画素スケーリング
    pub training_input_scaling: InputScaling,
    /// 推論時に実際に使う画素スケーリング
    pub input_scaling: InputScaling,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata, input_scaling: InputScaling) -> Self {
        Self {
            class_names: metadata.class_names.clone(),
            image_size: metadata.image_size,
            training_input_scaling: metadata.training_input_scaling,
            input_scaling,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// "live" の出力インデックス
    pub fn live_index(&self) -> Result<usize> {
        self.class_names
            .iter()
            .position(|c| c == CellClass::Live.as_str())
            .ok_or_else(|| anyhow::anyhow!("モデルに live クラスがありません: {:?}", self.class_names))
    }

    /// 学習時と推論時で前処理が異なるか
    pub fn has_scaling_mismatch(&self) -> bool {
        self.input_scaling != self.training_input_scaling
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("クラス: {}", self.class_names.join(", "));
        println!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        println!("学習時スケーリング: {}", self.training_input_scaling);
        println!("推論時スケーリング: {}", self.input_scaling);
        println!("==================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(
            vec!["dead".to_string(), "live".to_string()],
            128,
            InputScaling::UnitRange,
            0.5,
            15,
            32,
            1e-3,
        )
    }

    #[test]
    fn test_mismatch_flag() {
        let raw = InferenceConfig::from_metadata(&metadata(), InputScaling::Raw);
        assert!(raw.has_scaling_mismatch());

        let symmetric = InferenceConfig::from_metadata(&metadata(), InputScaling::UnitRange);
        assert!(!symmetric.has_scaling_mismatch());
    }

    #[test]
    fn test_class_lookup() {
        let config = InferenceConfig::from_metadata(&metadata(), InputScaling::Raw);
        assert_eq!(config.live_index().unwrap(), 1);
        assert_eq!(config.num_classes(), 2);
    }

    #[test]
    fn test_missing_live_class() {
        let mut meta = metadata();
        meta.class_names = vec!["a".to_string(), "b".to_string()];
        let config = InferenceConfig::from_metadata(&meta, InputScaling::Raw);
        assert!(config.live_index().is_err());
    }
}
