//! モデルメタデータの定義
//!
//! 学習時の前提（クラス順・入力サイズ・画素スケーリング）を記録し、
//! 推論時に同じ前提でモデルを復元できるようにする。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::config::InputScaling;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラス名（インデックス順）。ディレクトリ名のアルファベット順で ["dead", "live"]
    pub class_names: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: u32,

    /// 学習時の画素スケーリング
    pub training_input_scaling: InputScaling,

    /// ドロップアウト率
    pub dropout: f64,

    pub num_epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,

    /// 学習/検証サンプル数
    #[serde(default)]
    pub train_samples: usize,
    #[serde(default)]
    pub val_samples: usize,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 学習時刻を現在時刻にしてメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        image_size: u32,
        training_input_scaling: InputScaling,
        dropout: f64,
        num_epochs: u32,
        batch_size: u32,
        learning_rate: f64,
    ) -> Self {
        Self {
            class_names,
            image_size,
            training_input_scaling,
            dropout,
            num_epochs,
            batch_size,
            learning_rate,
            train_samples: 0,
            val_samples: 0,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn with_sample_counts(mut self, train_samples: usize, val_samples: usize) -> Self {
        self.train_samples = train_samples;
        self.val_samples = val_samples;
        self
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
