//! アプリケーション設定管理モジュール
//!
//! 前処理・学習・推論の設定をJSON形式で保存・読み込みします。
//! 各コンポーネントはグローバル定数ではなく、ここで組み立てた設定を受け取ります。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PreprocessError;

/// CNNが受け付ける最小入力サイズ（Conv/Pool 3段で特徴マップが残るサイズ）
pub const MIN_PATCH_SIZE: u32 = 22;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 画素値のスケーリング
///
/// 学習時は [0,1] に正規化する。推論時の既定値は生の 0..=255 のまま
/// （学習と非対称。推論エンジンが警告を出す）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InputScaling {
    /// 0..=255 をそのまま入力
    #[default]
    Raw,
    /// 1/255 倍して [0,1] に正規化
    UnitRange,
}

impl InputScaling {
    pub fn apply(&self, value: u8) -> f32 {
        match self {
            InputScaling::Raw => value as f32,
            InputScaling::UnitRange => value as f32 / 255.0,
        }
    }
}

impl std::fmt::Display for InputScaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputScaling::Raw => write!(f, "raw (0-255)"),
            InputScaling::UnitRange => write!(f, "unit-range (0-1)"),
        }
    }
}

/// 前処理（パッチ切り出し）設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    /// 画像とXMLが置かれたディレクトリ
    pub original_dir: PathBuf,
    /// パッチの出力先ルート
    pub output_root: PathBuf,
    /// 学習データの割合 (0, 1)
    pub train_ratio: f64,
    /// パッチサイズ（正方形、ピクセル）
    pub patch_size: u32,
    /// <filename> が無い場合に使う画像拡張子
    pub image_extension: String,
    /// 分割シャッフルのシード。None なら毎回ランダム
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            original_dir: PathBuf::from("Original Dataset"),
            output_root: PathBuf::from("data"),
            train_ratio: 0.8,
            patch_size: 128,
            image_extension: "png".to_string(),
            seed: None,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// train/ と val/ を含むデータセットディレクトリ
    pub data_dir: PathBuf,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// データローダーのシャッフル用シード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            num_epochs: 15,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルファイル(.tar.gz)のパス
    pub model_path: PathBuf,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ldc_live_dead.tar.gz"),
            dropout: 0.5,
        }
    }
}

/// 推論設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// 推論時の画素スケーリング
    #[serde(default)]
    pub input_scaling: InputScaling,
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub preprocess: PreprocessSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub inference: InferenceSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む。存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                tracing::info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の範囲を検証
    pub fn validate(&self) -> Result<(), PreprocessError> {
        self.preprocess.validate()?;
        if self.training.num_epochs == 0 {
            return Err(PreprocessError::InvalidConfig("num_epochs は1以上".to_string()));
        }
        if self.training.batch_size == 0 {
            return Err(PreprocessError::InvalidConfig("batch_size は1以上".to_string()));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(PreprocessError::InvalidConfig(format!(
                "dropout は [0, 1) の範囲: {}",
                self.model.dropout
            )));
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("\n--- 前処理設定 ---");
        println!("元データ: {}", self.preprocess.original_dir.display());
        println!("出力先: {}", self.preprocess.output_root.display());
        println!("学習データ割合: {}", self.preprocess.train_ratio);
        println!("パッチサイズ: {}x{}", self.preprocess.patch_size, self.preprocess.patch_size);
        match self.preprocess.seed {
            Some(seed) => println!("シード: {}", seed),
            None => println!("シード: なし（毎回ランダム）"),
        }
        println!("\n--- トレーニング設定 ---");
        println!("データセット: {}", self.training.data_dir.display());
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("\n--- モデル・推論設定 ---");
        println!("モデルパス: {}", self.model.model_path.display());
        println!("ドロップアウト率: {}", self.model.dropout);
        println!("推論時スケーリング: {}", self.inference.input_scaling);
        println!("========================\n");
    }
}

impl PreprocessSettings {
    pub fn validate(&self) -> Result<(), PreprocessError> {
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(PreprocessError::InvalidConfig(format!(
                "train_ratio は (0, 1) の範囲: {}",
                self.train_ratio
            )));
        }
        if self.patch_size < MIN_PATCH_SIZE {
            return Err(PreprocessError::InvalidConfig(format!(
                "patch_size が小さすぎます: {} (最小{})",
                self.patch_size, MIN_PATCH_SIZE
            )));
        }
        if self.image_extension.trim_start_matches('.').is_empty() {
            return Err(PreprocessError::InvalidConfig("image_extension が空です".to_string()));
        }
        Ok(())
    }
}
