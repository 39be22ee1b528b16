//! 顕微鏡画像の live/dead 細胞分類
//!
//! - `annotation`: Pascal VOC 形式XMLの解析
//! - `dataset`: パッチ切り出し・train/val 分割・保存
//! - `model`: 設定とモデルアーティファクトの永続化
//! - `ml`: burn による CNN の学習と推論

#![recursion_limit = "256"]

pub mod types;
pub mod error;
pub mod annotation;
pub mod dataset;
pub mod model;
pub mod classifier;
#[cfg(feature = "ml")]
pub mod ml;

pub use classifier::{print_prediction, BinaryClassifier};
pub use error::{PreprocessError, PreprocessResult};
pub use types::{BoundingBox, CellClass, Prediction, Split};
