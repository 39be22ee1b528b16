//! 前処理(ETL)のエラー分類

use std::path::PathBuf;
use thiserror::Error;

use crate::types::BoundingBox;

pub type PreprocessResult<T> = Result<T, PreprocessError>;

/// 前処理のエラー
///
/// ドキュメント単位のエラーは回復可能（ログを出してスキップ）。
/// 書き込みエラーと設定エラーは致命的で実行を中断する。
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("XMLを解析できません {path}: {source}")]
    AnnotationParse {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("アノテーションを読み込めません {path}: {source}")]
    AnnotationRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("画像が見つかりません {annotation}: {image}")]
    MissingImage { annotation: PathBuf, image: PathBuf },
    #[error("画像を開けません {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("入力ディレクトリを読めません {path}: {source}")]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("空のバウンディングボックス {bbox:?}")]
    DegenerateBox { bbox: BoundingBox },
    #[error("バウンディングボックスが大きすぎます {bbox:?} (上限 {max_pixels} ピクセル)")]
    OversizedBox { bbox: BoundingBox, max_pixels: u64 },
    #[error("書き込みに失敗しました {path}: {reason}")]
    IoWrite { path: PathBuf, reason: String },
    #[error("設定が不正です: {0}")]
    InvalidConfig(String),
}

impl PreprocessError {
    /// ドキュメント（またはオブジェクト）単位でスキップして続行できるか
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PreprocessError::AnnotationParse { .. }
                | PreprocessError::AnnotationRead { .. }
                | PreprocessError::MissingImage { .. }
                | PreprocessError::ImageDecode { .. }
                | PreprocessError::DegenerateBox { .. }
                | PreprocessError::OversizedBox { .. }
        )
    }

    /// レポート用の短い分類名
    pub fn kind(&self) -> &'static str {
        match self {
            PreprocessError::AnnotationParse { .. } => "annotation_parse",
            PreprocessError::AnnotationRead { .. } => "annotation_read",
            PreprocessError::MissingImage { .. } => "missing_image",
            PreprocessError::ImageDecode { .. } => "image_decode",
            PreprocessError::InputDir { .. } => "input_dir",
            PreprocessError::DegenerateBox { .. } => "degenerate_box",
            PreprocessError::OversizedBox { .. } => "oversized_box",
            PreprocessError::IoWrite { .. } => "io_write",
            PreprocessError::InvalidConfig(_) => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_split() {
        let missing = PreprocessError::MissingImage {
            annotation: PathBuf::from("a.xml"),
            image: PathBuf::from("a.png"),
        };
        assert!(missing.is_recoverable());

        let write = PreprocessError::IoWrite {
            path: PathBuf::from("out.png"),
            reason: "disk full".to_string(),
        };
        assert!(!write.is_recoverable());
        assert!(!PreprocessError::InvalidConfig("ratio".into()).is_recoverable());
    }
}
