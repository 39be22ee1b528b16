//! パッチを split/class 別のディレクトリへ保存する
//!
//! 出力構成:
//! ```text
//! <output_root>/{train,val}/{live,dead}/<stem>_<class>_<xmin>_<ymin>.png
//! ```

use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};

use crate::error::{PreprocessError, PreprocessResult};
use crate::types::{BoundingBox, CellClass, Split};

/// 出力ファイル名（同一ドキュメント内ではボックス原点で一意になる）
pub fn patch_file_name(stem: &str, class: CellClass, bbox: &BoundingBox) -> String {
    format!("{}_{}_{}_{}.png", stem, class, bbox.xmin, bbox.ymin)
}

/// データセット書き込み器
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    output_root: PathBuf,
}

impl DatasetWriter {
    /// 4つの split×class ディレクトリを事前に作成する（既存なら何もしない）
    pub fn create<P: AsRef<Path>>(output_root: P) -> PreprocessResult<Self> {
        let writer = Self {
            output_root: output_root.as_ref().to_path_buf(),
        };
        for split in Split::ALL {
            for class in CellClass::ALL {
                let dir = writer.class_dir(split, class);
                std::fs::create_dir_all(&dir).map_err(|e| PreprocessError::IoWrite {
                    path: dir.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(writer)
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn class_dir(&self, split: Split, class: CellClass) -> PathBuf {
        self.output_root.join(split.as_str()).join(class.as_str())
    }

    /// パッチを1枚保存し、書き込んだパスを返す
    ///
    /// 失敗は致命的エラーとして呼び出し元に伝播する（リトライしない）。
    pub fn write_patch(
        &self,
        split: Split,
        class: CellClass,
        stem: &str,
        bbox: &BoundingBox,
        patch: &RgbImage,
    ) -> PreprocessResult<PathBuf> {
        let path = self.class_dir(split, class).join(patch_file_name(stem, class, bbox));
        patch
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| PreprocessError::IoWrite {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(path)
    }
}
