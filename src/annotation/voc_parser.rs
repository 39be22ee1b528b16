//! Pascal VOC 形式のアノテーションXMLの読み込み
//!
//! ルート要素の下に任意の `<filename>` と、0個以上の `<object>` を持つ。
//! 各 `<object>` は `<name>` と `<bndbox>{xmin,ymin,xmax,ymax}` を持つ。
//! `<size>` や `<folder>` などその他の要素は無視する。

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::error::{PreprocessError, PreprocessResult};
use crate::types::{BoundingBox, CellClass};

#[derive(Debug, Deserialize)]
struct VocAnnotation {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default, rename = "object")]
    objects: Vec<VocObject>,
}

#[derive(Debug, Deserialize)]
struct VocObject {
    #[serde(default)]
    name: Option<String>,
    bndbox: VocBndBox,
}

#[derive(Debug, Deserialize)]
struct VocBndBox {
    #[serde(deserialize_with = "finite_coord")]
    xmin: f64,
    #[serde(deserialize_with = "finite_coord")]
    ymin: f64,
    #[serde(deserialize_with = "finite_coord")]
    xmax: f64,
    #[serde(deserialize_with = "finite_coord")]
    ymax: f64,
}

/// NaN・無限大の座標は解析エラーにする
fn finite_coord<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(serde::de::Error::custom(format!("座標が有限値ではありません: {}", value)))
    }
}

/// オブジェクトのラベル分類結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectLabel {
    Class(CellClass),
    /// "living" も "dead" も含まないラベル。エラーではなく単に除外する
    Excluded,
}

/// ラベル文字列を分類する（大文字小文字を区別しない部分一致）
///
/// "living" を先に判定するため、両方を含む場合は live になる。
pub fn classify_label(raw_label: &str) -> ObjectLabel {
    let name = raw_label.trim().to_lowercase();
    if name.contains("living") {
        ObjectLabel::Class(CellClass::Live)
    } else if name.contains("dead") {
        ObjectLabel::Class(CellClass::Dead)
    } else {
        ObjectLabel::Excluded
    }
}

/// アノテーション内の1オブジェクト
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedObject {
    pub raw_label: String,
    pub bounding_box: BoundingBox,
}

impl AnnotatedObject {
    pub fn label(&self) -> ObjectLabel {
        classify_label(&self.raw_label)
    }
}

/// 1つのXMLファイルを解析した結果
#[derive(Debug, Clone)]
pub struct AnnotationDocument {
    /// XMLファイル自身のパス
    pub source_path: PathBuf,
    /// 出力ファイル名に使う stem
    pub source_stem: String,
    /// 対応する画像のパス（存在確認はまだしていない）
    pub image_path: PathBuf,
    pub objects: Vec<AnnotatedObject>,
}

impl AnnotationDocument {
    /// 対応画像を読み込んでRGBに変換する
    pub fn load_image(&self) -> PreprocessResult<image::RgbImage> {
        if !self.image_path.exists() {
            return Err(PreprocessError::MissingImage {
                annotation: self.source_path.clone(),
                image: self.image_path.clone(),
            });
        }
        let img = image::open(&self.image_path).map_err(|source| PreprocessError::ImageDecode {
            path: self.image_path.clone(),
            source,
        })?;
        Ok(img.to_rgb8())
    }

    /// 分類可能なオブジェクトとそのクラス
    pub fn labeled_objects(&self) -> impl Iterator<Item = (&AnnotatedObject, CellClass)> {
        self.objects.iter().filter_map(|obj| match obj.label() {
            ObjectLabel::Class(class) => Some((obj, class)),
            ObjectLabel::Excluded => None,
        })
    }

    pub fn excluded_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|obj| obj.label() == ObjectLabel::Excluded)
            .count()
    }
}

/// XMLファイルを読み込んで解析
///
/// UTF-8 のみ対応。他のエンコーディングは `AnnotationRead` としてスキップされる。
pub fn parse_annotation(path: &Path, image_extension: &str) -> PreprocessResult<AnnotationDocument> {
    let content = std::fs::read_to_string(path).map_err(|source| PreprocessError::AnnotationRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_annotation_str(path, &content, image_extension)
}

/// XML文字列を解析（`path` は画像パス解決とエラー表示に使う）
pub fn parse_annotation_str(
    path: &Path,
    content: &str,
    image_extension: &str,
) -> PreprocessResult<AnnotationDocument> {
    let voc: VocAnnotation =
        quick_xml::de::from_str(content).map_err(|source| PreprocessError::AnnotationParse {
            path: path.to_path_buf(),
            source,
        })?;

    let image_path = resolve_image_path(path, voc.filename.as_deref(), image_extension);

    let source_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let objects = voc
        .objects
        .into_iter()
        .map(|obj| AnnotatedObject {
            raw_label: obj.name.unwrap_or_default(),
            bounding_box: BoundingBox::from_float_coords(
                obj.bndbox.xmin,
                obj.bndbox.ymin,
                obj.bndbox.xmax,
                obj.bndbox.ymax,
            ),
        })
        .collect();

    Ok(AnnotationDocument {
        source_path: path.to_path_buf(),
        source_stem,
        image_path,
        objects,
    })
}

/// `<filename>` があればXMLと同じディレクトリから、無ければ拡張子を差し替えたパス
fn resolve_image_path(xml_path: &Path, filename: Option<&str>, image_extension: &str) -> PathBuf {
    match filename.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => {
            let base_dir = xml_path.parent().unwrap_or_else(|| Path::new(""));
            base_dir.join(name)
        }
        None => xml_path.with_extension(image_extension.trim_start_matches('.')),
    }
}
