//! アノテーション付き顕微鏡画像からパッチデータセットを作る前処理
//!
//! 処理の流れ:
//! 1. 入力ディレクトリの `*.xml` を列挙（名前順）
//! 2. シャッフルして train/val を決定（解析前に一度だけ）
//! 3. 各XMLを解析し、画像を読み込み、オブジェクトごとにパッチを切り出して保存
//!
//! ドキュメント単位のエラーはログを出してスキップし、書き込みエラーのみ実行を中断する。

use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::annotation::parse_annotation;
use crate::dataset::dataset_writer::DatasetWriter;
use crate::dataset::patch_extractor::{BoxPlacement, PatchExtractor};
use crate::dataset::split_assigner::{rng_from_seed, SplitAssigner};
use crate::error::{PreprocessError, PreprocessResult};
use crate::model::config::PreprocessSettings;
use crate::types::{CellClass, Split};

/// 1ドキュメントの処理結果
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub annotation: PathBuf,
    pub split: Split,
    /// 書き込んだパッチ
    pub patches: Vec<PathBuf>,
    /// スキップした場合の分類名と理由
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkipReason {
    pub kind: String,
    pub message: String,
}

/// 前処理の集計
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreprocessReport {
    pub documents_found: usize,
    pub documents: Vec<DocumentRecord>,
    /// "living"/"dead" を含まないため除外したオブジェクト数
    pub excluded_objects: usize,
    /// 幅・高さが0以下で切り出せなかったボックス数
    pub degenerate_boxes: usize,
    /// 画像外にはみ出して黒で埋めたボックス数
    pub out_of_bounds_boxes: usize,
    /// 大きすぎて切り出さなかったボックス数
    pub oversized_boxes: usize,
}

impl PreprocessReport {
    pub fn documents_processed(&self) -> usize {
        self.documents.iter().filter(|d| d.skipped.is_none()).count()
    }

    pub fn documents_skipped(&self) -> usize {
        self.documents.iter().filter(|d| d.skipped.is_some()).count()
    }

    pub fn total_patches(&self) -> usize {
        self.documents.iter().map(|d| d.patches.len()).sum()
    }

    /// split×class ごとのパッチ数
    pub fn patch_count(&self, split: Split, class: CellClass) -> usize {
        let dir_name = class.as_str();
        self.documents
            .iter()
            .filter(|d| d.split == split)
            .flat_map(|d| d.patches.iter())
            .filter(|p| {
                p.parent()
                    .and_then(|parent| parent.file_name())
                    .map(|n| n == dir_name)
                    .unwrap_or(false)
            })
            .count()
    }

    /// JSONとして保存
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).context(format!("Failed to write report: {:?}", path))?;
        Ok(())
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "前処理完了: XML {} 件中 {} 件処理, {} 件スキップ",
            self.documents_found,
            self.documents_processed(),
            self.documents_skipped()
        );
        for split in Split::ALL {
            for class in CellClass::ALL {
                tracing::info!("  {}/{}: {} 枚", split, class, self.patch_count(split, class));
            }
        }
        if self.excluded_objects > 0 {
            tracing::info!("除外ラベルのオブジェクト: {} 個", self.excluded_objects);
        }
        if self.degenerate_boxes > 0 {
            tracing::warn!("切り出せないボックス: {} 個", self.degenerate_boxes);
        }
        if self.out_of_bounds_boxes > 0 {
            tracing::warn!("画像外にはみ出したボックス: {} 個", self.out_of_bounds_boxes);
        }
        if self.oversized_boxes > 0 {
            tracing::warn!("大きすぎるボックス: {} 個", self.oversized_boxes);
        }
    }
}

/// 前処理パイプライン
pub struct Preprocessor {
    settings: PreprocessSettings,
    extractor: PatchExtractor,
    assigner: SplitAssigner,
}

impl Preprocessor {
    pub fn new(settings: PreprocessSettings) -> PreprocessResult<Self> {
        settings.validate()?;
        let extractor = PatchExtractor::new(settings.patch_size);
        let assigner = SplitAssigner::new(settings.train_ratio)?;
        Ok(Self {
            settings,
            extractor,
            assigner,
        })
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// 入力ディレクトリ内のXMLを名前順で列挙
    pub fn discover(&self) -> PreprocessResult<Vec<PathBuf>> {
        let dir = &self.settings.original_dir;
        let entries = std::fs::read_dir(dir).map_err(|source| PreprocessError::InputDir {
            path: dir.clone(),
            source,
        })?;

        let mut xml_files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PreprocessError::InputDir {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() {
                if let Some(ext) = path.extension() {
                    if ext.to_string_lossy().eq_ignore_ascii_case("xml") {
                        xml_files.push(path);
                    }
                }
            }
        }
        xml_files.sort();
        Ok(xml_files)
    }

    /// 設定のシードで乱数源を作って実行
    pub fn run(&self) -> PreprocessResult<PreprocessReport> {
        let mut rng = rng_from_seed(self.settings.seed);
        self.run_with_rng(&mut rng)
    }

    /// 乱数源を指定して実行
    pub fn run_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> PreprocessResult<PreprocessReport> {
        let writer = DatasetWriter::create(&self.settings.output_root)?;

        let xml_files = self.discover()?;
        tracing::info!("XMLファイル数: {}", xml_files.len());

        let assignment = self.assigner.assign(xml_files, rng);
        tracing::info!(
            "分割: train {} 件 / val {} 件 (ratio={})",
            assignment.count(Split::Train),
            assignment.count(Split::Val),
            self.assigner.train_ratio()
        );

        let mut report = PreprocessReport {
            documents_found: assignment.len(),
            ..Default::default()
        };

        for (xml_path, split) in assignment {
            let mut record = DocumentRecord {
                annotation: xml_path.clone(),
                split,
                patches: Vec::new(),
                skipped: None,
            };

            match self.process_document(&xml_path, split, &writer, &mut record, &mut report) {
                Ok(()) => {
                    tracing::debug!(
                        "{} -> {} ({} 枚)",
                        display_name(&xml_path),
                        split,
                        record.patches.len()
                    );
                }
                Err(e) if e.is_recoverable() => {
                    match &e {
                        PreprocessError::MissingImage { .. } => {
                            tracing::warn!("画像が見つからないためスキップ: {}: {}", display_name(&xml_path), e)
                        }
                        _ => tracing::error!("読み込めないためスキップ: {}: {}", display_name(&xml_path), e),
                    }
                    record.skipped = Some(SkipReason {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!("致命的なエラーのため中断します: {}", e);
                    return Err(e);
                }
            }

            report.documents.push(record);
        }

        Ok(report)
    }

    /// 1ドキュメントを処理する。エラー時に書き込み済みのパッチは record に残る
    fn process_document(
        &self,
        xml_path: &Path,
        split: Split,
        writer: &DatasetWriter,
        record: &mut DocumentRecord,
        report: &mut PreprocessReport,
    ) -> PreprocessResult<()> {
        let doc = parse_annotation(xml_path, &self.settings.image_extension)?;
        let img = doc.load_image()?;

        report.excluded_objects += doc.excluded_count();

        for (obj, class) in doc.labeled_objects() {
            let patch = match self.extractor.extract(&img, &obj.bounding_box) {
                Ok(patch) => patch,
                Err(e @ PreprocessError::DegenerateBox { .. }) => {
                    tracing::warn!("{}: {}", display_name(xml_path), e);
                    report.degenerate_boxes += 1;
                    continue;
                }
                Err(e @ PreprocessError::OversizedBox { .. }) => {
                    tracing::warn!("{}: {}", display_name(xml_path), e);
                    report.oversized_boxes += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if patch.placement == BoxPlacement::PartiallyOutside {
                tracing::warn!(
                    "{}: ボックス {:?} が画像 {}x{} の外にはみ出しています（黒で補完）",
                    display_name(xml_path),
                    obj.bounding_box,
                    img.width(),
                    img.height()
                );
                report.out_of_bounds_boxes += 1;
            }

            let path = writer.write_patch(split, class, &doc.source_stem, &obj.bounding_box, &patch.image)?;
            record.patches.push(path);
        }

        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// 設定からパイプラインを組み立てて実行する
pub fn run_preprocess(settings: &PreprocessSettings) -> PreprocessResult<PreprocessReport> {
    let preprocessor = Preprocessor::new(settings.clone())?;
    let report = preprocessor.run()?;
    report.log_summary();
    Ok(report)
}
