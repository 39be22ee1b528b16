//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、入力サイズ、スケーリングなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先パス（.gz で終わらなければ .tar.gz を付ける）
pub fn artifact_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .context(format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存し、実際の保存先を返す
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = artifact_path(output_path);

    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

/// アーカイブを走査し、`wanted` に一致したエントリの中身を返す
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<Vec<(String, Vec<u8>)>> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut found = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().to_string();
        if wanted.contains(&name.as_str()) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found.push((name, buffer));
            if found.len() == wanted.len() {
                break;
            }
        }
    }
    Ok(found)
}

fn take_entry(entries: &mut Vec<(String, Vec<u8>)>, name: &str) -> Result<Vec<u8>> {
    let pos = entries
        .iter()
        .position(|(n, _)| n == name)
        .ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", name))?;
    Ok(entries.swap_remove(pos).1)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json_str = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json_str)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    parse_metadata(take_entry(&mut entries, METADATA_ENTRY)?)
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, MODEL_ENTRY])?;
    let metadata = parse_metadata(take_entry(&mut entries, METADATA_ENTRY)?)?;
    let binary = take_entry(&mut entries, MODEL_ENTRY)?;
    Ok((metadata, binary))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス: {}", metadata.class_names.join(", "));
    println!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!("学習時スケーリング: {}", metadata.training_input_scaling);
    println!("ドロップアウト率: {}", metadata.dropout);
    println!(
        "学習エポック数: {} (バッチ {}, 学習率 {})",
        metadata.num_epochs, metadata.batch_size, metadata.learning_rate
    );
    println!("学習/検証サンプル数: {} / {}", metadata.train_samples, metadata.val_samples);
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::InputScaling;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(
            vec!["dead".to_string(), "live".to_string()],
            128,
            InputScaling::UnitRange,
            0.5,
            15,
            32,
            1e-3,
        )
        .with_sample_counts(80, 20)
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path(Path::new("models/ldc.tar.gz")),
            PathBuf::from("models/ldc.tar.gz")
        );
        assert_eq!(artifact_path(Path::new("models/ldc")), PathBuf::from("models/ldc.tar.gz"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let weights = vec![1u8, 2, 3, 4, 5];

        let path =
            save_model_with_metadata(&dir.path().join("nested/model"), &sample_metadata(), &weights).unwrap();
        assert!(path.ends_with("nested/model.tar.gz"));

        let (metadata, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(binary, weights);
        assert_eq!(metadata.class_names, vec!["dead", "live"]);
        assert_eq!(metadata.train_samples, 80);
        assert_eq!(metadata.val_samples, 20);

        assert_eq!(load_metadata(&path).unwrap().image_size, 128);
    }

    #[test]
    fn test_load_resolves_same_path_as_save() {
        let dir = tempfile::tempdir().unwrap();
        let requested = dir.path().join("models/foo");
        save_model_with_metadata(&requested, &sample_metadata(), &[9u8; 3]).unwrap();

        assert!(load_metadata(&requested).is_err());
        let (metadata, binary) = load_model_with_metadata(&artifact_path(&requested)).unwrap();
        assert_eq!(metadata.image_size, 128);
        assert_eq!(binary, vec![9u8; 3]);
    }

    #[test]
    fn test_missing_entry_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only_meta.tar.gz");

        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let json = sample_metadata().to_json_string().unwrap();
        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(load_metadata(&path).is_ok());
        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(err.to_string().contains(MODEL_ENTRY));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_metadata(&dir.path().join("none.tar.gz")).is_err());
    }
}
