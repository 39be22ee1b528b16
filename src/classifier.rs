//! 2値分類器の抽象インターフェース
//!
//! 実装（burnのCNNなど）は `predict_probability` だけを提供すればよい。

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;

use crate::types::Prediction;

/// P(class = live) を返す分類器
pub trait BinaryClassifier {
    /// 1枚の画像に対する P(live) ∈ [0, 1]
    fn predict_probability(&self, image: &RgbImage) -> Result<f32>;

    /// 0.5で閾値処理したクラスと確信度
    fn classify(&self, image: &RgbImage) -> Result<Prediction> {
        let prob_live = self.predict_probability(image)?;
        Ok(Prediction::from_probability(prob_live))
    }

    /// 画像ファイルを読み込んで分類
    fn classify_path(&self, path: &Path) -> Result<Prediction> {
        let image = image::open(path)
            .context(format!("画像を開けません: {}", path.display()))?
            .to_rgb8();
        self.classify(&image)
    }
}

/// 予測結果をコンソールに表示
pub fn print_prediction(image_path: &Path, prediction: &Prediction) {
    println!("\nImage: {}", image_path.display());
    println!("Prediction: {}", prediction.class);
    println!("Confidence: {:.2}\n", prediction.confidence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellClass;

    /// 平均輝度をそのまま確率とみなす分類器
    struct BrightnessClassifier;

    impl BinaryClassifier for BrightnessClassifier {
        fn predict_probability(&self, image: &RgbImage) -> Result<f32> {
            let sum: u64 = image.as_raw().iter().map(|&v| v as u64).sum();
            Ok(sum as f32 / (image.as_raw().len() as f32 * 255.0))
        }
    }

    #[test]
    fn test_classify_thresholds() {
        let bright = RgbImage::from_pixel(4, 4, image::Rgb([230, 230, 230]));
        let dark = RgbImage::from_pixel(4, 4, image::Rgb([20, 20, 20]));

        let live = BrightnessClassifier.classify(&bright).unwrap();
        assert_eq!(live.class, CellClass::Live);
        assert!(live.confidence >= 0.5 && live.confidence <= 1.0);

        let dead = BrightnessClassifier.classify(&dark).unwrap();
        assert_eq!(dead.class, CellClass::Dead);
        assert!(dead.confidence >= 0.5 && dead.confidence <= 1.0);
    }

    #[test]
    fn test_classify_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.png");
        RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255])).save(&path).unwrap();

        let prediction = BrightnessClassifier.classify_path(&path).unwrap();
        assert_eq!(prediction.class, CellClass::Live);
        assert!((prediction.confidence - 1.0).abs() < 1e-6);

        assert!(BrightnessClassifier.classify_path(&dir.path().join("none.png")).is_err());
    }
}
