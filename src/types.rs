//! データセット全体で共有する型定義

use serde::{Deserialize, Serialize};
use std::fmt;

/// 細胞クラス（2値分類の対象）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellClass {
    Live,
    Dead,
}

impl CellClass {
    pub const ALL: [CellClass; 2] = [CellClass::Live, CellClass::Dead];

    /// ディレクトリ名・ファイル名に使う文字列
    pub fn as_str(&self) -> &'static str {
        match self {
            CellClass::Live => "live",
            CellClass::Dead => "dead",
        }
    }
}

impl fmt::Display for CellClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 学習用/検証用の分割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub const ALL: [Split; 2] = [Split::Train, Split::Val];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// バウンディングボックス（ピクセル座標）
///
/// xmin < xmax, ymin < ymax を前提とするが、パース時には検証しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BoundingBox {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    /// XMLの浮動小数点座標から生成（0方向への切り捨て）
    pub fn from_float_coords(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin: xmin.trunc() as i32,
            ymin: ymin.trunc() as i32,
            xmax: xmax.trunc() as i32,
            ymax: ymax.trunc() as i32,
        }
    }

    pub fn width(&self) -> i64 {
        self.xmax as i64 - self.xmin as i64
    }

    pub fn height(&self) -> i64 {
        self.ymax as i64 - self.ymin as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// 予測結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub class: CellClass,
    /// max(p, 1 - p)。常に [0.5, 1.0]
    pub confidence: f32,
    /// P(class = live)
    pub prob_live: f32,
}

impl Prediction {
    /// P(live) を0.5で閾値処理してクラスと確信度を決める
    pub fn from_probability(prob_live: f32) -> Self {
        let p = if prob_live.is_nan() { 0.0 } else { prob_live.clamp(0.0, 1.0) };
        if p >= 0.5 {
            Self { class: CellClass::Live, confidence: p, prob_live: p }
        } else {
            Self { class: CellClass::Dead, confidence: 1.0 - p, prob_live: p }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_coords_truncate() {
        let bbox = BoundingBox::from_float_coords(10.9, 10.2, 59.99, 60.0);
        assert_eq!(bbox, BoundingBox::new(10, 10, 59, 60));
    }

    #[test]
    fn test_empty_box() {
        assert!(BoundingBox::new(10, 10, 10, 50).is_empty());
        assert!(BoundingBox::new(50, 10, 10, 50).is_empty());
        assert!(!BoundingBox::new(10, 10, 11, 11).is_empty());
    }

    #[test]
    fn test_prediction_threshold() {
        let live = Prediction::from_probability(0.5);
        assert_eq!(live.class, CellClass::Live);
        assert_eq!(live.confidence, 0.5);

        let dead = Prediction::from_probability(0.2);
        assert_eq!(dead.class, CellClass::Dead);
        assert!((dead.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_prediction_confidence_range() {
        for i in 0..=100 {
            let p = Prediction::from_probability(i as f32 / 100.0);
            assert!(p.confidence >= 0.5 && p.confidence <= 1.0, "p={} conf={}", i, p.confidence);
        }
    }
}
