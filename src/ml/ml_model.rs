//! 機械学習モデルの共通定義
//!
//! 細胞パッチ (live/dead) 分類用のCNNモデルと画像の前処理を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::imageops::FilterType;
use image::RgbImage;

use crate::model::config::InputScaling;

/// クラス数（dead, live）
pub const NUM_CLASSES: usize = 2;

/// 全結合層のユニット数
const HIDDEN_UNITS: usize = 128;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 2)]
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
}

impl ModelConfig {
    /// Conv(3x3, padding無し) + MaxPool(2x2) を3段通した後の特徴マップサイズ
    pub fn feature_map_size(&self) -> usize {
        let mut size = self.image_size;
        for _ in 0..3 {
            size = size.saturating_sub(2) / 2;
        }
        size
    }

    /// モデルを初期化
    ///
    /// 入力サイズが22未満だと特徴マップが0になるためpanicする
    pub fn init<B: Backend>(&self, device: &B::Device) -> CellClassifier<B> {
        let feature_map_size = self.feature_map_size();
        if feature_map_size == 0 {
            panic!("入力サイズが小さすぎます: {} (最小22x22が必要)", self.image_size);
        }

        // 特徴次元 d = 128チャネル * feature_map_size * feature_map_size
        let d = 128 * feature_map_size * feature_map_size;
        tracing::debug!(
            "[Model] 入力 {}x{} -> 特徴マップ 128 x {}x{} (d={})",
            self.image_size,
            self.image_size,
            feature_map_size,
            feature_map_size,
            d
        );

        CellClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).init(device),
            conv3: Conv2dConfig::new([64, 128], [3, 3]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(d, HIDDEN_UNITS).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(HIDDEN_UNITS, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 細胞パッチ分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding) + ReLU + MaxPool 2x2} x 3層 (32, 64, 128ch)
/// - Flatten
/// - FC: d -> 128 + ReLU + Dropout
/// - FC: 128 -> num_classes
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct CellClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    conv2: Conv2d<B>, // 32 -> 64
    conv3: Conv2d<B>, // 64 -> 128
    pool: MaxPool2d,

    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> CellClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.pool.forward(self.activation.forward(self.conv1.forward(images)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv3.forward(x)));

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// 指定クラスの確率 [batch_size]
    pub fn class_probability(&self, images: Tensor<B, 4>, class_index: usize) -> Tensor<B, 1> {
        let [batch_size, _, _, _] = images.dims();
        let probs = softmax(self.forward(images), 1);
        probs
            .slice([0..batch_size, class_index..class_index + 1])
            .reshape([batch_size])
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// RGB画像を (C, H, W) 順の平坦なベクタに変換
pub fn image_to_chw(img: &RgbImage, scaling: InputScaling) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * (width * height) as usize);
    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                data.push(scaling.apply(img.get_pixel(x, y)[channel]));
            }
        }
    }
    data
}

/// サイズが異なれば指定フィルタで size x size にリサイズ
pub fn fit_to_size(img: &RgbImage, size: usize, filter: FilterType) -> RgbImage {
    let size = size as u32;
    if img.dimensions() == (size, size) {
        img.clone()
    } else {
        image::imageops::resize(img, size, size, filter)
    }
}

/// 画像ファイルを読み込んでモデル入力に変換
pub fn load_image_data(
    path: &std::path::Path,
    size: usize,
    scaling: InputScaling,
    filter: FilterType,
) -> anyhow::Result<Vec<f32>> {
    let img = image::open(path)?.to_rgb8();
    Ok(image_to_chw(&fit_to_size(&img, size, filter), scaling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_map_size() {
        let config = ModelConfig::new();
        assert_eq!(config.feature_map_size(), 14);
        assert_eq!(ModelConfig::new().with_image_size(22).feature_map_size(), 1);
        assert_eq!(ModelConfig::new().with_image_size(21).feature_map_size(), 0);
    }

    #[test]
    fn test_forward_shape() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new().with_image_size(32).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(images);
        assert_eq!(output.dims(), [2, NUM_CLASSES]);
    }

    #[test]
    fn test_class_probability_in_unit_range() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new().with_image_size(32).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([3, 3, 32, 32], &device);
        let probs: Vec<f32> = model.class_probability(images, 1).into_data().to_vec().unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_image_to_chw_order() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 10]));
        img.put_pixel(1, 0, image::Rgb([0, 255, 20]));

        let raw = image_to_chw(&img, InputScaling::Raw);
        assert_eq!(raw, vec![255.0, 0.0, 0.0, 255.0, 10.0, 20.0]);

        let unit = image_to_chw(&img, InputScaling::UnitRange);
        assert_eq!(unit[0], 1.0);
        assert_eq!(unit[1], 0.0);
    }
}
