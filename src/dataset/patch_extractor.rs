//! バウンディングボックスから固定サイズのパッチを切り出す

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{PreprocessError, PreprocessResult};
use crate::types::BoundingBox;

/// 画像に対するボックスの位置関係
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxPlacement {
    /// 完全に画像内
    Inside,
    /// 一部（または全部）が画像外。外側は黒で埋める
    PartiallyOutside,
    /// 幅または高さが0以下で切り出せない
    Empty,
}

impl BoxPlacement {
    pub fn of(bbox: &BoundingBox, width: u32, height: u32) -> Self {
        if bbox.is_empty() {
            return BoxPlacement::Empty;
        }
        let inside = bbox.xmin >= 0
            && bbox.ymin >= 0
            && bbox.xmax as i64 <= width as i64
            && bbox.ymax as i64 <= height as i64;
        if inside {
            BoxPlacement::Inside
        } else {
            BoxPlacement::PartiallyOutside
        }
    }
}

/// 切り出したパッチ
#[derive(Debug, Clone)]
pub struct Patch {
    pub image: RgbImage,
    pub placement: BoxPlacement,
}

/// 切り出し領域の上限ピクセル数（画像外の黒埋め部分を含む）
pub const MAX_CROP_PIXELS: u64 = 1 << 26;

/// パッチ切り出し器（状態を持たない）
#[derive(Debug, Clone, Copy)]
pub struct PatchExtractor {
    patch_size: u32,
}

impl Default for PatchExtractor {
    fn default() -> Self {
        Self::new(128)
    }
}

impl PatchExtractor {
    pub fn new(patch_size: u32) -> Self {
        Self { patch_size }
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    /// ボックスで切り出し、アスペクト比を無視して patch_size x patch_size に伸縮
    ///
    /// 幅・高さが0以下なら `DegenerateBox`、領域が `MAX_CROP_PIXELS` を超えるなら `OversizedBox`。
    pub fn extract(&self, img: &RgbImage, bbox: &BoundingBox) -> PreprocessResult<Patch> {
        let placement = BoxPlacement::of(bbox, img.width(), img.height());
        if placement == BoxPlacement::Empty {
            return Err(PreprocessError::DegenerateBox { bbox: *bbox });
        }
        let (width, height) = crop_dimensions(bbox)?;

        let crop = match placement {
            BoxPlacement::Inside => {
                imageops::crop_imm(img, bbox.xmin as u32, bbox.ymin as u32, width, height).to_image()
            }
            _ => crop_padded(img, bbox, width, height),
        };

        let image = imageops::resize(&crop, self.patch_size, self.patch_size, FilterType::CatmullRom);
        Ok(Patch { image, placement })
    }
}

fn crop_dimensions(bbox: &BoundingBox) -> PreprocessResult<(u32, u32)> {
    let oversized = || PreprocessError::OversizedBox {
        bbox: *bbox,
        max_pixels: MAX_CROP_PIXELS,
    };
    let width = u32::try_from(bbox.width()).map_err(|_| oversized())?;
    let height = u32::try_from(bbox.height()).map_err(|_| oversized())?;
    match (width as u64).checked_mul(height as u64) {
        Some(pixels) if pixels <= MAX_CROP_PIXELS => Ok((width, height)),
        _ => Err(oversized()),
    }
}

/// 画像外の領域を黒で埋めて切り出す
fn crop_padded(img: &RgbImage, bbox: &BoundingBox, width: u32, height: u32) -> RgbImage {
    let mut out = RgbImage::new(width, height);

    let x0 = (bbox.xmin as i64).max(0);
    let y0 = (bbox.ymin as i64).max(0);
    let x1 = (bbox.xmax as i64).min(img.width() as i64);
    let y1 = (bbox.ymax as i64).min(img.height() as i64);

    for y in y0..y1 {
        for x in x0..x1 {
            let pixel = img.get_pixel(x as u32, y as u32);
            out.put_pixel((x - bbox.xmin as i64) as u32, (y - bbox.ymin as i64) as u32, *pixel);
        }
    }
    out
}
