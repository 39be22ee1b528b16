//! アノテーションファイル単位の学習/検証分割

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{PreprocessError, PreprocessResult};
use crate::types::Split;

/// シード指定があれば再現可能な乱数源、無ければOSエントロピーから生成
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// 分割割り当て器
///
/// シャッフル後の先頭 floor(ratio × N) 件を train、残りを val にする。
/// 割り当ては位置で決まり、ファイル自体とは結び付かない。
#[derive(Debug, Clone, Copy)]
pub struct SplitAssigner {
    train_ratio: f64,
}

impl SplitAssigner {
    pub fn new(train_ratio: f64) -> PreprocessResult<Self> {
        if !(train_ratio > 0.0 && train_ratio < 1.0) {
            return Err(PreprocessError::InvalidConfig(format!(
                "train_ratio は (0, 1) の範囲: {}",
                train_ratio
            )));
        }
        Ok(Self { train_ratio })
    }

    pub fn train_ratio(&self) -> f64 {
        self.train_ratio
    }

    /// N件中 train に入る件数
    pub fn train_count(&self, total: usize) -> usize {
        // 0.29 * 100 = 28.999... のような丸め誤差を吸収する
        let count = (total as f64 * self.train_ratio + 1e-9).floor() as usize;
        count.min(total)
    }

    /// シャッフルして分割を決める
    pub fn assign<T, R: Rng + ?Sized>(&self, mut items: Vec<T>, rng: &mut R) -> SplitAssignment<T> {
        items.shuffle(rng);
        let train_len = self.train_count(items.len());

        let entries = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let split = if i < train_len { Split::Train } else { Split::Val };
                (item, split)
            })
            .collect();

        SplitAssignment { entries }
    }
}

/// シャッフル後の並びと各要素の分割
#[derive(Debug, Clone)]
pub struct SplitAssignment<T> {
    entries: Vec<(T, Split)>,
}

impl<T> SplitAssignment<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, split: Split) -> usize {
        self.entries.iter().filter(|(_, s)| *s == split).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, Split)> {
        self.entries.iter().map(|(item, split)| (item, *split))
    }
}

impl<T> IntoIterator for SplitAssignment<T> {
    type Item = (T, Split);
    type IntoIter = std::vec::IntoIter<(T, Split)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
