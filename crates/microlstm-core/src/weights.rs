//! 重み構造体
//!
//! MLSM ファイルから読み込んだ（または synth で生成した）重みを保持する。
//! 推論用の再量子化係数はここでは持たない（[`crate::model::Model`] が読み込み時に計算する）。

use crate::constants::*;
use crate::error::LoadError;
use crate::layers::{Affine, Conv1d, Matrix};
use crate::lut::{ActivationTables, ExpTable};
use crate::tensor::QuantTable;

/// FeatureExtractor の重み
#[derive(Default)]
pub struct FeatureWeights {
    /// Conv1D: i8[2][10]（バイアスなし）
    pub conv: Conv1d,
    /// Dense: 30 → 40
    pub dense: Affine<POOL_OUT, EMBED_DIM>,
}

impl FeatureWeights {
    pub fn size_bytes(&self) -> usize {
        self.conv.size_bytes() + self.dense.size_bytes()
    }
}

/// ゲート付きセル 1 段分の重み
///
/// ゲート行の並びは input, forget, candidate, output（各 HIDDEN_DIM 行）。
/// バイアスは入力側 `Affine` が持つ（スケール = 入力スケール × 入力側重みスケール）。
pub struct CellWeights<const IN: usize> {
    /// 入力側: i32[80] + i8[80][IN]
    pub input: Affine<IN, GATE_ROWS>,
    /// 再帰側: i8[80][20]
    pub recurrent: Matrix<HIDDEN_DIM, GATE_ROWS>,
}

impl<const IN: usize> CellWeights<IN> {
    /// 新規作成（ゼロ初期化）
    pub fn new() -> Self {
        Self { input: Affine::new(), recurrent: Matrix::new() }
    }

    pub fn size_bytes(&self) -> usize {
        self.input.size_bytes() + self.recurrent.size_bytes()
    }
}

impl<const IN: usize> Default for CellWeights<IN> {
    fn default() -> Self {
        Self::new()
    }
}

/// 分類ヘッドの重み（20 → 3）
#[derive(Default)]
pub struct HeadWeights {
    pub dense: Affine<HIDDEN_DIM, NUM_CLASSES>,
}

impl HeadWeights {
    pub fn size_bytes(&self) -> usize {
        self.dense.size_bytes()
    }
}

/// 全重み
#[derive(Default)]
pub struct ModelWeights {
    pub feature: FeatureWeights,
    /// Stage 1（入力 = Embedding）
    pub stage1: CellWeights<EMBED_DIM>,
    /// Stage 2（入力 = h1_out）
    pub stage2: CellWeights<HIDDEN_DIM>,
    pub head: HeadWeights,
}

impl ModelWeights {
    /// 新規作成（ゼロ初期化）
    pub fn new() -> Self {
        Self::default()
    }

    /// 重み・バイアスの総バイト数
    pub fn size_bytes(&self) -> usize {
        self.feature.size_bytes()
            + self.stage1.size_bytes()
            + self.stage2.size_bytes()
            + self.head.size_bytes()
    }

    /// 可変長の重みバッファが層の形状と一致するか検証
    pub fn validate(&self) -> Result<(), LoadError> {
        let checks = [
            ("embedding.weight", Affine::<POOL_OUT, EMBED_DIM>::WEIGHT_LEN, self.feature.dense.weight.len()),
            ("stage1.input_weight", Affine::<EMBED_DIM, GATE_ROWS>::WEIGHT_LEN, self.stage1.input.weight.len()),
            (
                "stage1.recurrent_weight",
                Matrix::<HIDDEN_DIM, GATE_ROWS>::WEIGHT_LEN,
                self.stage1.recurrent.weight.len(),
            ),
            ("stage2.input_weight", Affine::<HIDDEN_DIM, GATE_ROWS>::WEIGHT_LEN, self.stage2.input.weight.len()),
            (
                "stage2.recurrent_weight",
                Matrix::<HIDDEN_DIM, GATE_ROWS>::WEIGHT_LEN,
                self.stage2.recurrent.weight.len(),
            ),
            ("head.weight", Affine::<HIDDEN_DIM, NUM_CLASSES>::WEIGHT_LEN, self.head.dense.weight.len()),
        ];
        for (field, expected, actual) in checks {
            if actual != expected {
                return Err(LoadError::DimensionMismatch { field, expected, actual });
            }
        }
        Ok(())
    }
}

/// モデルファイル 1 本分の内容
///
/// 量子化テーブル・重み・活性化テーブル。読み込み側はこれを検証して
/// [`crate::model::Model`] を組み立てる。
pub struct ModelArtifact {
    pub quant: QuantTable,
    pub weights: ModelWeights,
    pub activations: ActivationTables,
    pub softmax: ExpTable,
}

impl ModelArtifact {
    /// MLSM v1 のバイト列に書き出す
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::io::encode_model(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_new() {
        let weights = ModelWeights::new();

        assert_eq!(weights.feature.conv.weight.len(), CONV_FILTERS * CONV_KERNEL);
        assert_eq!(weights.feature.dense.weight.len(), EMBED_DIM * POOL_OUT);
        assert_eq!(weights.stage1.input.weight.len(), GATE_ROWS * EMBED_DIM);
        assert_eq!(weights.stage1.recurrent.weight.len(), GATE_ROWS * HIDDEN_DIM);
        assert_eq!(weights.stage2.input.weight.len(), GATE_ROWS * HIDDEN_DIM);
        assert_eq!(weights.head.dense.weight.len(), NUM_CLASSES * HIDDEN_DIM);
        assert!(weights.stage1.input.bias.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate() {
        let mut weights = ModelWeights::new();
        assert!(weights.validate().is_ok());

        weights.stage2.recurrent.weight = vec![0i8; 7].into_boxed_slice();
        assert!(matches!(
            weights.validate(),
            Err(LoadError::DimensionMismatch { field: "stage2.recurrent_weight", expected: 1600, actual: 7 })
        ));
    }

    #[test]
    fn test_weights_size() {
        let weights = ModelWeights::new();
        // conv 20 + dense (40*4 + 1200) + stage1 (80*4 + 3200 + 1600)
        // + stage2 (80*4 + 1600 + 1600) + head (3*4 + 60)
        let expected = 20 + (160 + 1200) + (320 + 3200 + 1600) + (320 + 1600 + 1600) + (12 + 60);
        assert_eq!(weights.size_bytes(), expected);
    }
}
