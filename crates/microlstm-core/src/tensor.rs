//! テンソル ID・形状・量子化メタデータ
//!
//! モデルファイルの量子化テーブルはテンソル ID で引く。
//! 外部 I/O スロット（入力 0/1、出力 0/1）は固定の契約で、ここで定義する。

use crate::constants::{INPUT_LEN, NUM_CLASSES, STATE_LEN};
use crate::quant::QuantParams;
use serde::Serialize;

/// 量子化テーブルのテンソル ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum TensorId {
    /// InputFrame (1,1,40)
    Input = 0,
    /// StateIn (1,80)
    StateIn = 1,
    /// ProbabilityVector (1,3)
    Probabilities = 2,
    /// StateOut (1,80)
    StateOut = 3,
    /// Conv1D + ReLU 出力（MaxPool も同じパラメータ）
    ConvOut = 4,
    /// Dense 出力（Embedding）
    Embedding = 5,
    /// 分類ヘッドのロジット
    Logits = 6,
    /// Conv1D 重み
    ConvWeight = 7,
    /// Embedding Dense 重み
    EmbedWeight = 8,
    /// Stage 1 入力側重み
    Stage1InputWeight = 9,
    /// Stage 1 再帰側重み
    Stage1RecurrentWeight = 10,
    /// Stage 2 入力側重み
    Stage2InputWeight = 11,
    /// Stage 2 再帰側重み
    Stage2RecurrentWeight = 12,
    /// 分類ヘッド重み
    HeadWeight = 13,
}

impl TensorId {
    /// ID の総数
    pub const COUNT: usize = 14;

    /// 全 ID（ファイル書き出し順）
    pub const ALL: [TensorId; Self::COUNT] = [
        TensorId::Input,
        TensorId::StateIn,
        TensorId::Probabilities,
        TensorId::StateOut,
        TensorId::ConvOut,
        TensorId::Embedding,
        TensorId::Logits,
        TensorId::ConvWeight,
        TensorId::EmbedWeight,
        TensorId::Stage1InputWeight,
        TensorId::Stage1RecurrentWeight,
        TensorId::Stage2InputWeight,
        TensorId::Stage2RecurrentWeight,
        TensorId::HeadWeight,
    ];

    /// 数値 ID から変換
    pub fn from_u32(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// テーブル内のインデックス
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 重みテンソルか（対称量子化 = zero_point 0 が必須）
    pub fn is_weight(self) -> bool {
        self as u32 >= TensorId::ConvWeight as u32
    }

    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "data",
            Self::StateIn => "h",
            Self::Probabilities => "prediction",
            Self::StateOut => "state_buffer_out",
            Self::ConvOut => "conv1d",
            Self::Embedding => "embedding",
            Self::Logits => "logits",
            Self::ConvWeight => "conv1d/kernel",
            Self::EmbedWeight => "embedding/kernel",
            Self::Stage1InputWeight => "cell1/kernel",
            Self::Stage1RecurrentWeight => "cell1/recurrent_kernel",
            Self::Stage2InputWeight => "cell2/kernel",
            Self::Stage2RecurrentWeight => "cell2/recurrent_kernel",
            Self::HeadWeight => "head/kernel",
        }
    }
}

impl std::fmt::Display for TensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// テンソル ID → 量子化パラメータ（読み込み後は不変）
#[derive(Debug, Clone, PartialEq)]
pub struct QuantTable {
    params: [QuantParams; TensorId::COUNT],
}

impl QuantTable {
    /// 全エントリ指定で作成
    pub fn new(params: [QuantParams; TensorId::COUNT]) -> Self {
        Self { params }
    }

    #[inline]
    pub fn get(&self, id: TensorId) -> QuantParams {
        self.params[id.index()]
    }

    /// (ID, パラメータ) の列
    pub fn iter(&self) -> impl Iterator<Item = (TensorId, QuantParams)> + '_ {
        TensorId::ALL.iter().map(move |&id| (id, self.params[id.index()]))
    }
}

// =============================================================================
// I/O スロット
// =============================================================================

/// 要素型（このランタイムでは int8 のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DType {
    Int8,
}

/// I/O の方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// 固定 I/O スロットの定義
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    pub index: usize,
    pub tensor: TensorId,
    pub shape: &'static [usize],
}

impl SlotSpec {
    /// 要素数
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 入力スロット: 0 = InputFrame (1,1,40), 1 = StateIn (1,80)
pub static INPUT_SLOTS: [SlotSpec; 2] = [
    SlotSpec { index: 0, tensor: TensorId::Input, shape: &[1, 1, INPUT_LEN] },
    SlotSpec { index: 1, tensor: TensorId::StateIn, shape: &[1, STATE_LEN] },
];

/// 出力スロット: 0 = ProbabilityVector (1,3), 1 = StateOut (1,80)
pub static OUTPUT_SLOTS: [SlotSpec; 2] = [
    SlotSpec { index: 0, tensor: TensorId::Probabilities, shape: &[1, NUM_CLASSES] },
    SlotSpec { index: 1, tensor: TensorId::StateOut, shape: &[1, STATE_LEN] },
];

/// 入力スロット番号
pub const INPUT_FRAME_SLOT: usize = 0;
pub const STATE_IN_SLOT: usize = 1;

/// 出力スロット番号
pub const PROBABILITIES_SLOT: usize = 0;
pub const STATE_OUT_SLOT: usize = 1;

/// スロットの詳細（インタプリタの get_input_details 相当）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorDetails {
    pub index: usize,
    pub name: &'static str,
    pub shape: &'static [usize],
    pub dtype: DType,
    pub quantization: QuantParams,
}

impl TensorDetails {
    pub(crate) fn from_slot(slot: &SlotSpec, table: &QuantTable) -> Self {
        Self {
            index: slot.index,
            name: slot.tensor.as_str(),
            shape: slot.shape,
            dtype: DType::Int8,
            quantization: table.get(slot.tensor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_id_round_trip() {
        for (i, id) in TensorId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(TensorId::from_u32(i as u32), Some(*id));
        }
        assert_eq!(TensorId::from_u32(TensorId::COUNT as u32), None);
    }

    #[test]
    fn test_weight_classification() {
        assert!(!TensorId::Input.is_weight());
        assert!(!TensorId::Logits.is_weight());
        assert!(TensorId::ConvWeight.is_weight());
        assert!(TensorId::HeadWeight.is_weight());
    }

    #[test]
    fn test_slot_shapes() {
        assert_eq!(INPUT_SLOTS[INPUT_FRAME_SLOT].shape, &[1, 1, 40]);
        assert_eq!(INPUT_SLOTS[INPUT_FRAME_SLOT].len(), 40);
        assert_eq!(INPUT_SLOTS[STATE_IN_SLOT].shape, &[1, 80]);
        assert_eq!(OUTPUT_SLOTS[PROBABILITIES_SLOT].shape, &[1, 3]);
        assert_eq!(OUTPUT_SLOTS[STATE_OUT_SLOT].len(), 80);
    }
}
