//! 演算子グラフ
//!
//! このランタイムが実行できるグラフは 1 通りのみ。
//! モデルファイルの演算子列がこれと一致しなければ読み込みを拒否する。

/// 演算子コード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// 1-D 畳み込み（バイアスなし）+ ReLU
    Conv1d = 1,
    /// 1-D MaxPool（window = stride = 2）
    MaxPool1d = 2,
    /// 全結合
    FullyConnected = 3,
    /// ゲート付き再帰セル（1 ステップ）
    GatedCell = 4,
    /// Softmax
    Softmax = 5,
}

impl OpCode {
    /// バイト値から変換（未対応なら `None`）
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Conv1d),
            2 => Some(Self::MaxPool1d),
            3 => Some(Self::FullyConnected),
            4 => Some(Self::GatedCell),
            5 => Some(Self::Softmax),
            _ => None,
        }
    }

    /// 文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conv1d => "CONV_1D",
            Self::MaxPool1d => "MAX_POOL_1D",
            Self::FullyConnected => "FULLY_CONNECTED",
            Self::GatedCell => "GATED_CELL",
            Self::Softmax => "SOFTMAX",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 実行可能なグラフ（データ依存順）
///
/// ```text
/// Conv1D → MaxPool → Dense → Stage1 → Stage2 → Dense → Softmax
/// ```
pub const SUPPORTED_GRAPH: [OpCode; 7] = [
    OpCode::Conv1d,
    OpCode::MaxPool1d,
    OpCode::FullyConnected,
    OpCode::GatedCell,
    OpCode::GatedCell,
    OpCode::FullyConnected,
    OpCode::Softmax,
];
