//! エラー型
//!
//! - [`LoadError`]: モデルファイルが壊れている / 未対応（致命的、リトライ不可）
//! - [`ShapeMismatchError`]: 呼び出し側がサイズ違いのバッファを渡した（呼び出し側のバグ）
//! - [`ComputeError`]: `invoke()` 中の数値的な失敗。ランタイムの状態は壊さない
//!
//! 飽和は定義された挙動なのでエラーではない（[`crate::quant::SaturationReport`] を参照）。

use crate::graph::OpCode;
use crate::tensor::{Direction, TensorId};

/// モデル読み込みエラー
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Invalid model magic: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("Unsupported model version: {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// ヘッダの次元がコンパイル時の次元と異なる
    #[error("Dimension mismatch for {field}: expected {expected}, got {actual}")]
    DimensionMismatch { field: &'static str, expected: usize, actual: usize },

    #[error("Unsupported operator code: {0}")]
    UnsupportedOperator(u8),

    /// 対応演算子だがグラフ構造が異なる
    #[error("Graph mismatch at op #{position}: expected {expected}, got {actual}")]
    GraphMismatch { position: usize, expected: String, actual: String },

    #[error("Unknown tensor id in quantization table: {0}")]
    UnknownTensor(u32),

    #[error("Duplicate quantization entry for tensor {0}")]
    DuplicateTensor(TensorId),

    #[error("Missing quantization entry for tensor {0}")]
    MissingTensor(TensorId),

    #[error("Invalid scale for tensor {tensor}: {scale}")]
    InvalidScale { tensor: TensorId, scale: f32 },

    #[error("Invalid zero point for tensor {tensor}: {zero_point} (must be in [-128, 127])")]
    InvalidZeroPoint { tensor: TensorId, zero_point: i32 },

    /// 重みは対称量子化（zero_point = 0）でなければならない
    #[error("Weight tensor {tensor} must be symmetric, got zero point {zero_point}")]
    AsymmetricWeight { tensor: TensorId, zero_point: i32 },

    /// StateOut を次の StateIn として戻すため、両者のパラメータは一致が必須
    #[error("State in/out quantization differs: in={state_in:?}, out={state_out:?}")]
    StateParamsMismatch { state_in: (f32, i32), state_out: (f32, i32) },

    /// 活性化テーブルが推論に使えない
    #[error("Invalid {table} table: {reason}")]
    InvalidTable { table: &'static str, reason: &'static str },

    #[error("Trailing bytes after model data: {0}")]
    TrailingBytes(usize),

    /// 読み込み I/O（途中で切れている場合は UnexpectedEof）
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub(crate) fn graph_mismatch(position: usize, expected: Option<OpCode>, actual: Option<OpCode>) -> Self {
        let name = |op: Option<OpCode>| op.map_or_else(|| "<end>".to_string(), |op| op.to_string());
        LoadError::GraphMismatch { position, expected: name(expected), actual: name(actual) }
    }
}

/// バッファサイズが I/O スロットの形状と一致しない
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Shape mismatch for {direction} {index} ({tensor}): expected {expected} elements {shape:?}, got {actual}")]
pub struct ShapeMismatchError {
    pub direction: Direction,
    pub index: usize,
    pub tensor: TensorId,
    pub shape: &'static [usize],
    pub expected: usize,
    pub actual: usize,
}

/// 推論中のエラー
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// 入力スロットにバッファが設定されていない
    #[error("Input {0} is not bound")]
    InputNotBound(usize),

    /// i32 アキュムレータのオーバーフロー
    #[error("Accumulator overflow in {layer}")]
    AccumulatorOverflow { layer: &'static str },
}

/// ランタイム API 全体のエラー
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("Invalid {direction} tensor index: {index}")]
    InvalidTensorIndex { direction: Direction, index: usize },

    /// まだ invoke() が成功していない
    #[error("Output {0} is not available before a successful invoke()")]
    OutputNotReady(usize),
}

/// ランタイム API の Result
pub type Result<T> = std::result::Result<T, Error>;
