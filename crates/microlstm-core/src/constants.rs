//! 次元定数と固定小数点フォーマット定義
//!
//! 全ての次元はコンパイル時に固定される。ファイルヘッダの値はここに一致しなければならない。

// =============================================================================
// 次元定義
// =============================================================================

/// 1 フレームの特徴量数（InputFrame, shape (1,1,40)）
pub const INPUT_LEN: usize = 40;

/// Conv1D のカーネル幅
pub const CONV_KERNEL: usize = 10;

/// Conv1D のフィルタ数
pub const CONV_FILTERS: usize = 2;

/// Conv1D の出力位置数（stride 1, padding なし）
pub const CONV_POSITIONS: usize = INPUT_LEN - CONV_KERNEL + 1; // 31

/// Conv1D 出力の総要素数（位置 × フィルタ）
pub const CONV_OUT: usize = CONV_POSITIONS * CONV_FILTERS; // 62

/// MaxPool のウィンドウ幅（= stride）
pub const POOL_WINDOW: usize = 2;

/// MaxPool 後の位置数（端数は切り捨て）
pub const POOL_POSITIONS: usize = CONV_POSITIONS / POOL_WINDOW; // 15

/// Flatten 後の次元（Dense 入力）
pub const POOL_OUT: usize = POOL_POSITIONS * CONV_FILTERS; // 30

/// Embedding 次元（Dense 出力 = Stage 1 入力）
pub const EMBED_DIM: usize = 40;

/// ゲート付きセルの隠れ次元
pub const HIDDEN_DIM: usize = 20;

/// 1 セルあたりのゲート数（input, forget, candidate, output）
pub const NUM_GATES: usize = 4;

/// 1 セルのゲート行数
pub const GATE_ROWS: usize = NUM_GATES * HIDDEN_DIM; // 80

/// 状態ベクトル長 `[h1, c1, h2, c2]`
pub const STATE_LEN: usize = 4 * HIDDEN_DIM; // 80

/// 分類クラス数
pub const NUM_CLASSES: usize = 3;

// =============================================================================
// 状態ベクトルのスライス境界
// =============================================================================

/// h1 の開始オフセット
pub const H1_OFFSET: usize = 0;

/// c1 の開始オフセット
pub const C1_OFFSET: usize = HIDDEN_DIM;

/// h2 の開始オフセット
pub const H2_OFFSET: usize = 2 * HIDDEN_DIM;

/// c2 の開始オフセット
pub const C2_OFFSET: usize = 3 * HIDDEN_DIM;

// =============================================================================
// 固定小数点フォーマット
// =============================================================================

/// ゲート前活性の小数ビット数（Q3.12、i16 で [-8, 8)）
pub const GATE_FRAC_BITS: u32 = 12;

/// ゲート出力・tanh 出力の小数ビット数（Q0.15）
pub const ACT_FRAC_BITS: u32 = 15;

/// Softmax 正規化後の確率の小数ビット数（Q0.16）
pub const PROB_FRAC_BITS: u32 = 16;

/// sigmoid / tanh テーブルのエントリ数（2^16 / 128 + 1）
pub const ACT_LUT_LEN: usize = 513;

/// sigmoid / tanh テーブルの補間ビット数（エントリ間隔 = 2^7）
pub const ACT_LUT_INTERP_BITS: u32 = 7;

/// Softmax の exp テーブルのエントリ数（最大ロジット差 0..=255）
pub const EXP_LUT_LEN: usize = 256;
