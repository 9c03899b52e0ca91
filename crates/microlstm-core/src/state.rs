//! 再帰状態
//!
//! 外部とのやり取りは平坦な `[h1, c1, h2, c2]`（80 要素）だが、
//! 内部では名前付きフィールドで扱い、オフセット計算は `from_flat` / `to_flat` の中だけに閉じ込める。

use crate::constants::{C1_OFFSET, C2_OFFSET, H1_OFFSET, H2_OFFSET, HIDDEN_DIM, STATE_LEN};
use crate::quant::{QuantParams, dequantize, quantize_saturating};

/// 1 セル分の状態（量子化済み）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellState {
    /// 隠れ状態（セルの出力）
    pub h: [i8; HIDDEN_DIM],
    /// セル状態（内部記憶）
    pub c: [i8; HIDDEN_DIM],
}

impl CellState {
    /// 全要素を同じコードで埋める
    pub fn filled(q: i8) -> Self {
        Self { h: [q; HIDDEN_DIM], c: [q; HIDDEN_DIM] }
    }
}

/// 2 段分の状態（StateIn / StateOut）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrentState {
    pub h1: [i8; HIDDEN_DIM],
    pub c1: [i8; HIDDEN_DIM],
    pub h2: [i8; HIDDEN_DIM],
    pub c2: [i8; HIDDEN_DIM],
}

impl RecurrentState {
    /// 実数 0 に対応する状態（`zero_point` で埋める）
    pub fn zeroed(params: QuantParams) -> Self {
        Self::filled(params.zero_point as i8)
    }

    /// 全要素を同じコードで埋める
    pub fn filled(q: i8) -> Self {
        Self::from_stages(CellState::filled(q), CellState::filled(q))
    }

    /// 平坦なバッファから組み立て
    pub fn from_flat(flat: &[i8; STATE_LEN]) -> Self {
        let slice = |offset: usize| {
            let mut out = [0i8; HIDDEN_DIM];
            out.copy_from_slice(&flat[offset..offset + HIDDEN_DIM]);
            out
        };
        Self {
            h1: slice(H1_OFFSET),
            c1: slice(C1_OFFSET),
            h2: slice(H2_OFFSET),
            c2: slice(C2_OFFSET),
        }
    }

    /// 平坦なバッファに書き出し
    pub fn to_flat(&self) -> [i8; STATE_LEN] {
        let mut flat = [0i8; STATE_LEN];
        flat[H1_OFFSET..H1_OFFSET + HIDDEN_DIM].copy_from_slice(&self.h1);
        flat[C1_OFFSET..C1_OFFSET + HIDDEN_DIM].copy_from_slice(&self.c1);
        flat[H2_OFFSET..H2_OFFSET + HIDDEN_DIM].copy_from_slice(&self.h2);
        flat[C2_OFFSET..C2_OFFSET + HIDDEN_DIM].copy_from_slice(&self.c2);
        flat
    }

    /// 2 つのセル状態から組み立て
    pub fn from_stages(stage1: CellState, stage2: CellState) -> Self {
        Self { h1: stage1.h, c1: stage1.c, h2: stage2.h, c2: stage2.c }
    }

    /// Stage 1 の状態
    pub fn stage1(&self) -> CellState {
        CellState { h: self.h1, c: self.c1 }
    }

    /// Stage 2 の状態
    pub fn stage2(&self) -> CellState {
        CellState { h: self.h2, c: self.c2 }
    }

    /// 実数値から量子化して作成。飽和した要素数も返す。
    pub fn quantize(values: &[f32; STATE_LEN], params: QuantParams) -> (Self, usize) {
        let mut flat = [0i8; STATE_LEN];
        let mut saturated = 0;
        for (q, &x) in flat.iter_mut().zip(values) {
            let (v, sat) = quantize_saturating(x, params);
            *q = v;
            saturated += sat as usize;
        }
        (Self::from_flat(&flat), saturated)
    }

    /// 実数値に戻す（平坦レイアウト）
    pub fn dequantize(&self, params: QuantParams) -> [f32; STATE_LEN] {
        self.to_flat().map(|q| dequantize(q, params))
    }
}
