//! 整数演算の基本層
//!
//! - `Affine`: 全結合アフィン変換（int8 入力 × int8 重み + i32 バイアス → i32）
//! - `Matrix`: バイアスなしの行列ベクトル積（再帰側重み用）
//! - `Conv1d`: 1 チャンネル入力の 1-D 畳み込み（バイアスなし）
//! - `max_pool`: window = stride = 2 の MaxPool
//!
//! 入力は `(q − zero_point)` に直してから積和する。重みは対称量子化なので zero_point は持たない。
//! 積和は i64 で行い、最後に i32 に収まるか検査する（i32 アキュムレータ相当の契約）。

use crate::constants::{CONV_FILTERS, CONV_KERNEL, CONV_OUT, CONV_POSITIONS, INPUT_LEN, POOL_OUT, POOL_POSITIONS, POOL_WINDOW};
use crate::error::ComputeError;

/// i64 の積和結果を i32 アキュムレータに収める
#[inline]
fn to_accumulator(acc: i64, layer: &'static str) -> Result<i32, ComputeError> {
    i32::try_from(acc).map_err(|_| ComputeError::AccumulatorOverflow { layer })
}

/// アフィン変換層
pub struct Affine<const IN: usize, const OUT: usize> {
    /// バイアス（スケール = 入力スケール × 重みスケール）
    pub bias: Box<[i32; OUT]>,
    /// 重み: i8[OUT][IN]（row-major）
    pub weight: Box<[i8]>,
}

impl<const IN: usize, const OUT: usize> Affine<IN, OUT> {
    /// 重みの要素数
    pub const WEIGHT_LEN: usize = OUT * IN;

    /// 新規作成（ゼロ初期化）
    pub fn new() -> Self {
        Self {
            bias: Box::new([0; OUT]),
            weight: vec![0i8; Self::WEIGHT_LEN].into_boxed_slice(),
        }
    }

    /// 順伝播
    ///
    /// `out[i] = bias[i] + Σ_j weight[i][j] × (input[j] − input_zero_point)`
    pub fn propagate(
        &self,
        input: &[i8; IN],
        input_zero_point: i32,
        layer: &'static str,
    ) -> Result<[i32; OUT], ComputeError> {
        let mut out = [0i32; OUT];

        for (i, out_val) in out.iter_mut().enumerate() {
            let row = &self.weight[i * IN..(i + 1) * IN];
            let mut acc = self.bias[i] as i64;
            for (&w, &x) in row.iter().zip(input.iter()) {
                acc += w as i64 * (x as i32 - input_zero_point) as i64;
            }
            *out_val = to_accumulator(acc, layer)?;
        }

        Ok(out)
    }

    /// 重みとバイアスのバイト数
    pub fn size_bytes(&self) -> usize {
        OUT * std::mem::size_of::<i32>() + self.weight.len()
    }
}

impl<const IN: usize, const OUT: usize> Default for Affine<IN, OUT> {
    fn default() -> Self {
        Self::new()
    }
}

/// バイアスなしの行列
pub struct Matrix<const IN: usize, const OUT: usize> {
    /// 重み: i8[OUT][IN]（row-major）
    pub weight: Box<[i8]>,
}

impl<const IN: usize, const OUT: usize> Matrix<IN, OUT> {
    /// 重みの要素数
    pub const WEIGHT_LEN: usize = OUT * IN;

    /// 新規作成（ゼロ初期化）
    pub fn new() -> Self {
        Self { weight: vec![0i8; Self::WEIGHT_LEN].into_boxed_slice() }
    }

    /// `out[i] = Σ_j weight[i][j] × (input[j] − input_zero_point)`
    pub fn propagate(
        &self,
        input: &[i8; IN],
        input_zero_point: i32,
        layer: &'static str,
    ) -> Result<[i32; OUT], ComputeError> {
        let mut out = [0i32; OUT];

        for (i, out_val) in out.iter_mut().enumerate() {
            let row = &self.weight[i * IN..(i + 1) * IN];
            let acc: i64 = row
                .iter()
                .zip(input.iter())
                .map(|(&w, &x)| w as i64 * (x as i32 - input_zero_point) as i64)
                .sum();
            *out_val = to_accumulator(acc, layer)?;
        }

        Ok(out)
    }

    pub fn size_bytes(&self) -> usize {
        self.weight.len()
    }
}

impl<const IN: usize, const OUT: usize> Default for Matrix<IN, OUT> {
    fn default() -> Self {
        Self::new()
    }
}

/// 1-D 畳み込み層（1 入力チャンネル、stride 1、padding なし、バイアスなし）
pub struct Conv1d {
    /// 重み: i8[CONV_FILTERS][CONV_KERNEL]
    pub weight: Box<[i8; CONV_FILTERS * CONV_KERNEL]>,
}

impl Conv1d {
    /// 新規作成（ゼロ初期化）
    pub fn new() -> Self {
        Self { weight: Box::new([0; CONV_FILTERS * CONV_KERNEL]) }
    }

    /// 順伝播
    ///
    /// # 出力レイアウト（channels_last）
    ///
    /// ```text
    /// out[p * CONV_FILTERS + f] = Σ_k weight[f][k] × (input[p + k] − zero_point)
    /// ```
    pub fn propagate(
        &self,
        input: &[i8; INPUT_LEN],
        input_zero_point: i32,
    ) -> Result<[i32; CONV_OUT], ComputeError> {
        let mut out = [0i32; CONV_OUT];

        for p in 0..CONV_POSITIONS {
            let window = &input[p..p + CONV_KERNEL];
            for f in 0..CONV_FILTERS {
                let kernel = &self.weight[f * CONV_KERNEL..(f + 1) * CONV_KERNEL];
                let acc: i64 = kernel
                    .iter()
                    .zip(window)
                    .map(|(&w, &x)| w as i64 * (x as i32 - input_zero_point) as i64)
                    .sum();
                out[p * CONV_FILTERS + f] = to_accumulator(acc, "conv1d")?;
            }
        }

        Ok(out)
    }

    pub fn size_bytes(&self) -> usize {
        self.weight.len()
    }
}

impl Default for Conv1d {
    fn default() -> Self {
        Self::new()
    }
}

/// MaxPool（window = stride = 2、末尾の端数位置は捨てる）
///
/// 量子化パラメータは入出力で共通。int8 のまま比較できる（アフィン写像は単調）。
#[inline]
pub fn max_pool(input: &[i8; CONV_OUT]) -> [i8; POOL_OUT] {
    let mut out = [i8::MIN; POOL_OUT];

    for p in 0..POOL_POSITIONS {
        for f in 0..CONV_FILTERS {
            out[p * CONV_FILTERS + f] = (0..POOL_WINDOW)
                .map(|w| input[(p * POOL_WINDOW + w) * CONV_FILTERS + f])
                .max()
                .unwrap_or(i8::MIN);
        }
    }

    out
}
