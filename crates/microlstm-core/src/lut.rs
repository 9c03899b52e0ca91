//! 活性化関数のルックアップテーブル
//!
//! テーブルはモデルファイルに同梱される（読み込み側で浮動小数点の超越関数を評価しない）。
//! そのため同じモデルファイルなら、どのプラットフォームでもビット単位で同じ推論結果になる。
//!
//! # sigmoid / tanh
//!
//! 入力 Q3.12（i16 全域 = 実数 [-8, 8)）、出力 Q0.15。
//! 513 点のテーブル（間隔 2^7 = 実数 1/32）を線形補間する。
//!
//! ```text
//! u     = x + 32768          (0..=65535)
//! idx   = u >> 7             (0..=511)
//! frac  = u & 127
//! y     = t[idx] + ((t[idx+1] - t[idx]) * frac + 64) >> 7
//! ```
//!
//! # Softmax exp
//!
//! 256 点。`exp_neg[d] = round(exp(-logit_scale × d) × 32767)`。
//! d は最大ロジットとの量子化コード差。

use crate::constants::{ACT_LUT_INTERP_BITS, ACT_LUT_LEN, EXP_LUT_LEN};

/// Q0.15 の 1.0 に相当する最大値
pub const Q15_ONE: i32 = i16::MAX as i32;

/// sigmoid / tanh テーブル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationTables {
    /// sigmoid: Q3.12 → Q0.15（[0, 32767]）
    pub sigmoid: Box<[i16; ACT_LUT_LEN]>,
    /// tanh: Q3.12 → Q0.15（[-32768, 32767]）
    pub tanh: Box<[i16; ACT_LUT_LEN]>,
}

impl ActivationTables {
    /// ゼロ初期化
    pub fn new() -> Self {
        Self {
            sigmoid: Box::new([0; ACT_LUT_LEN]),
            tanh: Box::new([0; ACT_LUT_LEN]),
        }
    }

    /// sigmoid(x)
    #[inline]
    pub fn sigmoid(&self, x: i16) -> i32 {
        interpolate(&self.sigmoid, x)
    }

    /// tanh(x)
    #[inline]
    pub fn tanh(&self, x: i16) -> i32 {
        interpolate(&self.tanh, x)
    }

    /// テーブルが保持するバイト数
    pub fn size_bytes(&self) -> usize {
        2 * ACT_LUT_LEN * std::mem::size_of::<i16>()
    }
}

impl Default for ActivationTables {
    fn default() -> Self {
        Self::new()
    }
}

/// 513 点テーブルの線形補間
#[inline]
fn interpolate(table: &[i16; ACT_LUT_LEN], x: i16) -> i32 {
    let u = (x as i32 + 32768) as u32;
    let idx = (u >> ACT_LUT_INTERP_BITS) as usize;
    let frac = (u & ((1 << ACT_LUT_INTERP_BITS) - 1)) as i32;
    let a = table[idx] as i32;
    let b = table[idx + 1] as i32;
    a + (((b - a) * frac + (1 << (ACT_LUT_INTERP_BITS - 1))) >> ACT_LUT_INTERP_BITS)
}

/// Softmax 用 exp(-x) テーブル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpTable {
    pub exp_neg: Box<[u16; EXP_LUT_LEN]>,
}

impl ExpTable {
    /// ゼロ初期化
    pub fn new() -> Self {
        Self { exp_neg: Box::new([0; EXP_LUT_LEN]) }
    }

    /// exp(-scale × d)（Q0.15）
    #[inline]
    pub fn exp_neg(&self, d: u8) -> u32 {
        self.exp_neg[d as usize] as u32
    }

    pub fn size_bytes(&self) -> usize {
        EXP_LUT_LEN * std::mem::size_of::<u16>()
    }
}

impl Default for ExpTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// テーブル生成（変換ツール側・テスト用）
// =============================================================================

/// テーブル点 i に対応する実数入力（-8 + i/32）
fn table_point(i: usize) -> f64 {
    -8.0 + i as f64 / 32.0
}

/// sigmoid / tanh テーブルを生成
pub fn build_activation_tables() -> ActivationTables {
    let mut tables = ActivationTables::new();
    for i in 0..ACT_LUT_LEN {
        let x = table_point(i);
        let s = 1.0 / (1.0 + (-x).exp());
        tables.sigmoid[i] = (s * 32768.0).round().clamp(0.0, Q15_ONE as f64) as i16;
        tables.tanh[i] = (x.tanh() * 32768.0).round().clamp(-32768.0, Q15_ONE as f64) as i16;
    }
    tables
}

/// Softmax 用テーブルを生成（`logit_scale` はロジットテンソルのスケール）
pub fn build_exp_table(logit_scale: f32) -> ExpTable {
    let mut table = ExpTable::new();
    for (d, e) in table.exp_neg.iter_mut().enumerate() {
        let v = (-(logit_scale as f64) * d as f64).exp();
        *e = (v * Q15_ONE as f64).round().clamp(0.0, Q15_ONE as f64) as u16;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 実数 → Q3.12
    fn q12(x: f64) -> i16 {
        (x * 4096.0).round().clamp(-32768.0, 32767.0) as i16
    }

    #[test]
    fn test_sigmoid_properties() {
        let t = build_activation_tables();

        // sigmoid(0) = 0.5 → 16384
        assert_eq!(t.sigmoid(0), 16384);

        // 飽和域
        assert!(t.sigmoid(i16::MIN) < 20);
        assert!(t.sigmoid(i16::MAX) > 32700);

        // 単調非減少
        let mut prev = t.sigmoid(i16::MIN);
        for x in (i16::MIN..=i16::MAX).step_by(7) {
            let y = t.sigmoid(x);
            assert!(y >= prev, "sigmoid should be non-decreasing at {x}");
            prev = y;
        }
    }

    #[test]
    fn test_tanh_properties() {
        let t = build_activation_tables();

        assert_eq!(t.tanh(0), 0);
        // 奇関数（丸め誤差 1 まで）
        for &x in &[100i16, 1000, 4096, 12000] {
            assert!((t.tanh(x) + t.tanh(-x)).abs() <= 1, "odd symmetry at {x}");
        }
        assert!(t.tanh(i16::MIN) <= -32700);
        assert!(t.tanh(i16::MAX) >= 32700);
    }

    #[test]
    fn test_interpolation_accuracy() {
        let t = build_activation_tables();
        for &x in &[-3.3f64, -1.0, -0.1, 0.2, 0.77, 2.5, 5.0] {
            let s = t.sigmoid(q12(x)) as f64 / 32768.0;
            let th = t.tanh(q12(x)) as f64 / 32768.0;
            assert!((s - 1.0 / (1.0 + (-x).exp())).abs() < 1e-3, "sigmoid({x}) = {s}");
            assert!((th - x.tanh()).abs() < 1e-3, "tanh({x}) = {th}");
        }
    }

    #[test]
    fn test_interpolation_hits_table_points() {
        let t = build_activation_tables();
        // 補間の端点は table の値そのもの
        for i in [0usize, 1, 255, 256, 511] {
            let x = (i as i32 * 128 - 32768) as i16;
            assert_eq!(t.sigmoid(x), t.sigmoid[i] as i32);
            assert_eq!(t.tanh(x), t.tanh[i] as i32);
        }
    }

    #[test]
    fn test_exp_table_decreasing() {
        let t = build_exp_table(0.05);

        // exp(0) = 1.0
        assert_eq!(t.exp_neg(0), Q15_ONE as u32);

        let mut prev = t.exp_neg(0);
        for d in 1..=255u8 {
            let curr = t.exp_neg(d);
            assert!(curr <= prev, "exp(-x) should be non-increasing at {d}");
            prev = curr;
        }
        // exp(-0.05 * 255) ≈ 2.9e-6 → 0
        assert_eq!(t.exp_neg(255), 0);
    }
}
