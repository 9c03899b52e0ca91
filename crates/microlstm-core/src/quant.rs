//! アフィン量子化（int8 ↔ 実数）と整数リスケール
//!
//! `real = scale × (quantized − zero_point)`
//!
//! - [`quantize`] / [`dequantize`]: 境界テンソルの変換。範囲外は例外ではなく飽和（クランプ）。
//! - [`QuantizedMultiplier`]: 実数のリスケール係数を (Q0.31 仮数, 2 の冪指数) に分解したもの。
//!   推論中は整数乗算 + 丸めシフトのみで再量子化する。
//! - [`SaturationReport`]: 1 回の推論で発生した飽和の回数（情報提供のみ、推論は止めない）。

use serde::{Deserialize, Serialize};

/// int8 の表現範囲
pub const QMIN: i32 = i8::MIN as i32;
pub const QMAX: i32 = i8::MAX as i32;

/// テンソル単位の量子化パラメータ
///
/// 変換ツールがキャリブレーションで決めた値であり、ランタイムは再計算しない。
/// 不変条件: `scale` は有限かつ正、`zero_point` は [-128, 127]。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    /// 新規作成（不変条件を満たさなければ `None`）
    pub fn new(scale: f32, zero_point: i32) -> Option<Self> {
        let params = Self { scale, zero_point };
        params.is_valid().then_some(params)
    }

    /// 不変条件を満たすか
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.scale.is_finite() && self.scale > 0.0 && (QMIN..=QMAX).contains(&self.zero_point)
    }

    /// 量子化で表現できる実数の範囲 `[min, max]`
    pub fn real_range(&self) -> (f32, f32) {
        (dequantize(i8::MIN, *self), dequantize(i8::MAX, *self))
    }
}

/// 実数を int8 に量子化する（飽和あり）
///
/// `round(x / scale) + zero_point` を [-128, 127] にクランプ。丸めは 0 から遠い方向。
#[inline]
pub fn quantize(x: f32, params: QuantParams) -> i8 {
    quantize_saturating(x, params).0
}

/// 実数を int8 に量子化し、飽和したかどうかも返す
pub fn quantize_saturating(x: f32, params: QuantParams) -> (i8, bool) {
    let q = (x as f64 / params.scale as f64).round() + params.zero_point as f64;
    if q.is_nan() {
        // NaN は zero_point（実数 0）に寄せ、飽和として数える
        return (params.zero_point as i8, true);
    }
    if q < QMIN as f64 {
        (i8::MIN, true)
    } else if q > QMAX as f64 {
        (i8::MAX, true)
    } else {
        (q as i8, false)
    }
}

/// int8 を実数に戻す
#[inline]
pub fn dequantize(q: i8, params: QuantParams) -> f32 {
    params.scale * (q as i32 - params.zero_point) as f32
}

/// スライス全体を量子化
pub fn quantize_slice(xs: &[f32], params: QuantParams, out: &mut [i8]) -> usize {
    debug_assert_eq!(xs.len(), out.len());
    let mut saturated = 0;
    for (o, &x) in out.iter_mut().zip(xs) {
        let (q, sat) = quantize_saturating(x, params);
        *o = q;
        saturated += sat as usize;
    }
    saturated
}

/// スライス全体を逆量子化
pub fn dequantize_slice(qs: &[i8], params: QuantParams, out: &mut [f32]) {
    debug_assert_eq!(qs.len(), out.len());
    for (o, &q) in out.iter_mut().zip(qs) {
        *o = dequantize(q, params);
    }
}

// =============================================================================
// 整数リスケール
// =============================================================================

/// 0 から遠い方向への丸め付き算術右シフト
#[inline]
pub fn rounding_shift(v: i64, shift: u32) -> i64 {
    if shift == 0 {
        return v;
    }
    if shift >= 63 {
        return 0;
    }
    let v = v as i128;
    let half = 1i128 << (shift - 1);
    let r = if v >= 0 { (v + half) >> shift } else { -((half - v) >> shift) };
    r as i64
}

/// 実数のリスケール係数 `m = mantissa × 2^(exponent − 31)`
///
/// `mantissa` は [2^30, 2^31) の Q0.31 値。係数 0 は mantissa = 0 で表す。
/// 読み込み時に 1 度だけ計算し、推論中は整数演算のみを使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedMultiplier {
    pub mantissa: i32,
    pub exponent: i32,
}

impl QuantizedMultiplier {
    /// 表現できる最大指数（2^30 倍超の係数は飽和させる）
    const MAX_EXPONENT: i32 = 30;

    /// 実数係数から作成
    ///
    /// 2 倍 / 1/2 倍は浮動小数点で厳密なので、プラットフォームに依存せず同じ値になる。
    pub fn from_real(real: f64) -> Self {
        if !(real.is_finite() && real > 0.0) {
            return Self { mantissa: 0, exponent: 0 };
        }

        let mut frac = real;
        let mut exponent = 0i32;
        while frac >= 1.0 {
            frac /= 2.0;
            exponent += 1;
        }
        while frac < 0.5 {
            frac *= 2.0;
            exponent -= 1;
        }

        let mut mantissa = (frac * (1i64 << 31) as f64).round() as i64;
        if mantissa == 1i64 << 31 {
            mantissa /= 2;
            exponent += 1;
        }

        if exponent < -31 {
            return Self { mantissa: 0, exponent: 0 };
        }
        if exponent > Self::MAX_EXPONENT {
            return Self { mantissa: i32::MAX, exponent: Self::MAX_EXPONENT };
        }

        Self { mantissa: mantissa as i32, exponent }
    }

    /// `round(x × m)` を整数演算で計算
    #[inline]
    pub fn apply(&self, x: i64) -> i64 {
        let prod = x as i128 * self.mantissa as i128;
        let shift = 31 - self.exponent;
        let v = if shift > 0 {
            let shift = shift as u32;
            if shift >= 127 {
                0
            } else {
                let half = 1i128 << (shift - 1);
                if prod >= 0 { (prod + half) >> shift } else { -((half - prod) >> shift) }
            }
        } else {
            prod << (-shift) as u32
        };
        v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// 係数の近似実数値（テスト・ログ用）
    pub fn to_real(&self) -> f64 {
        self.mantissa as f64 * 2f64.powi(self.exponent - 31)
    }
}

/// i64 を int8 に飽和させる。飽和したら `counter` を加算。
#[inline]
pub fn saturate_i8(v: i64, counter: &mut u32) -> i8 {
    if v < QMIN as i64 {
        *counter += 1;
        i8::MIN
    } else if v > QMAX as i64 {
        *counter += 1;
        i8::MAX
    } else {
        v as i8
    }
}

/// i64 を i16 に飽和させる（LUT 定義域へのクランプ）
#[inline]
pub fn saturate_i16(v: i64) -> i16 {
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

// =============================================================================
// 飽和統計
// =============================================================================

/// 1 回の推論で発生した int8 飽和の回数（サイト別）
///
/// 飽和は定義された挙動であり推論を中断しない。
/// 多発する場合はキャリブレーションが不適切であることを示す。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaturationReport {
    /// Conv1D 出力の再量子化
    pub conv: u32,
    /// Embedding（Dense 出力）
    pub embedding: u32,
    /// セル状態 c1, c2
    pub cell_state: u32,
    /// 隠れ状態 h1, h2
    pub hidden: u32,
    /// ロジット
    pub logits: u32,
    /// 確率出力
    pub probabilities: u32,
}

impl SaturationReport {
    /// 合計
    pub fn total(&self) -> u32 {
        self.conv + self.embedding + self.cell_state + self.hidden + self.logits + self.probabilities
    }

    /// 別レポートを加算
    pub fn accumulate(&mut self, other: &SaturationReport) {
        self.conv += other.conv;
        self.embedding += other.embedding;
        self.cell_state += other.cell_state;
        self.hidden += other.hidden;
        self.logits += other.logits;
        self.probabilities += other.probabilities;
    }
}
