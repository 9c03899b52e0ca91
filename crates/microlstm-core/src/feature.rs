//! FeatureExtractor
//!
//! ```text
//! InputFrame i8[40]
//!   → Conv1D (k=10, 2 filters) + ReLU → i8[31×2]
//!   → MaxPool (2)                      → i8[15×2] = flatten i8[30]
//!   → Dense (30 → 40)                  → Embedding i8[40]
//! ```

use crate::constants::{CONV_OUT, EMBED_DIM, INPUT_LEN, POOL_OUT};
use crate::error::ComputeError;
use crate::layers::max_pool;
use crate::quant::{QuantizedMultiplier, SaturationReport, saturate_i8};
use crate::tensor::{QuantTable, TensorId};
use crate::weights::FeatureWeights;

/// 特徴抽出器（重み + 読み込み時に計算した再量子化係数）
pub struct FeatureExtractor {
    weights: FeatureWeights,
    input_zero_point: i32,
    conv_zero_point: i32,
    embed_zero_point: i32,
    /// `s_input × s_conv_w / s_conv`
    conv_multiplier: QuantizedMultiplier,
    /// `s_conv × s_embed_w / s_embed`
    embed_multiplier: QuantizedMultiplier,
}

impl FeatureExtractor {
    pub fn new(weights: FeatureWeights, quant: &QuantTable) -> Self {
        let input = quant.get(TensorId::Input);
        let conv = quant.get(TensorId::ConvOut);
        let embed = quant.get(TensorId::Embedding);
        let conv_w = quant.get(TensorId::ConvWeight);
        let embed_w = quant.get(TensorId::EmbedWeight);

        Self {
            weights,
            input_zero_point: input.zero_point,
            conv_zero_point: conv.zero_point,
            embed_zero_point: embed.zero_point,
            conv_multiplier: QuantizedMultiplier::from_real(
                input.scale as f64 * conv_w.scale as f64 / conv.scale as f64,
            ),
            embed_multiplier: QuantizedMultiplier::from_real(
                conv.scale as f64 * embed_w.scale as f64 / embed.scale as f64,
            ),
        }
    }

    /// Conv1D + ReLU（channels_last: `out[p * 2 + f]`）
    pub fn conv_relu(
        &self,
        frame: &[i8; INPUT_LEN],
        saturation: &mut SaturationReport,
    ) -> Result<[i8; CONV_OUT], ComputeError> {
        let acc = self.weights.conv.propagate(frame, self.input_zero_point)?;

        let mut out = [0i8; CONV_OUT];
        for (o, &a) in out.iter_mut().zip(acc.iter()) {
            // ReLU は飽和判定の前に適用する（負側の切り上げは飽和ではない）
            let q = (self.conv_zero_point as i64 + self.conv_multiplier.apply(a as i64))
                .max(self.conv_zero_point as i64);
            *o = saturate_i8(q, &mut saturation.conv);
        }

        Ok(out)
    }

    /// 全結合で Embedding へ射影
    pub fn embed(
        &self,
        pooled: &[i8; POOL_OUT],
        saturation: &mut SaturationReport,
    ) -> Result<[i8; EMBED_DIM], ComputeError> {
        let acc = self.weights.dense.propagate(pooled, self.conv_zero_point, "embedding")?;

        let mut out = [0i8; EMBED_DIM];
        for (o, &a) in out.iter_mut().zip(acc.iter()) {
            let q = self.embed_zero_point as i64 + self.embed_multiplier.apply(a as i64);
            *o = saturate_i8(q, &mut saturation.embedding);
        }

        Ok(out)
    }

    /// 1 フレームを Embedding に変換
    pub fn forward(
        &self,
        frame: &[i8; INPUT_LEN],
        saturation: &mut SaturationReport,
    ) -> Result<[i8; EMBED_DIM], ComputeError> {
        let conv = self.conv_relu(frame, saturation)?;
        let pooled = max_pool(&conv);

        #[cfg(feature = "diagnostics")]
        log::info!("[feature] conv={:?} pooled={:?}", &conv[..], &pooled[..]);

        self.embed(&pooled, saturation)
    }

    pub fn weights(&self) -> &FeatureWeights {
        &self.weights
    }
}
