//! ClassificationHead: Dense (20 → 3) + Softmax
//!
//! Softmax は最大ロジットを引いてから exp テーブルを引く（オーバーフローしない）。
//!
//! ```text
//! d_i   = max_q − logit_q[i]                 (0..=255)
//! e_i   = exp_neg[d_i]                       (Q0.15)
//! p_i   = round(e_i × 2^16 / Σ e)            (Q0.16)
//! out_i = zp + round(p_i × 2^-16 / s_out)
//! ```

use crate::constants::{HIDDEN_DIM, NUM_CLASSES, PROB_FRAC_BITS};
use crate::error::ComputeError;
use crate::lut::ExpTable;
use crate::quant::{QuantizedMultiplier, SaturationReport, saturate_i8};
use crate::tensor::{QuantTable, TensorId};
use crate::weights::HeadWeights;

/// 分類ヘッド
pub struct ClassificationHead {
    weights: HeadWeights,
    exp: ExpTable,
    state_zero_point: i32,
    logits_zero_point: i32,
    probs_zero_point: i32,
    /// `s_state × s_head_w / s_logits`
    logit_multiplier: QuantizedMultiplier,
    /// `2^-16 / s_probs`
    prob_multiplier: QuantizedMultiplier,
}

impl ClassificationHead {
    pub fn new(weights: HeadWeights, exp: ExpTable, quant: &QuantTable) -> Self {
        let state = quant.get(TensorId::StateOut);
        let logits = quant.get(TensorId::Logits);
        let probs = quant.get(TensorId::Probabilities);
        let head_w = quant.get(TensorId::HeadWeight);

        Self {
            weights,
            exp,
            state_zero_point: state.zero_point,
            logits_zero_point: logits.zero_point,
            probs_zero_point: probs.zero_point,
            logit_multiplier: QuantizedMultiplier::from_real(
                state.scale as f64 * head_w.scale as f64 / logits.scale as f64,
            ),
            prob_multiplier: QuantizedMultiplier::from_real(
                2f64.powi(-(PROB_FRAC_BITS as i32)) / probs.scale as f64,
            ),
        }
    }

    /// h2 → 量子化ロジット
    pub fn logits(
        &self,
        hidden: &[i8; HIDDEN_DIM],
        saturation: &mut SaturationReport,
    ) -> Result<[i8; NUM_CLASSES], ComputeError> {
        let acc = self.weights.dense.propagate(hidden, self.state_zero_point, "head")?;

        let mut out = [0i8; NUM_CLASSES];
        for (o, &a) in out.iter_mut().zip(acc.iter()) {
            let q = self.logits_zero_point as i64 + self.logit_multiplier.apply(a as i64);
            *o = saturate_i8(q, &mut saturation.logits);
        }

        Ok(out)
    }

    /// 量子化ロジット → 量子化確率
    pub fn softmax(&self, logits: &[i8; NUM_CLASSES], saturation: &mut SaturationReport) -> [i8; NUM_CLASSES] {
        let max = logits.iter().copied().max().unwrap_or(i8::MIN);

        let mut e = [0u64; NUM_CLASSES];
        for (e, &l) in e.iter_mut().zip(logits) {
            // i8 同士の差なので 0..=255
            let d = (max as i32 - l as i32) as u8;
            *e = self.exp.exp_neg(d) as u64;
        }
        // 最大ロジットの項は exp_neg[0] > 0（読み込み時に検証済み）
        let sum: u64 = e.iter().sum::<u64>().max(1);

        let mut out = [0i8; NUM_CLASSES];
        for (o, &e) in out.iter_mut().zip(&e) {
            let p = ((e << PROB_FRAC_BITS) + sum / 2) / sum;
            let q = self.probs_zero_point as i64 + self.prob_multiplier.apply(p as i64);
            *o = saturate_i8(q, &mut saturation.probabilities);
        }

        out
    }

    /// h2 → 量子化確率
    pub fn forward(
        &self,
        hidden: &[i8; HIDDEN_DIM],
        saturation: &mut SaturationReport,
    ) -> Result<[i8; NUM_CLASSES], ComputeError> {
        let logits = self.logits(hidden, saturation)?;

        #[cfg(feature = "diagnostics")]
        log::info!("[head] logits={logits:?}");

        Ok(self.softmax(&logits, saturation))
    }

    pub fn weights(&self) -> &HeadWeights {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::{QuantParams, dequantize};
    use crate::synth::SyntheticModel;

    fn head() -> (ClassificationHead, QuantParams, QuantParams) {
        let artifact = SyntheticModel::random(4).into_artifact();
        let logits = artifact.quant.get(TensorId::Logits);
        let probs = artifact.quant.get(TensorId::Probabilities);
        (ClassificationHead::new(artifact.weights.head, artifact.softmax, &artifact.quant), logits, probs)
    }

    #[test]
    fn test_softmax_uniform() {
        let (head, _, probs) = head();
        let mut sat = SaturationReport::default();
        let out = head.softmax(&[10, 10, 10], &mut sat);

        // 1/3 ずつ
        for &q in &out {
            let p = dequantize(q, probs);
            assert!((p - 1.0 / 3.0).abs() <= probs.scale, "{p}");
        }
    }

    #[test]
    fn test_softmax_matches_float() {
        let (head, logit_p, probs) = head();
        let mut sat = SaturationReport::default();

        for logits in [[0i8, 20, -20], [127, -128, 0], [-5, -5, 40], [3, 2, 1]] {
            let out = head.softmax(&logits, &mut sat);

            let real: Vec<f64> = logits.iter().map(|&l| dequantize(l, logit_p) as f64).collect();
            let max = real.iter().cloned().fold(f64::MIN, f64::max);
            let exps: Vec<f64> = real.iter().map(|&x| (x - max).exp()).collect();
            let total: f64 = exps.iter().sum();

            for (i, &q) in out.iter().enumerate() {
                let expected = exps[i] / total;
                let got = dequantize(q, probs) as f64;
                assert!((got - expected).abs() <= 1.5 * probs.scale as f64, "{logits:?}[{i}]: {got} vs {expected}");
            }
        }
    }

    #[test]
    fn test_softmax_extreme_logits_do_not_overflow() {
        let (head, _, probs) = head();
        let mut sat = SaturationReport::default();

        let out = head.softmax(&[127, -128, -128], &mut sat);
        let p: Vec<f32> = out.iter().map(|&q| dequantize(q, probs)).collect();
        assert!(p[0] > 0.99 - probs.scale);
        assert!(p.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }

    #[test]
    fn test_forward_sums_to_one() {
        let (head, _, probs) = head();
        let mut sat = SaturationReport::default();

        for h in [-128i8, -10, 0, 33, 127] {
            let out = head.forward(&[h; HIDDEN_DIM], &mut sat).unwrap();
            let sum: f32 = out.iter().map(|&q| dequantize(q, probs)).sum();
            assert!((sum - 1.0).abs() <= 3.0 * probs.scale, "sum={sum}");
        }
    }
}
