//! 合成モデル（未学習のランダム重み）
//!
//! ベンチマークとテスト用。キャリブレーションは行わず、量子化パラメータは固定値を使う。
//! 重みは Glorot 一様分布の範囲 `±sqrt(6 / (fan_in + fan_out))` を int8 全域に対応させる。
//! セルのバイアスは forget ゲートに +1.0 を加える（unit forget bias）。

use crate::constants::*;
use crate::layers::Affine;
use crate::lut::{build_activation_tables, build_exp_table};
use crate::quant::QuantParams;
use crate::tensor::{QuantTable, TensorId};
use crate::weights::{CellWeights, ModelArtifact, ModelWeights};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// ランダムバイアスの実数範囲
const BIAS_RANGE: f64 = 0.1;

/// Glorot 一様分布の上限
fn glorot_limit(fan_in: usize, fan_out: usize) -> f32 {
    (6.0 / (fan_in + fan_out) as f32).sqrt()
}

/// 対称量子化された重みのパラメータ（int8 の ±127 が ±limit）
fn weight_params(fan_in: usize, fan_out: usize) -> QuantParams {
    QuantParams { scale: glorot_limit(fan_in, fan_out) / 127.0, zero_point: 0 }
}

/// 合成モデル
pub struct SyntheticModel {
    artifact: ModelArtifact,
}

impl SyntheticModel {
    /// 固定の量子化パラメータ
    pub fn quant_table() -> QuantTable {
        let mut params = [QuantParams { scale: 1.0, zero_point: 0 }; TensorId::COUNT];
        let mut set = |id: TensorId, scale: f32, zero_point: i32| {
            params[id.index()] = QuantParams { scale, zero_point };
        };

        set(TensorId::Input, 0.05, 0);
        set(TensorId::StateIn, 1.0 / 64.0, 0);
        set(TensorId::StateOut, 1.0 / 64.0, 0);
        // ReLU 後なので [0, 5.1]
        set(TensorId::ConvOut, 0.02, -128);
        set(TensorId::Embedding, 0.04, 0);
        set(TensorId::Logits, 0.05, 0);
        set(TensorId::Probabilities, 1.0 / 256.0, -128);

        // Keras の Conv1D は fan = kernel × channels
        let conv = weight_params(CONV_KERNEL, CONV_KERNEL * CONV_FILTERS);
        let embed = weight_params(POOL_OUT, EMBED_DIM);
        let s1_in = weight_params(EMBED_DIM, GATE_ROWS);
        let s1_rec = weight_params(HIDDEN_DIM, GATE_ROWS);
        let s2_in = weight_params(HIDDEN_DIM, GATE_ROWS);
        let s2_rec = weight_params(HIDDEN_DIM, GATE_ROWS);
        let head = weight_params(HIDDEN_DIM, NUM_CLASSES);
        for (id, p) in [
            (TensorId::ConvWeight, conv),
            (TensorId::EmbedWeight, embed),
            (TensorId::Stage1InputWeight, s1_in),
            (TensorId::Stage1RecurrentWeight, s1_rec),
            (TensorId::Stage2InputWeight, s2_in),
            (TensorId::Stage2RecurrentWeight, s2_rec),
            (TensorId::HeadWeight, head),
        ] {
            set(id, p.scale, p.zero_point);
        }

        QuantTable::new(params)
    }

    /// 全重み 0 のモデル（退化の検出用）
    pub fn zeroed() -> Self {
        let quant = Self::quant_table();
        let softmax = build_exp_table(quant.get(TensorId::Logits).scale);
        Self {
            artifact: ModelArtifact {
                quant,
                weights: ModelWeights::new(),
                activations: build_activation_tables(),
                softmax,
            },
        }
    }

    /// シードから決定的に生成したランダム重みのモデル
    pub fn random(seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let quant = Self::quant_table();
        let mut weights = ModelWeights::new();

        for w in weights.feature.conv.weight.iter_mut() {
            *w = rng.random_range(-127..=127);
        }

        let bias_scale = |input: TensorId, weight: TensorId| {
            quant.get(input).scale as f64 * quant.get(weight).scale as f64
        };

        fill_affine(
            &mut rng,
            &mut weights.feature.dense,
            bias_scale(TensorId::ConvOut, TensorId::EmbedWeight),
        );
        fill_cell(
            &mut rng,
            &mut weights.stage1,
            bias_scale(TensorId::Embedding, TensorId::Stage1InputWeight),
        );
        fill_cell(
            &mut rng,
            &mut weights.stage2,
            bias_scale(TensorId::StateIn, TensorId::Stage2InputWeight),
        );
        fill_affine(
            &mut rng,
            &mut weights.head.dense,
            bias_scale(TensorId::StateOut, TensorId::HeadWeight),
        );

        let softmax = build_exp_table(quant.get(TensorId::Logits).scale);
        Self {
            artifact: ModelArtifact { quant, weights, activations: build_activation_tables(), softmax },
        }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn into_artifact(self) -> ModelArtifact {
        self.artifact
    }

    /// MLSM v1 バイト列
    pub fn to_bytes(&self) -> Vec<u8> {
        self.artifact.to_bytes()
    }
}

/// 実数バイアスを量子化（スケール = 入力スケール × 重みスケール）
fn quantize_bias(real: f64, scale: f64) -> i32 {
    (real / scale).round() as i32
}

fn fill_affine<const IN: usize, const OUT: usize>(
    rng: &mut Xoshiro256PlusPlus,
    layer: &mut Affine<IN, OUT>,
    bias_scale: f64,
) {
    for w in layer.weight.iter_mut() {
        *w = rng.random_range(-127..=127);
    }
    for b in layer.bias.iter_mut() {
        *b = quantize_bias(rng.random_range(-BIAS_RANGE..=BIAS_RANGE), bias_scale);
    }
}

fn fill_cell<const IN: usize>(rng: &mut Xoshiro256PlusPlus, cell: &mut CellWeights<IN>, bias_scale: f64) {
    fill_affine(rng, &mut cell.input, bias_scale);
    for w in cell.recurrent.weight.iter_mut() {
        *w = rng.random_range(-127..=127);
    }

    // forget ゲート（ゲート行ブロック 1）に +1.0
    for b in cell.input.bias[HIDDEN_DIM..2 * HIDDEN_DIM].iter_mut() {
        *b += quantize_bias(1.0, bias_scale);
    }
}
