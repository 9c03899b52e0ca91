//! ゲート付き再帰セルと 2 段スタック
//!
//! 1 ステップ分のセル更新（ゲート行順: input, forget, candidate, output）:
//!
//! ```text
//! i = σ(W_i x + U_i h + b_i)
//! f = σ(W_f x + U_f h + b_f)
//! g = tanh(W_g x + U_g h + b_g)
//! o = σ(W_o x + U_o h + b_o)
//! c' = f ⊙ c + i ⊙ g
//! h' = o ⊙ tanh(c')
//! ```
//!
//! # 固定小数点
//!
//! - ゲート前活性: Q3.12（i16 に飽和させてから LUT）
//! - ゲート出力・tanh 出力: Q0.15
//! - c, h: 状態テンソルの量子化パラメータ（StateIn = StateOut）で int8 に戻す

use crate::constants::{ACT_FRAC_BITS, EMBED_DIM, GATE_FRAC_BITS, GATE_ROWS, HIDDEN_DIM};
use crate::error::ComputeError;
use crate::lut::ActivationTables;
use crate::profile::{Stage, StageClock};
use crate::quant::{
    QuantParams, QuantizedMultiplier, SaturationReport, rounding_shift, saturate_i8, saturate_i16,
};
use crate::state::{CellState, RecurrentState};
use crate::tensor::{QuantTable, TensorId};
use crate::weights::CellWeights;

/// ゲート番号（ゲート行ブロックの並び）
const GATE_INPUT: usize = 0;
const GATE_FORGET: usize = 1;
const GATE_CANDIDATE: usize = 2;
const GATE_OUTPUT: usize = 3;

/// ゲート付き再帰セル（入力次元 `IN`）
pub struct GatedCell<const IN: usize> {
    name: &'static str,
    weights: CellWeights<IN>,
    input_zero_point: i32,
    state_zero_point: i32,
    /// `s_in × s_wx / 2^-12`
    input_to_gate: QuantizedMultiplier,
    /// `s_state × s_wh / 2^-12`
    recurrent_to_gate: QuantizedMultiplier,
    /// `s_state / 2^-12`
    state_to_gate: QuantizedMultiplier,
    /// `2^-15 / s_state`
    q15_to_state: QuantizedMultiplier,
}

impl<const IN: usize> GatedCell<IN> {
    /// 作成
    ///
    /// - `input`: 入力活性の量子化パラメータ
    /// - `state`: h / c の量子化パラメータ
    /// - `input_weight_scale`, `recurrent_weight_scale`: 対称量子化された重みのスケール
    pub fn new(
        name: &'static str,
        weights: CellWeights<IN>,
        input: QuantParams,
        state: QuantParams,
        input_weight_scale: f32,
        recurrent_weight_scale: f32,
    ) -> Self {
        let gate_unit = 2f64.powi(-(GATE_FRAC_BITS as i32));
        let act_unit = 2f64.powi(-(ACT_FRAC_BITS as i32));
        let s_state = state.scale as f64;

        Self {
            name,
            weights,
            input_zero_point: input.zero_point,
            state_zero_point: state.zero_point,
            input_to_gate: QuantizedMultiplier::from_real(
                input.scale as f64 * input_weight_scale as f64 / gate_unit,
            ),
            recurrent_to_gate: QuantizedMultiplier::from_real(
                s_state * recurrent_weight_scale as f64 / gate_unit,
            ),
            state_to_gate: QuantizedMultiplier::from_real(s_state / gate_unit),
            q15_to_state: QuantizedMultiplier::from_real(act_unit / s_state),
        }
    }

    /// 1 ステップ更新
    pub fn step(
        &self,
        input: &[i8; IN],
        prev: &CellState,
        tables: &ActivationTables,
        saturation: &mut SaturationReport,
    ) -> Result<CellState, ComputeError> {
        let acc_x = self.weights.input.propagate(input, self.input_zero_point, self.name)?;
        let acc_h = self.weights.recurrent.propagate(&prev.h, self.state_zero_point, self.name)?;

        let zp = self.state_zero_point as i64;
        let mut next = CellState { h: [0; HIDDEN_DIM], c: [0; HIDDEN_DIM] };

        for j in 0..HIDDEN_DIM {
            let pre = |gate: usize| -> i16 {
                let row = gate * HIDDEN_DIM + j;
                saturate_i16(
                    self.input_to_gate.apply(acc_x[row] as i64)
                        + self.recurrent_to_gate.apply(acc_h[row] as i64),
                )
            };

            // Q0.15
            let i = tables.sigmoid(pre(GATE_INPUT)) as i64;
            let f = tables.sigmoid(pre(GATE_FORGET)) as i64;
            let g = tables.tanh(pre(GATE_CANDIDATE)) as i64;
            let o = tables.sigmoid(pre(GATE_OUTPUT)) as i64;

            // c' = f ⊙ c + i ⊙ g（状態の量子化単位）
            let c_prev = prev.c[j] as i64 - zp;
            let fc = rounding_shift(f * c_prev, ACT_FRAC_BITS);
            let ig = self.q15_to_state.apply(rounding_shift(i * g, ACT_FRAC_BITS));
            let c_q = saturate_i8(fc + ig + zp, &mut saturation.cell_state);

            // h' = o ⊙ tanh(c')（飽和後の c' を使う）
            let c_gate = saturate_i16(self.state_to_gate.apply(c_q as i64 - zp));
            let tc = tables.tanh(c_gate) as i64;
            let h = self.q15_to_state.apply(rounding_shift(o * tc, ACT_FRAC_BITS));
            let h_q = saturate_i8(h + zp, &mut saturation.hidden);

            next.c[j] = c_q;
            next.h[j] = h_q;
        }

        Ok(next)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn weights(&self) -> &CellWeights<IN> {
        &self.weights
    }
}

/// 2 段のセルスタック
///
/// Stage 1 は Embedding、Stage 2 は h1_out を入力とする。
pub struct RecurrentStageStack {
    pub stage1: GatedCell<EMBED_DIM>,
    pub stage2: GatedCell<HIDDEN_DIM>,
}

impl RecurrentStageStack {
    pub fn new(
        stage1: CellWeights<EMBED_DIM>,
        stage2: CellWeights<HIDDEN_DIM>,
        quant: &QuantTable,
    ) -> Self {
        let state = quant.get(TensorId::StateIn);
        Self {
            stage1: GatedCell::new(
                "stage1",
                stage1,
                quant.get(TensorId::Embedding),
                state,
                quant.get(TensorId::Stage1InputWeight).scale,
                quant.get(TensorId::Stage1RecurrentWeight).scale,
            ),
            stage2: GatedCell::new(
                "stage2",
                stage2,
                state,
                state,
                quant.get(TensorId::Stage2InputWeight).scale,
                quant.get(TensorId::Stage2RecurrentWeight).scale,
            ),
        }
    }

    /// 2 段を順に 1 ステップ進める
    pub fn forward(
        &self,
        embedding: &[i8; EMBED_DIM],
        state: &RecurrentState,
        tables: &ActivationTables,
        saturation: &mut SaturationReport,
        clock: &mut StageClock<'_>,
    ) -> Result<RecurrentState, ComputeError> {
        let s1 = self.stage1.step(embedding, &state.stage1(), tables, saturation)?;
        clock.lap(Stage::Stage1);

        #[cfg(feature = "diagnostics")]
        log::info!("[stage1] h={:?} c={:?}", s1.h, s1.c);

        let s2 = self.stage2.step(&s1.h, &state.stage2(), tables, saturation)?;
        clock.lap(Stage::Stage2);

        #[cfg(feature = "diagnostics")]
        log::info!("[stage2] h={:?} c={:?}", s2.h, s2.c);

        Ok(RecurrentState::from_stages(s1, s2))
    }
}

// ゲート行数とゲート番号の整合性
const _: () = assert!(GATE_OUTPUT + 1 == GATE_ROWS / HIDDEN_DIM);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lut::build_activation_tables;
    use crate::quant::dequantize;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    const IN: usize = 8;

    fn params(scale: f32, zero_point: i32) -> QuantParams {
        QuantParams::new(scale, zero_point).unwrap()
    }

    fn random_cell(seed: u64) -> (CellWeights<IN>, f32, f32) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut w = CellWeights::<IN>::new();
        for v in w.input.weight.iter_mut() {
            *v = rng.random_range(-127..=127);
        }
        for v in w.recurrent.weight.iter_mut() {
            *v = rng.random_range(-127..=127);
        }
        for b in w.input.bias.iter_mut() {
            *b = rng.random_range(-2000..=2000);
        }
        (w, 0.6 / 127.0, 0.5 / 127.0)
    }

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn test_step_matches_float_reference() {
        let input_p = params(0.04, 3);
        let state_p = params(1.0 / 64.0, 0);
        let (weights, swx, swh) = random_cell(5);

        // 参照計算用に重みを複製
        let wx: Vec<f64> = weights.input.weight.iter().map(|&w| w as f64 * swx as f64).collect();
        let wh: Vec<f64> = weights.recurrent.weight.iter().map(|&w| w as f64 * swh as f64).collect();
        let b: Vec<f64> =
            weights.input.bias.iter().map(|&b| b as f64 * input_p.scale as f64 * swx as f64).collect();

        let cell = GatedCell::<IN>::new("test", weights, input_p, state_p, swx, swh);
        let tables = build_activation_tables();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        for _ in 0..20 {
            let mut x = [0i8; IN];
            for v in x.iter_mut() {
                *v = rng.random_range(-60..=60);
            }
            let mut prev = CellState::filled(0);
            for j in 0..HIDDEN_DIM {
                prev.h[j] = rng.random_range(-60..=60);
                prev.c[j] = rng.random_range(-100..=100);
            }

            let mut sat = SaturationReport::default();
            let next = cell.step(&x, &prev, &tables, &mut sat).unwrap();

            let xr: Vec<f64> = x.iter().map(|&q| dequantize(q, input_p) as f64).collect();
            let hr: Vec<f64> = prev.h.iter().map(|&q| dequantize(q, state_p) as f64).collect();
            for j in 0..HIDDEN_DIM {
                let gate = |g: usize| {
                    let row = g * HIDDEN_DIM + j;
                    let mut acc = b[row];
                    for k in 0..IN {
                        acc += wx[row * IN + k] * xr[k];
                    }
                    for k in 0..HIDDEN_DIM {
                        acc += wh[row * HIDDEN_DIM + k] * hr[k];
                    }
                    acc.clamp(-8.0, 8.0)
                };
                let i = sigmoid(gate(GATE_INPUT));
                let f = sigmoid(gate(GATE_FORGET));
                let g = gate(GATE_CANDIDATE).tanh();
                let o = sigmoid(gate(GATE_OUTPUT));
                let c = f * dequantize(prev.c[j], state_p) as f64 + i * g;
                let c = c.clamp(-2.0, 127.0 / 64.0);
                let h = o * c.tanh();

                let c_got = dequantize(next.c[j], state_p) as f64;
                let h_got = dequantize(next.h[j], state_p) as f64;
                assert!((c_got - c).abs() <= 2.0 / 64.0, "c[{j}]: {c_got} vs {c}");
                assert!((h_got - h).abs() <= 2.0 / 64.0, "h[{j}]: {h_got} vs {h}");
            }
        }
    }

    #[test]
    fn test_zero_weights_keep_zero_state() {
        let state_p = params(1.0 / 64.0, 0);
        let cell = GatedCell::<IN>::new("test", CellWeights::new(), params(0.04, 0), state_p, 0.01, 0.01);
        let tables = build_activation_tables();
        let mut sat = SaturationReport::default();

        let next = cell.step(&[50; IN], &CellState::filled(0), &tables, &mut sat).unwrap();
        assert_eq!(next, CellState::filled(0));
        assert_eq!(sat.total(), 0);
    }

    #[test]
    fn test_forget_gate_halves_memory() {
        // 全重み 0 → 全ゲート σ(0) = 0.5、候補 tanh(0) = 0 → c' = c / 2
        let state_p = params(1.0 / 64.0, 0);
        let cell = GatedCell::<IN>::new("test", CellWeights::new(), params(0.04, 0), state_p, 0.01, 0.01);
        let tables = build_activation_tables();
        let mut sat = SaturationReport::default();

        let mut prev = CellState::filled(0);
        prev.c = [64; HIDDEN_DIM]; // 1.0
        let next = cell.step(&[0; IN], &prev, &tables, &mut sat).unwrap();
        assert!(next.c.iter().all(|&c| c == 32));
        // h = 0.5 × tanh(0.5) ≈ 0.231 → 14.8 → 15
        assert!(next.h.iter().all(|&h| (14..=15).contains(&h)), "{:?}", next.h);
    }

    #[test]
    fn test_cell_state_saturation_is_counted() {
        // forget バイアス大 + candidate バイアス大 → c が上限に張り付く
        let state_p = params(1.0 / 64.0, 0);
        let mut weights = CellWeights::<IN>::new();
        for j in 0..HIDDEN_DIM {
            weights.input.bias[GATE_INPUT * HIDDEN_DIM + j] = 1_000_000;
            weights.input.bias[GATE_FORGET * HIDDEN_DIM + j] = 1_000_000;
            weights.input.bias[GATE_CANDIDATE * HIDDEN_DIM + j] = 1_000_000;
        }
        let cell = GatedCell::<IN>::new("test", weights, params(0.04, 0), state_p, 0.01, 0.01);
        let tables = build_activation_tables();
        let mut sat = SaturationReport::default();

        let mut prev = CellState::filled(0);
        prev.c = [127; HIDDEN_DIM];
        let next = cell.step(&[0; IN], &prev, &tables, &mut sat).unwrap();
        assert!(next.c.iter().all(|&c| c == 127));
        assert_eq!(sat.cell_state, HIDDEN_DIM as u32);
    }
}
