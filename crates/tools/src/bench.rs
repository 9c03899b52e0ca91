//! ベンチマーク実行

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::Serialize;

use microlstm_core::constants::{INPUT_LEN, STATE_LEN};
use microlstm_core::{Model, Runtime, RuntimeConfig, SaturationReport, StageTimings};

// =============================================================================
// 定数定義
// =============================================================================

/// 参照シナリオの入力フレーム値
pub const SCENARIO_INPUT: i8 = 3;

/// 参照シナリオの StateIn 値
pub const SCENARIO_STATE: i8 = 1;

/// ストリーム用ランダムフレームの値域
const STREAM_FRAME_RANGE: std::ops::RangeInclusive<i8> = -40..=40;

// =============================================================================
// 構造体定義
// =============================================================================

/// 参照シナリオの結果
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// 確率出力（int8）
    pub probabilities_q: Vec<i8>,
    /// 確率出力（実数）
    pub probabilities: Vec<f32>,
    /// StateOut（int8, 80 要素）
    pub state_out: Vec<i8>,
    pub saturation: SaturationReport,
}

/// 1 ラウンドのレイテンシ
#[derive(Debug, Clone, Serialize)]
pub struct RoundResult {
    /// ラウンド番号（0 始まり）
    pub round: usize,
    pub iters: usize,
    /// 合計時間（ミリ秒）
    pub total_ms: f64,
    /// 1 invoke あたりの平均時間（ミリ秒）
    pub avg_ms_per_iter: f64,
}

/// レイテンシ計測の結果
#[derive(Debug, Clone, Serialize)]
pub struct LatencyResult {
    pub rounds: Vec<RoundResult>,
    /// 全 invoke のステージ別合計（`profile_stages` 有効時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<StageTimings>,
    /// 全 invoke の飽和回数の合計
    pub saturation: SaturationReport,
}

/// 1 ストリームの結果
#[derive(Debug, Clone, Serialize)]
pub struct StreamResult {
    pub stream: usize,
    pub steps: usize,
    /// 最終ステップの確率出力（実数）
    pub final_probabilities: Vec<f32>,
    /// 最終ステップの StateOut
    pub final_state: Vec<i8>,
    /// 全ステップの飽和回数の合計
    pub saturation: SaturationReport,
    /// 所要時間（ミリ秒）
    pub elapsed_ms: f64,
}

// =============================================================================
// 実行
// =============================================================================

/// 参照シナリオ（入力全て 3、状態全て 1）で 1 回推論する
pub fn run_scenario(runtime: &mut Runtime) -> Result<ScenarioResult> {
    runtime.set_input(0, &[SCENARIO_INPUT; INPUT_LEN])?;
    runtime.set_input(1, &[SCENARIO_STATE; STATE_LEN])?;
    let result = runtime.invoke().context("Scenario invoke failed")?;

    let probabilities_q = runtime.get_output(0)?.to_vec();
    let state_out = runtime.get_output(1)?.to_vec();
    let probabilities =
        runtime.probabilities().map(|p| p.to_vec()).context("Probabilities not ready")?;

    Ok(ScenarioResult { probabilities_q, probabilities, state_out, saturation: result.saturation })
}

/// `rounds` ラウンド × `iters` 回の invoke を計測する
///
/// 入力は参照シナリオのものを束縛する。
pub fn run_latency(runtime: &mut Runtime, iters: usize, rounds: usize) -> Result<LatencyResult> {
    runtime.set_input(0, &[SCENARIO_INPUT; INPUT_LEN])?;
    runtime.set_input(1, &[SCENARIO_STATE; STATE_LEN])?;

    let mut results = Vec::with_capacity(rounds);
    let mut timings: Option<StageTimings> = None;
    let mut saturation = SaturationReport::default();

    for round in 0..rounds {
        let start = Instant::now();
        for _ in 0..iters {
            let result = runtime.invoke().with_context(|| format!("Invoke failed in round {round}"))?;
            saturation.accumulate(&result.saturation);
            if let Some(t) = result.timings {
                timings.get_or_insert_with(StageTimings::default).accumulate(&t);
            }
        }
        let total_ms = start.elapsed().as_secs_f64() * 1000.0;
        let avg_ms_per_iter = if iters > 0 { total_ms / iters as f64 } else { 0.0 };
        log::debug!("round {round}: {avg_ms_per_iter:.6} ms/iter");
        results.push(RoundResult { round, iters, total_ms, avg_ms_per_iter });
    }

    Ok(LatencyResult { rounds: results, timings, saturation })
}

/// 独立した `streams` 本のストリームを並列に実行する
///
/// 各ストリームは専用の Runtime を持ち、StateOut を次の StateIn に戻す。
/// フレームは `seed + stream` から生成するので、結果はストリーム数に依存しない。
pub fn run_streams(
    model: Arc<Model>,
    config: &RuntimeConfig,
    streams: usize,
    steps: usize,
    seed: u64,
) -> Result<Vec<StreamResult>> {
    (0..streams)
        .into_par_iter()
        .map(|stream| {
            let runtime = Runtime::from_model(Arc::clone(&model), config.clone());
            run_stream(runtime, stream, steps, seed.wrapping_add(stream as u64))
        })
        .collect()
}

fn run_stream(mut runtime: Runtime, stream: usize, steps: usize, seed: u64) -> Result<StreamResult> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut frame = [0i8; INPUT_LEN];
    let mut state = [0i8; STATE_LEN];
    let mut saturation = SaturationReport::default();

    let start = Instant::now();
    for step in 0..steps {
        for v in frame.iter_mut() {
            *v = rng.random_range(STREAM_FRAME_RANGE);
        }
        runtime.set_input(0, &frame)?;
        runtime.set_input(1, &state)?;
        let result = runtime
            .invoke()
            .with_context(|| format!("Stream {stream} failed at step {step}"))?;
        saturation.accumulate(&result.saturation);
        state.copy_from_slice(runtime.get_output(1)?);
    }
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let final_probabilities = runtime.probabilities().map(|p| p.to_vec()).unwrap_or_default();
    log::debug!("stream {stream}: {steps} steps in {elapsed_ms:.3} ms");

    Ok(StreamResult {
        stream,
        steps,
        final_probabilities,
        final_state: state.to_vec(),
        saturation,
        elapsed_ms,
    })
}
