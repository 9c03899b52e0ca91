//! 合成モデルによるストリーミング推論ベンチマーク
//!
//! 参照シナリオ（入力全て 3、状態全て 1）の出力、ラウンドごとの平均レイテンシ、
//! メモリ使用量、ステージ別所要時間を表示する。
//!
//! # 使用例
//!
//! ```bash
//! cargo run --release -p tools --bin stream_bench -- --iters 1000 --rounds 5
//!
//! # 並列ストリームと JSON レポート
//! cargo run --release -p tools --bin stream_bench -- --streams 8 --steps 500 --report bench.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use microlstm_core::synth::SyntheticModel;
use microlstm_core::{Model, Runtime, RuntimeConfig};
use tools::bench::{run_latency, run_scenario, run_streams};
use tools::report::BenchReport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Benchmark the quantized streaming classifier runtime")]
struct Cli {
    /// 合成モデルのシード
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// 1 ラウンドあたりの invoke 回数
    #[arg(long, default_value_t = 1000)]
    iters: usize,

    /// ラウンド数
    #[arg(long, default_value_t = 5)]
    rounds: usize,

    /// 並列ストリーム数（0 で無効）
    #[arg(long, default_value_t = 0)]
    streams: usize,

    /// 1 ストリームあたりのステップ数
    #[arg(long, default_value_t = 1000)]
    steps: usize,

    /// ランタイム設定（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON レポートの出力先
    #[arg(long)]
    report: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    let Some(path) = path else {
        // ベンチマークではステージ計測を既定で有効にする
        return Ok(RuntimeConfig { profile_stages: true, ..Default::default() });
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config: {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.rounds == 0 || cli.iters == 0 {
        bail!("--rounds and --iters must be positive");
    }

    let config = load_config(cli.config.as_ref())?;
    log::info!("config: {config:?}");

    let bytes = SyntheticModel::random(cli.seed).to_bytes();
    let model = Arc::new(Model::load(&bytes).context("Failed to load synthetic model")?);
    let mut runtime = Runtime::from_model(Arc::clone(&model), config.clone());

    let scenario = run_scenario(&mut runtime)?;
    println!("Output: {:?}", scenario.probabilities_q);

    let latency = run_latency(&mut runtime, cli.iters, cli.rounds)?;
    for round in &latency.rounds {
        println!("Round {}: {:.6} ms/iter", round.round, round.avg_ms_per_iter);
    }

    let mut report = BenchReport::new(
        cli.seed,
        bytes.len(),
        config.clone(),
        scenario,
        latency,
        runtime.memory_report(),
    );

    if cli.streams > 0 {
        log::info!("running {} streams x {} steps", cli.streams, cli.steps);
        report.streams = run_streams(model, &config, cli.streams, cli.steps, cli.seed)?;
    }

    report.print_summary();

    if let Some(path) = &cli.report {
        report.save_json(path)?;
        log::info!("report written to {}", path.display());
    }

    Ok(())
}
