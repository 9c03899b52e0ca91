//! ベンチマーク結果のレポートと出力

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use microlstm_core::{MemoryReport, RuntimeConfig};

use crate::bench::{LatencyResult, ScenarioResult, StreamResult};

/// ベンチマークレポート
///
/// JSON ファイルへのシリアライズに対応しています。
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// 実行日時（RFC 3339）
    pub timestamp: String,
    /// 合成モデルのシード
    pub seed: u64,
    /// モデルファイルのバイト数
    pub model_bytes: usize,
    pub config: RuntimeConfig,
    pub scenario: ScenarioResult,
    pub latency: LatencyResult,
    pub memory: MemoryReport,
    /// 並列ストリームの結果（`--streams` 指定時のみ）
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamResult>,
}

impl BenchReport {
    pub fn new(
        seed: u64,
        model_bytes: usize,
        config: RuntimeConfig,
        scenario: ScenarioResult,
        latency: LatencyResult,
        memory: MemoryReport,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            seed,
            model_bytes,
            config,
            scenario,
            latency,
            memory,
            streams: Vec::new(),
        }
    }

    /// 全ラウンドを通した平均（ミリ秒 / invoke）
    pub fn average_ms_per_iter(&self) -> f64 {
        let iters: usize = self.latency.rounds.iter().map(|r| r.iters).sum();
        if iters == 0 {
            return 0.0;
        }
        let total: f64 = self.latency.rounds.iter().map(|r| r.total_ms).sum();
        total / iters as f64
    }

    /// 人間可読な形式で結果を出力
    pub fn print_summary(&self) {
        println!("\n=== Benchmark Summary ===");
        println!("Date: {}", self.timestamp);
        println!("Seed: {}", self.seed);
        println!("Model: {} bytes", self.model_bytes);

        println!("\n--- Scenario (input=3, state=1) ---");
        println!("Probabilities (int8): {:?}", self.scenario.probabilities_q);
        println!("Probabilities:        {:?}", self.scenario.probabilities);
        println!("StateOut:             {:?}", self.scenario.state_out);

        println!("\n--- Latency ---");
        println!("{:<8} {:<10} {:<14} {:<14}", "Round", "Iters", "Total (ms)", "ms/iter");
        println!("{}", "-".repeat(48));
        for round in &self.latency.rounds {
            println!(
                "{:<8} {:<10} {:<14.3} {:<14.6}",
                round.round, round.iters, round.total_ms, round.avg_ms_per_iter
            );
        }
        println!("Average: {:.6} ms/iter", self.average_ms_per_iter());
        println!("Saturated values: {}", self.latency.saturation.total());

        println!("\n--- Memory ---");
        println!("{}", self.memory);

        if let Some(timings) = &self.latency.timings {
            println!("\n--- Stage timings ---");
            print!("{}", timings.to_csv());
        }

        if !self.streams.is_empty() {
            println!("\n--- Streams ---");
            println!("{:<8} {:<10} {:<14} {:<12}", "Stream", "Steps", "Time (ms)", "Saturated");
            println!("{}", "-".repeat(46));
            for stream in &self.streams {
                println!(
                    "{:<8} {:<10} {:<14.3} {:<12}",
                    stream.stream,
                    stream.steps,
                    stream.elapsed_ms,
                    stream.saturation.total()
                );
            }
        }
    }

    /// JSON形式で保存
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create JSON file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).with_context(|| "Failed to write JSON")?;
        Ok(())
    }
}
