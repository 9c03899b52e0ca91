//! ステージ別の計測とメモリ使用量
//!
//! `RuntimeConfig::profile_stages` 有効時のみ計測する。

use crate::constants::*;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// 計測対象のステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Feature,
    Stage1,
    Stage2,
    Head,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Feature, Stage::Stage1, Stage::Stage2, Stage::Head];

    /// CSV のタグ名
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Feature => "feature_extractor",
            Self::Stage1 => "stage1",
            Self::Stage2 => "stage2",
            Self::Head => "classification_head",
        }
    }
}

/// ステージ別の所要時間
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub feature: Duration,
    pub stage1: Duration,
    pub stage2: Duration,
    pub head: Duration,
}

impl StageTimings {
    pub fn get(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Feature => self.feature,
            Stage::Stage1 => self.stage1,
            Stage::Stage2 => self.stage2,
            Stage::Head => self.head,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut Duration {
        match stage {
            Stage::Feature => &mut self.feature,
            Stage::Stage1 => &mut self.stage1,
            Stage::Stage2 => &mut self.stage2,
            Stage::Head => &mut self.head,
        }
    }

    /// 合計
    pub fn total(&self) -> Duration {
        Stage::ALL.iter().map(|&s| self.get(s)).sum()
    }

    /// 別の計測値を加算
    pub fn accumulate(&mut self, other: &StageTimings) {
        for stage in Stage::ALL {
            *self.get_mut(stage) += other.get(stage);
        }
    }

    /// `tag,ticks` 形式の CSV（ticks はナノ秒）
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("tag,ticks\n");
        for stage in Stage::ALL {
            csv.push_str(&format!("{},{}\n", stage.tag(), self.get(stage).as_nanos()));
        }
        csv
    }
}

/// ステージ境界ごとに経過時間を記録する計測器
///
/// 計測先が無い場合は時刻を取得しない。
pub struct StageClock<'a> {
    timings: Option<&'a mut StageTimings>,
    last: Option<Instant>,
}

impl<'a> StageClock<'a> {
    pub fn new(timings: Option<&'a mut StageTimings>) -> Self {
        let last = timings.as_ref().map(|_| Instant::now());
        Self { timings, last }
    }

    /// 計測しない
    pub fn disabled() -> Self {
        Self { timings: None, last: None }
    }

    /// 前回の記録からの経過時間を `stage` に加算
    #[inline]
    pub fn lap(&mut self, stage: Stage) {
        if let (Some(timings), Some(last)) = (self.timings.as_deref_mut(), self.last) {
            let now = Instant::now();
            *timings.get_mut(stage) += now - last;
            self.last = Some(now);
        }
    }
}

/// 1 回の invoke で使う作業領域のバイト数
///
/// アキュムレータ（i32）と中間活性（i8）の合計。
pub const SCRATCH_BYTES: usize = CONV_OUT * 4
    + CONV_OUT
    + POOL_OUT
    + EMBED_DIM * 4
    + EMBED_DIM
    + 2 * (2 * GATE_ROWS * 4)
    + STATE_LEN
    + NUM_CLASSES * 4
    + NUM_CLASSES;

/// 境界 I/O バッファのバイト数（InputFrame + StateIn + Probabilities + StateOut）
pub const IO_BUFFER_BYTES: usize = INPUT_LEN + STATE_LEN + NUM_CLASSES + STATE_LEN;

/// メモリ使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryReport {
    /// 重み・バイアス
    pub weights: usize,
    /// 活性化テーブル（sigmoid, tanh, exp）
    pub activation_tables: usize,
    /// 境界 I/O バッファ
    pub io_buffers: usize,
    /// 推論中の作業領域
    pub scratch: usize,
}

impl MemoryReport {
    pub fn total(&self) -> usize {
        self.weights + self.activation_tables + self.io_buffers + self.scratch
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "weights:           {:>8} bytes", self.weights)?;
        writeln!(f, "activation tables: {:>8} bytes", self.activation_tables)?;
        writeln!(f, "io buffers:        {:>8} bytes", self.io_buffers)?;
        writeln!(f, "scratch:           {:>8} bytes", self.scratch)?;
        write!(f, "total:             {:>8} bytes", self.total())
    }
}
