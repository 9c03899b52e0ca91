//! 読み込み済みモデルと純粋なステップ関数
//!
//! `Model` は読み込み後に不変（`Sync`）で、`Arc<Model>` で複数ストリームから共有できる。
//! 推論は `(InputFrame, StateIn, weights) → (ProbabilityVector, StateOut)` の純粋関数として提供する。

use crate::cell::RecurrentStageStack;
use crate::constants::{INPUT_LEN, NUM_CLASSES};
use crate::error::{ComputeError, LoadError};
use crate::feature::FeatureExtractor;
use crate::head::ClassificationHead;
use crate::io::read_model_bytes;
use crate::lut::{ActivationTables, ExpTable};
use crate::profile::{Stage, StageClock, StageTimings};
use crate::quant::SaturationReport;
use crate::state::RecurrentState;
use crate::tensor::{QuantTable, TensorId};
use crate::weights::ModelArtifact;

/// 1 ステップの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutput {
    /// 量子化確率（ProbabilityVector）
    pub probabilities: [i8; NUM_CLASSES],
    /// 更新後の状態（StateOut）
    pub state: RecurrentState,
    /// 飽和統計
    pub saturation: SaturationReport,
}

/// 読み込み済みモデル
pub struct Model {
    quant: QuantTable,
    feature: FeatureExtractor,
    stages: RecurrentStageStack,
    head: ClassificationHead,
    activations: ActivationTables,
    weight_bytes: usize,
    table_bytes: usize,
}

impl Model {
    /// MLSM バイト列から読み込み
    pub fn load(bytes: &[u8]) -> Result<Self, LoadError> {
        let artifact = read_model_bytes(bytes)?;
        Self::from_artifact(artifact)
    }

    /// 読み込み済みの内容からモデルを組み立て
    ///
    /// 量子化パラメータ間の整合性を検証し、再量子化係数を 1 度だけ計算する。
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, LoadError> {
        validate_quant_table(&artifact.quant)?;
        validate_exp_table(&artifact.softmax)?;
        artifact.weights.validate()?;

        let ModelArtifact { quant, weights, activations, softmax } = artifact;
        let weight_bytes = weights.size_bytes();
        let table_bytes = activations.size_bytes() + softmax.size_bytes();

        let feature = FeatureExtractor::new(weights.feature, &quant);
        let stages = RecurrentStageStack::new(weights.stage1, weights.stage2, &quant);
        let head = ClassificationHead::new(weights.head, softmax, &quant);

        log::info!(
            "Loaded model: conv1d(k=10,f=2) -> maxpool(2) -> dense(30->40) -> cell(40->20) -> cell(20->20) -> dense(20->3) -> softmax"
        );
        log::info!("  weights: {weight_bytes} bytes, tables: {table_bytes} bytes");
        for (tensor, params) in quant.iter().filter(|(t, _)| !t.is_weight()) {
            log::info!("  {tensor}: scale={} zero_point={}", params.scale, params.zero_point);
        }

        Ok(Self { quant, feature, stages, head, activations, weight_bytes, table_bytes })
    }

    /// 1 ステップ推論
    pub fn step(
        &self,
        frame: &[i8; INPUT_LEN],
        state: &RecurrentState,
    ) -> Result<StepOutput, ComputeError> {
        self.forward(frame, state, StageClock::disabled())
    }

    /// 1 ステップ推論（ステージ別の所要時間を `timings` に加算）
    pub fn step_profiled(
        &self,
        frame: &[i8; INPUT_LEN],
        state: &RecurrentState,
        timings: &mut StageTimings,
    ) -> Result<StepOutput, ComputeError> {
        self.forward(frame, state, StageClock::new(Some(timings)))
    }

    fn forward(
        &self,
        frame: &[i8; INPUT_LEN],
        state: &RecurrentState,
        mut clock: StageClock<'_>,
    ) -> Result<StepOutput, ComputeError> {
        let mut saturation = SaturationReport::default();

        let embedding = self.feature.forward(frame, &mut saturation)?;
        clock.lap(Stage::Feature);

        #[cfg(feature = "diagnostics")]
        log::info!("[embedding] {:?}", &embedding[..]);

        let next =
            self.stages.forward(&embedding, state, &self.activations, &mut saturation, &mut clock)?;

        let probabilities = self.head.forward(&next.h2, &mut saturation)?;
        clock.lap(Stage::Head);

        Ok(StepOutput { probabilities, state: next, saturation })
    }

    /// 量子化テーブル
    pub fn quant(&self) -> &QuantTable {
        &self.quant
    }

    /// 状態テンソルの実数 0 に対応する状態（コールドスタート用）
    pub fn zero_state(&self) -> RecurrentState {
        RecurrentState::zeroed(self.quant.get(TensorId::StateIn))
    }

    pub fn feature_extractor(&self) -> &FeatureExtractor {
        &self.feature
    }

    pub fn stages(&self) -> &RecurrentStageStack {
        &self.stages
    }

    pub fn head(&self) -> &ClassificationHead {
        &self.head
    }

    /// 重み・バイアスのバイト数
    pub fn weight_bytes(&self) -> usize {
        self.weight_bytes
    }

    /// 活性化テーブルのバイト数
    pub fn table_bytes(&self) -> usize {
        self.table_bytes
    }
}

/// 重みの対称性と状態パラメータの一致を検証
fn validate_quant_table(quant: &QuantTable) -> Result<(), LoadError> {
    for (tensor, params) in quant.iter() {
        if tensor.is_weight() && params.zero_point != 0 {
            return Err(LoadError::AsymmetricWeight { tensor, zero_point: params.zero_point });
        }
    }

    let state_in = quant.get(TensorId::StateIn);
    let state_out = quant.get(TensorId::StateOut);
    if state_in != state_out {
        return Err(LoadError::StateParamsMismatch {
            state_in: (state_in.scale, state_in.zero_point),
            state_out: (state_out.scale, state_out.zero_point),
        });
    }

    Ok(())
}

/// Softmax の分母が 0 にならないことを保証
fn validate_exp_table(table: &ExpTable) -> Result<(), LoadError> {
    if table.exp_neg(0) == 0 {
        return Err(LoadError::InvalidTable { table: "softmax exp", reason: "exp(0) entry is zero" });
    }
    if table.exp_neg.windows(2).any(|w| w[1] > w[0]) {
        return Err(LoadError::InvalidTable { table: "softmax exp", reason: "entries must be non-increasing" });
    }
    Ok(())
}
