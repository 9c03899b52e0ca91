//! InferenceRuntime
//!
//! テンソル番号で入出力を受け渡すインタプリタ風の API。
//!
//! ```text
//! load → set_input(0, frame) → set_input(1, state) → invoke → get_output(0), get_output(1)
//! ```
//!
//! 呼び出し間で保持するのは束縛済みの入力バッファと直近の出力のみ。
//! 再帰状態は呼び出し側が StateOut を次の StateIn として戻す。

use crate::config::RuntimeConfig;
use crate::constants::{INPUT_LEN, NUM_CLASSES, STATE_LEN};
use crate::error::{ComputeError, Error, LoadError, Result, ShapeMismatchError};
use crate::model::Model;
use crate::profile::{IO_BUFFER_BYTES, MemoryReport, SCRATCH_BYTES, StageTimings};
use crate::quant::{SaturationReport, dequantize, quantize_slice};
use crate::state::RecurrentState;
use crate::tensor::{
    Direction, INPUT_FRAME_SLOT, INPUT_SLOTS, OUTPUT_SLOTS, PROBABILITIES_SLOT, STATE_IN_SLOT,
    STATE_OUT_SLOT, SlotSpec, TensorDetails,
};
use std::sync::Arc;

/// invoke() の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeResult {
    /// 飽和統計
    pub saturation: SaturationReport,
    /// ステージ別の所要時間（`profile_stages` 有効時のみ）
    pub timings: Option<StageTimings>,
}

/// 推論ランタイム（1 ストリームにつき 1 インスタンス）
pub struct Runtime {
    model: Arc<Model>,
    config: RuntimeConfig,
    input_frame: Option<[i8; INPUT_LEN]>,
    state_in: Option<[i8; STATE_LEN]>,
    probabilities: Option<[i8; NUM_CLASSES]>,
    state_out: Option<[i8; STATE_LEN]>,
}

impl Runtime {
    /// モデルを読み込んでランタイムを作成（既定設定）
    pub fn load(model_bytes: &[u8]) -> std::result::Result<Self, LoadError> {
        Self::with_config(model_bytes, RuntimeConfig::default())
    }

    /// モデルを読み込んでランタイムを作成
    pub fn with_config(
        model_bytes: &[u8],
        config: RuntimeConfig,
    ) -> std::result::Result<Self, LoadError> {
        let model = Model::load(model_bytes)?;
        Ok(Self::from_model(Arc::new(model), config))
    }

    /// 読み込み済みモデルを共有してランタイムを作成
    pub fn from_model(model: Arc<Model>, config: RuntimeConfig) -> Self {
        Self {
            model,
            config,
            input_frame: None,
            state_in: None,
            probabilities: None,
            state_out: None,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// 入力スロットの詳細
    pub fn input_details(&self) -> Vec<TensorDetails> {
        INPUT_SLOTS.iter().map(|slot| TensorDetails::from_slot(slot, self.model.quant())).collect()
    }

    /// 出力スロットの詳細
    pub fn output_details(&self) -> Vec<TensorDetails> {
        OUTPUT_SLOTS.iter().map(|slot| TensorDetails::from_slot(slot, self.model.quant())).collect()
    }

    /// 入力スロットに int8 バッファを束縛する
    ///
    /// 要素数がスロットの形状と一致しなければ `ShapeMismatch`。失敗時は既存の束縛を変えない。
    pub fn set_input(&mut self, index: usize, data: &[i8]) -> Result<()> {
        let slot = input_slot(index)?;
        check_len(slot, Direction::Input, data.len())?;

        match index {
            INPUT_FRAME_SLOT => {
                let mut frame = [0i8; INPUT_LEN];
                frame.copy_from_slice(data);
                self.input_frame = Some(frame);
            }
            _ => {
                let mut state = [0i8; STATE_LEN];
                state.copy_from_slice(data);
                self.state_in = Some(state);
            }
        }

        Ok(())
    }

    /// 実数値を量子化して入力スロットに束縛する。飽和した要素数を返す。
    pub fn set_input_real(&mut self, index: usize, values: &[f32]) -> Result<usize> {
        let slot = input_slot(index)?;
        check_len(slot, Direction::Input, values.len())?;

        let params = self.model.quant().get(slot.tensor);
        let mut buf = vec![0i8; values.len()];
        let saturated = quantize_slice(values, params, &mut buf);
        if saturated > 0 {
            log::debug!("{saturated} values saturated while quantizing input {index}");
        }

        self.set_input(index, &buf)?;
        Ok(saturated)
    }

    /// 束縛済みの入力で 1 ステップ推論する
    ///
    /// 失敗しても直前の出力は残る。
    pub fn invoke(&mut self) -> std::result::Result<InvokeResult, ComputeError> {
        let frame = self.input_frame.as_ref().ok_or(ComputeError::InputNotBound(INPUT_FRAME_SLOT))?;
        let state_in = self.state_in.as_ref().ok_or(ComputeError::InputNotBound(STATE_IN_SLOT))?;
        let state = RecurrentState::from_flat(state_in);

        let (output, timings) = if self.config.profile_stages {
            let mut timings = StageTimings::default();
            let output = self.model.step_profiled(frame, &state, &mut timings)?;
            (output, Some(timings))
        } else {
            (self.model.step(frame, &state)?, None)
        };

        self.probabilities = Some(output.probabilities);
        self.state_out = Some(output.state.to_flat());

        let saturation = output.saturation;
        log::debug!("invoke: probabilities={:?} saturation={saturation:?}", output.probabilities);
        if self.config.should_warn(saturation.total()) {
            log::warn!(
                "{} values saturated in one invoke (conv={}, embedding={}, cell_state={}, hidden={}, logits={}, probabilities={}); calibration may not match the input distribution",
                saturation.total(),
                saturation.conv,
                saturation.embedding,
                saturation.cell_state,
                saturation.hidden,
                saturation.logits,
                saturation.probabilities,
            );
        }

        Ok(InvokeResult { saturation, timings })
    }

    /// 出力スロットの int8 バッファ
    pub fn get_output(&self, index: usize) -> Result<&[i8]> {
        let output: Option<&[i8]> = match index {
            PROBABILITIES_SLOT => self.probabilities.as_ref().map(|p| &p[..]),
            STATE_OUT_SLOT => self.state_out.as_ref().map(|s| &s[..]),
            _ => return Err(Error::InvalidTensorIndex { direction: Direction::Output, index }),
        };
        output.ok_or(Error::OutputNotReady(index))
    }

    /// 確率出力を実数に戻したもの
    pub fn probabilities(&self) -> Option<[f32; NUM_CLASSES]> {
        let params = self.model.quant().get(OUTPUT_SLOTS[PROBABILITIES_SLOT].tensor);
        self.probabilities.map(|p| p.map(|q| dequantize(q, params)))
    }

    /// 直近の StateOut（型付き）
    pub fn state_out(&self) -> Option<RecurrentState> {
        self.state_out.as_ref().map(RecurrentState::from_flat)
    }

    /// メモリ使用量
    pub fn memory_report(&self) -> MemoryReport {
        MemoryReport {
            weights: self.model.weight_bytes(),
            activation_tables: self.model.table_bytes(),
            io_buffers: IO_BUFFER_BYTES,
            scratch: SCRATCH_BYTES,
        }
    }
}

fn input_slot(index: usize) -> Result<&'static SlotSpec> {
    INPUT_SLOTS
        .get(index)
        .ok_or(Error::InvalidTensorIndex { direction: Direction::Input, index })
}

fn check_len(slot: &SlotSpec, direction: Direction, actual: usize) -> Result<()> {
    if actual != slot.len() {
        return Err(ShapeMismatchError {
            direction,
            index: slot.index,
            tensor: slot.tensor,
            shape: slot.shape,
            expected: slot.len(),
            actual,
        }
        .into());
    }
    Ok(())
}
