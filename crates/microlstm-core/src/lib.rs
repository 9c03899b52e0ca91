//! 量子化済みストリーミング分類器の推論コア
//!
//! 1 フレーム（40 特徴量）を Conv1D → MaxPool → Dense → 2 段のゲート付き再帰セル → Dense → Softmax
//! に通し、3 クラスの確率と更新後の再帰状態を返す。全ての演算は int8 アフィン量子化と
//! 固定小数点で行う。再帰状態はランタイム内部に保持せず、呼び出し側が毎回渡す。
//!
//! # 使用例
//!
//! ```
//! use microlstm_core::{Runtime, synth::SyntheticModel};
//!
//! let bytes = SyntheticModel::random(1).to_bytes();
//! let mut runtime = Runtime::load(&bytes)?;
//!
//! let mut state = [0i8; 80];
//! for _ in 0..3 {
//!     runtime.set_input(0, &[3; 40])?;
//!     runtime.set_input(1, &state)?;
//!     runtime.invoke()?;
//!     state.copy_from_slice(runtime.get_output(1)?);
//! }
//! let probabilities = runtime.get_output(0)?;
//! assert_eq!(probabilities.len(), 3);
//! # Ok::<(), microlstm_core::Error>(())
//! ```

pub mod cell;
pub mod config;
pub mod constants;
pub mod error;
pub mod feature;
pub mod graph;
pub mod head;
pub mod io;
pub mod layers;
pub mod lut;
pub mod model;
pub mod profile;
pub mod quant;
pub mod runtime;
pub mod state;
pub mod synth;
pub mod tensor;
pub mod weights;

pub use config::RuntimeConfig;
pub use error::{ComputeError, Error, LoadError, Result, ShapeMismatchError};
pub use model::{Model, StepOutput};
pub use profile::{MemoryReport, StageTimings};
pub use quant::{QuantParams, SaturationReport, dequantize, quantize};
pub use runtime::{InvokeResult, Runtime};
pub use state::{CellState, RecurrentState};
pub use tensor::{TensorDetails, TensorId};
