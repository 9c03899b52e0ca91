//! MLSM ファイル I/O
//!
//! 量子化済みストリーミング分類器の独自フォーマット（リトルエンディアン）。
//!
//! ```text
//! header (32 bytes)
//! op table:    u32 count, u8 opcode × count
//! quant table: u32 count, {u32 id, f32 scale, i32 zero_point} × count
//! conv:        i8[2][10]
//! dense:       i32[40], i8[40][30]
//! stage1:      i32[80], i8[80][40], i8[80][20]
//! stage2:      i32[80], i8[80][20], i8[80][20]
//! head:        i32[3], i8[3][20]
//! tables:      i16[513] sigmoid, i16[513] tanh, u16[256] exp
//! ```
//!
//! 重み区間は Bias-first。ここでは構造の検証のみを行い、
//! 量子化パラメータ間の整合性は [`crate::model::Model::from_artifact`] が検証する。

use crate::constants::*;
use crate::error::LoadError;
use crate::graph::{OpCode, SUPPORTED_GRAPH};
use crate::layers::{Affine, Matrix};
use crate::lut::{ActivationTables, ExpTable};
use crate::quant::QuantParams;
use crate::tensor::{QuantTable, TensorId};
use crate::weights::{CellWeights, ModelArtifact, ModelWeights};
use std::io::{self, Cursor, Read, Write};

/// MLSM ファイルマジックナンバー
pub const MLSM_MAGIC: [u8; 4] = *b"MLSM";

/// MLSM ファイルバージョン
pub const MLSM_VERSION: u32 = 1;

/// 量子化テーブル 1 エントリのバイト数
const QUANT_ENTRY_SIZE: usize = 12;

/// MLSM ヘッダ（32 bytes）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlsmHeader {
    /// マジックナンバー "MLSM"
    pub magic: [u8; 4],

    /// ファイルバージョン（1）
    pub version: u32,

    /// 入力フレーム長（40）
    pub input_len: u32,

    /// Conv1D カーネル幅（10）
    pub conv_kernel: u32,

    /// Conv1D フィルタ数（2）
    pub conv_filters: u32,

    /// Embedding 次元（40）
    pub embed_dim: u32,

    /// 隠れ次元（20）
    pub hidden_dim: u32,

    /// クラス数（3）
    pub num_classes: u32,
}

impl MlsmHeader {
    /// ヘッダーサイズ（bytes）
    pub const SIZE: usize = 32;

    /// コンパイル時の次元を持つヘッダ
    pub fn current() -> Self {
        Self {
            magic: MLSM_MAGIC,
            version: MLSM_VERSION,
            input_len: INPUT_LEN as u32,
            conv_kernel: CONV_KERNEL as u32,
            conv_filters: CONV_FILTERS as u32,
            embed_dim: EMBED_DIM as u32,
            hidden_dim: HIDDEN_DIM as u32,
            num_classes: NUM_CLASSES as u32,
        }
    }

    /// バイト列から読み込み
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Result<Self, LoadError> {
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MLSM_MAGIC {
            return Err(LoadError::InvalidMagic(magic));
        }

        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let version = word(4);
        if version != MLSM_VERSION {
            return Err(LoadError::UnsupportedVersion { found: version, supported: MLSM_VERSION });
        }

        let header = Self {
            magic,
            version,
            input_len: word(8),
            conv_kernel: word(12),
            conv_filters: word(16),
            embed_dim: word(20),
            hidden_dim: word(24),
            num_classes: word(28),
        };

        // 次元の検証
        let dims = [
            ("input_len", header.input_len, INPUT_LEN),
            ("conv_kernel", header.conv_kernel, CONV_KERNEL),
            ("conv_filters", header.conv_filters, CONV_FILTERS),
            ("embed_dim", header.embed_dim, EMBED_DIM),
            ("hidden_dim", header.hidden_dim, HIDDEN_DIM),
            ("num_classes", header.num_classes, NUM_CLASSES),
        ];
        for (field, actual, expected) in dims {
            if actual as usize != expected {
                return Err(LoadError::DimensionMismatch { field, expected, actual: actual as usize });
            }
        }

        Ok(header)
    }

    /// バイト列に書き出し
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        let words = [
            self.version,
            self.input_len,
            self.conv_kernel,
            self.conv_filters,
            self.embed_dim,
            self.hidden_dim,
            self.num_classes,
        ];
        for (i, w) in words.iter().enumerate() {
            bytes[4 + i * 4..8 + i * 4].copy_from_slice(&w.to_le_bytes());
        }
        bytes
    }
}

/// 書き出し後のファイルサイズ（bytes）
pub const fn encoded_len() -> usize {
    let ops = 4 + SUPPORTED_GRAPH.len();
    let quant = 4 + TensorId::COUNT * QUANT_ENTRY_SIZE;
    let conv = CONV_FILTERS * CONV_KERNEL;
    let dense = EMBED_DIM * 4 + EMBED_DIM * POOL_OUT;
    let stage1 = GATE_ROWS * 4 + GATE_ROWS * EMBED_DIM + GATE_ROWS * HIDDEN_DIM;
    let stage2 = GATE_ROWS * 4 + GATE_ROWS * HIDDEN_DIM + GATE_ROWS * HIDDEN_DIM;
    let head = NUM_CLASSES * 4 + NUM_CLASSES * HIDDEN_DIM;
    let tables = 2 * ACT_LUT_LEN * 2 + EXP_LUT_LEN * 2;
    MlsmHeader::SIZE + ops + quant + conv + dense + stage1 + stage2 + head + tables
}

// =============================================================================
// 読み込み
// =============================================================================

/// MLSM ファイルを読み込み
///
/// # 引数
///
/// - `reader`: バイト入力ストリーム
///
/// # 戻り値
///
/// 構造検証済みのモデル内容（末尾の余剰バイトは検査しない）
pub fn read_model<R: Read>(reader: &mut R) -> Result<ModelArtifact, LoadError> {
    // ヘッダー読み込み
    let mut header_bytes = [0u8; MlsmHeader::SIZE];
    reader.read_exact(&mut header_bytes)?;
    MlsmHeader::from_bytes(&header_bytes)?;

    read_op_table(reader)?;
    let quant = read_quant_table(reader)?;

    // 重み読み込み（Bias-first）
    let mut weights = ModelWeights::new();
    read_i8_into(reader, &mut weights.feature.conv.weight[..])?;
    read_affine(reader, &mut weights.feature.dense)?;
    read_cell(reader, &mut weights.stage1)?;
    read_cell(reader, &mut weights.stage2)?;
    read_affine(reader, &mut weights.head.dense)?;

    // 活性化テーブル
    let mut activations = ActivationTables::new();
    read_i16_into(reader, &mut activations.sigmoid[..])?;
    read_i16_into(reader, &mut activations.tanh[..])?;
    let mut softmax = ExpTable::new();
    read_u16_into(reader, &mut softmax.exp_neg[..])?;

    Ok(ModelArtifact { quant, weights, activations, softmax })
}

/// バイト列全体を 1 つのモデルとして読み込み（余剰バイトはエラー）
pub fn read_model_bytes(bytes: &[u8]) -> Result<ModelArtifact, LoadError> {
    let mut cursor = Cursor::new(bytes);
    let artifact = read_model(&mut cursor)?;

    let consumed = cursor.position() as usize;
    if consumed < bytes.len() {
        return Err(LoadError::TrailingBytes(bytes.len() - consumed));
    }

    Ok(artifact)
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// 演算子列を読み、対応グラフと一致するか検証
fn read_op_table<R: Read>(reader: &mut R) -> Result<(), LoadError> {
    let count = read_u32(reader)? as usize;

    // count が巨大でも 1 つずつ読み、対応グラフを超えた時点で止める
    for position in 0..count {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let op = OpCode::from_u8(byte[0]).ok_or(LoadError::UnsupportedOperator(byte[0]))?;

        let expected = SUPPORTED_GRAPH.get(position).copied();
        if expected != Some(op) {
            return Err(LoadError::graph_mismatch(position, expected, Some(op)));
        }
    }

    if count < SUPPORTED_GRAPH.len() {
        return Err(LoadError::graph_mismatch(count, Some(SUPPORTED_GRAPH[count]), None));
    }

    Ok(())
}

/// 量子化テーブルを読み込み（全テンソル ID がちょうど 1 回ずつ必要）
fn read_quant_table<R: Read>(reader: &mut R) -> Result<QuantTable, LoadError> {
    let count = read_u32(reader)? as usize;
    let mut entries: [Option<QuantParams>; TensorId::COUNT] = [None; TensorId::COUNT];

    for _ in 0..count {
        let mut buf = [0u8; QUANT_ENTRY_SIZE];
        reader.read_exact(&mut buf)?;

        let raw_id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let scale = f32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let zero_point = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let tensor = TensorId::from_u32(raw_id).ok_or(LoadError::UnknownTensor(raw_id))?;
        if entries[tensor.index()].is_some() {
            return Err(LoadError::DuplicateTensor(tensor));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(LoadError::InvalidScale { tensor, scale });
        }
        if !(-128..=127).contains(&zero_point) {
            return Err(LoadError::InvalidZeroPoint { tensor, zero_point });
        }

        entries[tensor.index()] = Some(QuantParams { scale, zero_point });
    }

    let mut params = [QuantParams { scale: 1.0, zero_point: 0 }; TensorId::COUNT];
    for tensor in TensorId::ALL {
        params[tensor.index()] = entries[tensor.index()].ok_or(LoadError::MissingTensor(tensor))?;
    }

    Ok(QuantTable::new(params))
}

/// アフィン層を読み込み（Bias-first）
fn read_affine<R: Read, const IN: usize, const OUT: usize>(
    reader: &mut R,
    layer: &mut Affine<IN, OUT>,
) -> io::Result<()> {
    // bias: i32[OUT]（先に読み込み）
    let mut buf = vec![0u8; OUT * 4];
    reader.read_exact(&mut buf)?;

    for (i, chunk) in buf.chunks_exact(4).enumerate() {
        layer.bias[i] = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    // weight: i8[OUT][IN]（row-major）
    read_i8_into(reader, &mut layer.weight)
}

/// セル 1 段分を読み込み（bias → 入力側重み → 再帰側重み）
fn read_cell<R: Read, const IN: usize>(reader: &mut R, cell: &mut CellWeights<IN>) -> io::Result<()> {
    read_affine(reader, &mut cell.input)?;
    read_matrix(reader, &mut cell.recurrent)
}

fn read_matrix<R: Read, const IN: usize, const OUT: usize>(
    reader: &mut R,
    matrix: &mut Matrix<IN, OUT>,
) -> io::Result<()> {
    read_i8_into(reader, &mut matrix.weight)
}

fn read_i8_into<R: Read>(reader: &mut R, dst: &mut [i8]) -> io::Result<()> {
    let mut buf = vec![0u8; dst.len()];
    reader.read_exact(&mut buf)?;

    for (d, &b) in dst.iter_mut().zip(&buf) {
        *d = b as i8;
    }

    Ok(())
}

fn read_i16_into<R: Read>(reader: &mut R, dst: &mut [i16]) -> io::Result<()> {
    let mut buf = vec![0u8; dst.len() * 2];
    reader.read_exact(&mut buf)?;

    for (d, chunk) in dst.iter_mut().zip(buf.chunks_exact(2)) {
        *d = i16::from_le_bytes([chunk[0], chunk[1]]);
    }

    Ok(())
}

fn read_u16_into<R: Read>(reader: &mut R, dst: &mut [u16]) -> io::Result<()> {
    let mut buf = vec![0u8; dst.len() * 2];
    reader.read_exact(&mut buf)?;

    for (d, chunk) in dst.iter_mut().zip(buf.chunks_exact(2)) {
        *d = u16::from_le_bytes([chunk[0], chunk[1]]);
    }

    Ok(())
}

// =============================================================================
// 書き出し
// =============================================================================

/// MLSM v1 のバイト列を組み立てる
pub fn encode_model(artifact: &ModelArtifact) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len());
    buf.extend_from_slice(&MlsmHeader::current().to_bytes());

    // op table
    buf.extend_from_slice(&(SUPPORTED_GRAPH.len() as u32).to_le_bytes());
    buf.extend(SUPPORTED_GRAPH.iter().map(|&op| op as u8));

    // quant table
    buf.extend_from_slice(&(TensorId::COUNT as u32).to_le_bytes());
    for (tensor, params) in artifact.quant.iter() {
        buf.extend_from_slice(&(tensor as u32).to_le_bytes());
        buf.extend_from_slice(&params.scale.to_le_bytes());
        buf.extend_from_slice(&params.zero_point.to_le_bytes());
    }

    let w = &artifact.weights;
    push_i8(&mut buf, &w.feature.conv.weight[..]);
    push_affine(&mut buf, &w.feature.dense);
    push_affine(&mut buf, &w.stage1.input);
    push_i8(&mut buf, &w.stage1.recurrent.weight);
    push_affine(&mut buf, &w.stage2.input);
    push_i8(&mut buf, &w.stage2.recurrent.weight);
    push_affine(&mut buf, &w.head.dense);

    for &v in artifact.activations.sigmoid.iter().chain(artifact.activations.tanh.iter()) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    for &v in artifact.softmax.exp_neg.iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    buf
}

/// MLSM ファイルを書き出し
pub fn write_model<W: Write>(artifact: &ModelArtifact, writer: &mut W) -> io::Result<()> {
    writer.write_all(&encode_model(artifact))
}

fn push_affine<const IN: usize, const OUT: usize>(buf: &mut Vec<u8>, layer: &Affine<IN, OUT>) {
    for &b in layer.bias.iter() {
        buf.extend_from_slice(&b.to_le_bytes());
    }
    push_i8(buf, &layer.weight);
}

fn push_i8(buf: &mut Vec<u8>, src: &[i8]) {
    buf.extend(src.iter().map(|&v| v as u8));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SyntheticModel;

    fn create_valid_header() -> [u8; 32] {
        let mut header = [0u8; 32];

        // magic
        header[0..4].copy_from_slice(b"MLSM");

        // version = 1
        header[4..8].copy_from_slice(&1u32.to_le_bytes());

        // input_len, conv_kernel, conv_filters, embed_dim, hidden_dim, num_classes
        for (i, dim) in [40u32, 10, 2, 40, 20, 3].iter().enumerate() {
            header[8 + i * 4..12 + i * 4].copy_from_slice(&dim.to_le_bytes());
        }

        header
    }

    /// 有効なファイルのオフセット
    const OPS_OFFSET: usize = MlsmHeader::SIZE;
    const QUANT_OFFSET: usize = OPS_OFFSET + 4 + 7;

    fn valid_bytes() -> Vec<u8> {
        SyntheticModel::random(7).to_bytes()
    }

    #[test]
    fn test_header_parse() {
        let header = MlsmHeader::from_bytes(&create_valid_header()).unwrap();

        assert_eq!(header.magic, *b"MLSM");
        assert_eq!(header.version, 1);
        assert_eq!(header.input_len, 40);
        assert_eq!(header.hidden_dim, 20);
        assert_eq!(header, MlsmHeader::current());
        assert_eq!(header.to_bytes(), create_valid_header());
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut header_bytes = create_valid_header();
        header_bytes[0] = b'X';

        let result = MlsmHeader::from_bytes(&header_bytes);
        assert!(matches!(result, Err(LoadError::InvalidMagic(m)) if m == *b"XLSM"));
    }

    #[test]
    fn test_header_invalid_version() {
        let mut header_bytes = create_valid_header();
        header_bytes[4..8].copy_from_slice(&2u32.to_le_bytes());

        let result = MlsmHeader::from_bytes(&header_bytes);
        assert!(matches!(result, Err(LoadError::UnsupportedVersion { found: 2, supported: 1 })));
    }

    #[test]
    fn test_header_dimension_mismatch() {
        // hidden_dim = 32
        let mut header_bytes = create_valid_header();
        header_bytes[24..28].copy_from_slice(&32u32.to_le_bytes());

        let result = MlsmHeader::from_bytes(&header_bytes);
        assert!(matches!(
            result,
            Err(LoadError::DimensionMismatch { field: "hidden_dim", expected: 20, actual: 32 })
        ));
    }

    #[test]
    fn test_encoded_len_matches_writer() {
        assert_eq!(valid_bytes().len(), encoded_len());
    }

    #[test]
    fn test_write_model_matches_encode() {
        let synth = SyntheticModel::random(12);
        let mut buf = Vec::new();
        write_model(synth.artifact(), &mut buf).unwrap();
        assert_eq!(buf, encode_model(synth.artifact()));
        assert_eq!(buf, synth.to_bytes());
    }

    #[test]
    fn test_write_model_propagates_writer_error() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::StorageFull, "full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let synth = SyntheticModel::random(12);
        let err = write_model(synth.artifact(), &mut Full).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
    }

    #[test]
    fn test_read_back_written_model() {
        let synth = SyntheticModel::random(11);
        let bytes = synth.to_bytes();
        let artifact = read_model_bytes(&bytes).unwrap();

        assert_eq!(artifact.quant, synth.artifact().quant);
        assert_eq!(artifact.weights.feature.conv.weight, synth.artifact().weights.feature.conv.weight);
        assert_eq!(artifact.weights.stage2.recurrent.weight, synth.artifact().weights.stage2.recurrent.weight);
        assert_eq!(artifact.weights.head.dense.bias, synth.artifact().weights.head.dense.bias);
        assert_eq!(artifact.activations, synth.artifact().activations);
        assert_eq!(artifact.softmax, synth.artifact().softmax);
    }

    #[test]
    fn test_unsupported_operator() {
        let mut bytes = valid_bytes();
        // 3 番目の演算子を未知のコードに
        bytes[OPS_OFFSET + 4 + 2] = 42;

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::UnsupportedOperator(42))));
    }

    #[test]
    fn test_graph_mismatch() {
        let mut bytes = valid_bytes();
        // 先頭を SOFTMAX に
        bytes[OPS_OFFSET + 4] = OpCode::Softmax as u8;

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::GraphMismatch { position: 0, .. })));
    }

    #[test]
    fn test_graph_too_short() {
        let mut bytes = valid_bytes();
        // 演算子数 6 → 最後の SOFTMAX が無い（後続は quant table の count として読まれる）
        bytes[OPS_OFFSET..OPS_OFFSET + 4].copy_from_slice(&6u32.to_le_bytes());

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::GraphMismatch { position: 6, .. })));
    }

    #[test]
    fn test_graph_too_long() {
        let mut bytes = valid_bytes();
        // 演算子数 8 → 8 個目は quant table の先頭バイト（14 = 未知の演算子）
        bytes[OPS_OFFSET..OPS_OFFSET + 4].copy_from_slice(&8u32.to_le_bytes());

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::UnsupportedOperator(14))));
    }

    #[test]
    fn test_quant_invalid_scale() {
        let mut bytes = valid_bytes();
        // エントリ 0（Input）の scale = 0.0
        let entry = QUANT_OFFSET + 4;
        bytes[entry + 4..entry + 8].copy_from_slice(&0.0f32.to_le_bytes());

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::InvalidScale { tensor: TensorId::Input, .. })));
    }

    #[test]
    fn test_quant_invalid_zero_point() {
        let mut bytes = valid_bytes();
        let entry = QUANT_OFFSET + 4 + QUANT_ENTRY_SIZE; // StateIn
        bytes[entry + 8..entry + 12].copy_from_slice(&200i32.to_le_bytes());

        let result = read_model_bytes(&bytes);
        assert!(matches!(
            result,
            Err(LoadError::InvalidZeroPoint { tensor: TensorId::StateIn, zero_point: 200 })
        ));
    }

    #[test]
    fn test_quant_duplicate_and_unknown() {
        let mut bytes = valid_bytes();
        let entry1 = QUANT_OFFSET + 4 + QUANT_ENTRY_SIZE;
        bytes[entry1..entry1 + 4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            read_model_bytes(&bytes),
            Err(LoadError::DuplicateTensor(TensorId::Input))
        ));

        let mut bytes = valid_bytes();
        bytes[entry1..entry1 + 4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(read_model_bytes(&bytes), Err(LoadError::UnknownTensor(99))));
    }

    #[test]
    fn test_quant_missing_entry() {
        // エントリ数を 13 に減らし、最後のエントリ（HeadWeight）を取り除く
        let mut bytes = valid_bytes();
        bytes[QUANT_OFFSET..QUANT_OFFSET + 4].copy_from_slice(&13u32.to_le_bytes());
        let last = QUANT_OFFSET + 4 + 13 * QUANT_ENTRY_SIZE;
        bytes.drain(last..last + QUANT_ENTRY_SIZE);

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::MissingTensor(TensorId::HeadWeight))));
    }

    #[test]
    fn test_truncated() {
        let bytes = valid_bytes();
        for len in [0, 16, MlsmHeader::SIZE + 2, bytes.len() / 2, bytes.len() - 1] {
            let result = read_model_bytes(&bytes[..len]);
            match result {
                Err(LoadError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
                other => panic!("len {len}: expected truncation error, got {:?}", other.err()),
            }
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = valid_bytes();
        bytes.extend_from_slice(&[0, 0, 0]);

        let result = read_model_bytes(&bytes);
        assert!(matches!(result, Err(LoadError::TrailingBytes(3))));
    }
}
