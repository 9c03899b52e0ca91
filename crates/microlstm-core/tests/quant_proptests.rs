use microlstm_core::constants::{INPUT_LEN, STATE_LEN};
use microlstm_core::synth::SyntheticModel;
use microlstm_core::{Model, QuantParams, RecurrentState, dequantize, quantize};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::OnceLock;

fn arb_params() -> impl Strategy<Value = QuantParams> {
    (1e-4f32..2.0f32, -128i32..=127).prop_map(|(scale, zero_point)| QuantParams { scale, zero_point })
}

fn shared_model() -> &'static Model {
    static MODEL: OnceLock<Model> = OnceLock::new();
    MODEL.get_or_init(|| {
        Model::load(&SyntheticModel::random(0x5EED).to_bytes()).expect("synthetic model must load")
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    /// 表現範囲内の実数は量子化誤差 scale/2 以内で戻る
    #[test]
    fn prop_quantization_bound(params in arb_params(), t in 0.0f64..=1.0) {
        let (lo, hi) = params.real_range();
        let x = (lo as f64 + t * (hi as f64 - lo as f64)) as f32;

        let back = dequantize(quantize(x, params), params);
        // f32 の丸め誤差ぶんだけ余裕を持たせる
        let tolerance = params.scale * 0.5001;
        prop_assert!((back - x).abs() <= tolerance, "x={x} back={back} params={params:?}");
    }

    /// 範囲外は端のコードに飽和する
    #[test]
    fn prop_out_of_range_saturates(params in arb_params(), excess in 1.0f32..1000.0) {
        let (lo, hi) = params.real_range();
        prop_assert_eq!(quantize(hi + excess * params.scale, params), i8::MAX);
        prop_assert_eq!(quantize(lo - excess * params.scale, params), i8::MIN);
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    /// 任意の入力・状態で確率は [0,1] かつ合計 1 ± 3×scale
    #[test]
    fn prop_probability_validity(seed in any::<u64>()) {
        let model = shared_model();
        let params = model.quant().get(microlstm_core::TensorId::Probabilities);

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut frame = [0i8; INPUT_LEN];
        let mut flat = [0i8; STATE_LEN];
        for v in frame.iter_mut() {
            *v = rng.random();
        }
        for v in flat.iter_mut() {
            *v = rng.random();
        }

        let out = model.step(&frame, &RecurrentState::from_flat(&flat)).unwrap();
        let probs: Vec<f32> = out.probabilities.iter().map(|&q| dequantize(q, params)).collect();
        let sum: f32 = probs.iter().sum();

        prop_assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)), "{probs:?}");
        prop_assert!((sum - 1.0).abs() <= 3.0 * params.scale, "sum={sum} probs={probs:?}");
    }

    /// 同じ入力なら何度呼んでもビット単位で同じ
    #[test]
    fn prop_step_is_pure(seed in any::<u64>()) {
        let model = shared_model();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut frame = [0i8; INPUT_LEN];
        let mut flat = [0i8; STATE_LEN];
        for v in frame.iter_mut().chain(flat.iter_mut()) {
            *v = rng.random();
        }
        let state = RecurrentState::from_flat(&flat);

        let a = model.step(&frame, &state).unwrap();
        let b = model.step(&frame, &state).unwrap();
        prop_assert_eq!(a, b);
    }

    /// 平坦レイアウトと型付き状態の往復
    #[test]
    fn prop_state_layout_round_trip(flat in prop::array::uniform32(any::<i8>()), tail in prop::collection::vec(any::<i8>(), 48)) {
        let mut buf = [0i8; STATE_LEN];
        buf[..32].copy_from_slice(&flat);
        buf[32..].copy_from_slice(&tail);

        let state = RecurrentState::from_flat(&buf);
        prop_assert_eq!(state.to_flat(), buf);
        prop_assert_eq!(&state.h1[..], &buf[0..20]);
        prop_assert_eq!(&state.c1[..], &buf[20..40]);
        prop_assert_eq!(&state.h2[..], &buf[40..60]);
        prop_assert_eq!(&state.c2[..], &buf[60..80]);
    }
}
