use proptest::prelude::*;

use caffe2_rs::inference::{
    decode, prepare, top_k, DType, ForeignBuffer, Prediction, Tensor, TensorDescriptor,
};

proptest! {
    #[test]
    fn padded_batch_has_fixed_length(
        batch in 1usize..8,
        channels in 1usize..4,
        width in 1usize..5,
        height in 1usize..5,
        supplied in 1usize..8,
        value in 0.5f32..10.0,
    ) {
        prop_assume!(supplied <= batch);
        let sample_len = channels * width * height;
        let samples: Vec<Vec<f32>> = (0..supplied).map(|_| vec![value; sample_len]).collect();

        let buffer = prepare(&samples, batch, channels, width, height).unwrap();
        prop_assert_eq!(buffer.len(), batch * sample_len);
        prop_assert_eq!(buffer.samples(), supplied);
        prop_assert_eq!(buffer.dims(), [batch, channels, height, width]);

        let (real, padding) = buffer.as_slice().split_at(supplied * sample_len);
        prop_assert!(real.iter().all(|&v| v == value));
        prop_assert!(padding.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn fractional_samples_rejected(
        sample_len in 2usize..16,
        extra in 1usize..16,
    ) {
        prop_assume!(extra % sample_len != 0);
        let data = vec![1.0f32; sample_len + extra];
        prop_assert!(prepare(&[data], 4, sample_len, 1, 1).is_err());
    }

    #[test]
    fn top_k_is_sorted_and_stable(
        probabilities in prop::collection::vec(0.0f32..1.0, 1..32),
        k in 0usize..40,
    ) {
        let predictions: Vec<Prediction> = probabilities
            .iter()
            .enumerate()
            .map(|(i, &p)| Prediction::new(i, p))
            .collect();

        let top = top_k(&predictions, k);
        prop_assert_eq!(top.len(), k.min(predictions.len()));
        for pair in top.windows(2) {
            prop_assert!(
                pair[0].probability > pair[1].probability
                    || (pair[0].probability == pair[1].probability && pair[0].index < pair[1].index)
            );
        }
        prop_assert_eq!(top_k(&top, k), top.clone());
    }

    #[test]
    fn decode_preserves_values(
        values in prop::collection::vec(prop::num::f32::NORMAL, 1..64),
    ) {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let buffer = ForeignBuffer::from_bytes(&bytes, 4).unwrap();
        let descriptor = TensorDescriptor::new(DType::F32, vec![values.len()]).unwrap();

        match decode(&buffer, &descriptor).unwrap() {
            Tensor::F32(array) => {
                prop_assert_eq!(array.iter().copied().collect::<Vec<_>>(), values);
            }
            other => prop_assert!(false, "unexpected dtype {}", other.dtype()),
        }
    }
}
