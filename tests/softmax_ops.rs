//! Integration tests for softmax / log-softmax forward

mod common;

use common::{assert_close_f32, assert_close_f64, client, small_client, softmax_ref, softmax_ref_nd};
use kernr::error::Error;
use kernr::ops::SoftmaxOps;
use kernr::tensor::Tensor;

#[test]
fn test_softmax_sums_to_one() {
    let (device, client) = client();
    let data: Vec<f32> = (0..6 * 40).map(|i| ((i * 37) % 23) as f32 * 0.4 - 2.0).collect();
    let t = Tensor::from_slice(&data, &[6, 40], &device);
    let y = client.softmax(&t, -1).unwrap().to_vec::<f32>();

    for row in y.chunks(40) {
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "row sum {sum}");
        assert!(row.iter().all(|&v| v >= 0.0));
    }
}

#[test]
fn test_softmax_shift_invariance() {
    let (device, client) = client();
    let data: Vec<f64> = (0..48).map(|i| (i as f64 * 0.73).sin() * 3.0).collect();
    let shifted: Vec<f64> = data.iter().map(|&v| v + 123.456).collect();

    let a = Tensor::from_slice(&data, &[4, 12], &device);
    let b = Tensor::from_slice(&shifted, &[4, 12], &device);

    let ya = client.softmax(&a, 1).unwrap().to_vec::<f64>();
    let yb = client.softmax(&b, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&ya, &yb, 1e-12);
}

#[test]
fn test_log_softmax_matches_log_of_softmax() {
    let (device, client) = client();
    let data: Vec<f64> = (0..35).map(|i| ((i * 11) % 13) as f64 * 0.5 - 3.0).collect();
    let t = Tensor::from_slice(&data, &[5, 7], &device);

    let log_y = client.log_softmax(&t, 1).unwrap().to_vec::<f64>();
    let y = client.softmax(&t, 1).unwrap().to_vec::<f64>();
    let log_of_y: Vec<f64> = y.iter().map(|&v| v.ln()).collect();
    assert_close_f64(&log_y, &log_of_y, 1e-12);
}

#[test]
fn test_forward_matches_reference_all_paths() {
    // The same logical rows through the register-resident path (default
    // device), the streaming path (reduced device, long row), and the
    // spatial path (axis not innermost) must all match the scalar reference.
    let (device, default_client) = client();
    let (_, small) = small_client();

    // Fast path: short rows.
    let data: Vec<f64> = (0..3 * 24).map(|i| ((i * 7) % 19) as f64 * 0.3 - 1.5).collect();
    let t = Tensor::from_slice(&data, &[3, 24], &device);
    let y = default_client.softmax(&t, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&y, &softmax_ref_nd(&data, &[3, 24], 1, false), 1e-12);

    // Streaming path: rows longer than the small device's register budget
    // (32 lanes x 8 elements = 256 < 700).
    let data: Vec<f64> = (0..2 * 700).map(|i| ((i * 13) % 31) as f64 * 0.2 - 2.0).collect();
    let t = Tensor::from_slice(&data, &[2, 700], &device);
    let y = small.softmax(&t, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&y, &softmax_ref_nd(&data, &[2, 700], 1, false), 1e-12);

    // Spatial path: reduce the middle axis.
    let data: Vec<f64> = (0..2 * 9 * 7).map(|i| ((i * 29) % 17) as f64 * 0.25 - 1.0).collect();
    let t = Tensor::from_slice(&data, &[2, 9, 7], &device);
    let y = default_client.softmax(&t, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&y, &softmax_ref_nd(&data, &[2, 9, 7], 1, false), 1e-12);

    // Spatial log-softmax.
    let y = default_client.log_softmax(&t, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&y, &softmax_ref_nd(&data, &[2, 9, 7], 1, true), 1e-12);

    // Spatial with an inner dimension wider than one column group (41
    // columns across 32 lanes: two groups, the second partially idle).
    let data: Vec<f64> = (0..2 * 5 * 41).map(|i| ((i * 43) % 13) as f64 * 0.3 - 1.8).collect();
    let t = Tensor::from_slice(&data, &[2, 5, 41], &device);
    let y = default_client.softmax(&t, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&y, &softmax_ref_nd(&data, &[2, 5, 41], 1, false), 1e-12);

    // Spatial with a vectorizable inner dimension (8 % 2 == 0 for f64).
    let data: Vec<f64> = (0..2 * 5 * 8).map(|i| ((i * 3) % 11) as f64 * 0.5 - 2.5).collect();
    let t = Tensor::from_slice(&data, &[2, 5, 8], &device);
    let y = default_client.softmax(&t, 1).unwrap().to_vec::<f64>();
    assert_close_f64(&y, &softmax_ref_nd(&data, &[2, 5, 8], 1, false), 1e-12);
}

#[test]
fn test_streaming_row_boundaries_match_fast_path() {
    // Row lengths around the vector width: head/tail handling in the
    // streaming kernel must agree with the fast path elementwise.
    let (device, default_client) = client();
    let (_, small) = small_client();

    for dim in [257usize, 258, 259, 260, 300, 511] {
        let data: Vec<f32> = (0..dim).map(|i| ((i * 17) % 97) as f32 * 0.11 - 5.0).collect();
        let t = Tensor::from_slice(&data, &[1, dim], &device);
        // Default device: register-resident. Small device: streaming.
        let fast = default_client.softmax(&t, 1).unwrap().to_vec::<f32>();
        let streamed = small.softmax(&t, 1).unwrap().to_vec::<f32>();
        assert_close_f32(&streamed, &fast, 1e-5);
    }
}

#[test]
fn test_odd_row_lengths_degrade_vector_width() {
    // dim % 4 != 0 disables vectorized loads for f32; results must not
    // change.
    let (device, client) = client();
    for dim in [1usize, 2, 3, 5, 17, 33, 63] {
        let data: Vec<f64> = (0..dim).map(|i| (i as f64).cos()).collect();
        let t = Tensor::from_slice(&data, &[1, dim], &device);
        let y = client.softmax(&t, 1).unwrap().to_vec::<f64>();
        assert_close_f64(&y, &softmax_ref(&data, false), 1e-12);
    }
}

#[test]
fn test_non_contiguous_input() {
    let (device, client) = client();
    let data: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
    let t = Tensor::from_slice(&data, &[3, 4], &device);
    let tt = t.transpose(0, 1).unwrap();

    let y = client.softmax(&tt, 1).unwrap().to_vec::<f32>();
    let materialized: Vec<f64> = tt
        .contiguous()
        .to_vec::<f32>()
        .iter()
        .map(|&v| v as f64)
        .collect();
    let expected: Vec<f32> = softmax_ref_nd(&materialized, &[4, 3], 1, false)
        .iter()
        .map(|&v| v as f32)
        .collect();
    assert_close_f32(&y, &expected, 1e-6);
}

#[test]
fn test_zero_dim_and_empty_inputs() {
    let (device, client) = client();

    // 0-d input is viewed as [1]: softmax of a scalar is 1.
    let t = Tensor::from_slice(&[3.0f32], &[1], &device).reshape(&[]).unwrap();
    let y = client.softmax(&t, 0).unwrap();
    assert_eq!(y.to_vec::<f32>(), vec![1.0]);

    // Empty input returns an empty output without launching.
    let t = Tensor::from_slice(&[] as &[f32], &[0, 4], &device);
    let y = client.softmax(&t, 1).unwrap();
    assert_eq!(y.shape(), &[0, 4]);
}

#[test]
fn test_invalid_dim_and_dtype() {
    let (device, client) = client();
    let t = Tensor::from_slice(&[1.0f32, 2.0], &[2], &device);
    assert!(matches!(
        client.softmax(&t, 5).unwrap_err(),
        Error::InvalidDimension { .. }
    ));

    let t = Tensor::from_slice(&[1i32, 2], &[2], &device);
    assert!(matches!(
        client.softmax(&t, 0).unwrap_err(),
        Error::UnsupportedDType { .. }
    ));
}

#[cfg(feature = "f16")]
#[test]
fn test_half_precision_accumulates_in_f32() {
    use half::f16;
    let (device, client) = client();
    let data: Vec<f16> = (0..64).map(|i| f16::from_f32((i % 9) as f32 * 0.5)).collect();
    let t = Tensor::from_slice(&data, &[2, 32], &device);
    let y = client.softmax(&t, 1).unwrap().to_vec::<f16>();

    for row in y.chunks(32) {
        let sum: f32 = row.iter().map(|v| v.to_f32()).sum();
        assert!((sum - 1.0).abs() < 1e-2, "row sum {sum}");
    }
}

#[test]
fn test_strategy_does_not_change_results_between_devices() {
    // One geometry run on devices with different capability envelopes picks
    // different plans; the outputs must agree to rounding.
    let (device, a) = client();
    let (_, b) = small_client();
    let data: Vec<f32> = (0..4 * 320).map(|i| ((i * 41) % 57) as f32 * 0.09 - 2.2).collect();
    let t = Tensor::from_slice(&data, &[4, 320], &device);

    let ya = a.softmax(&t, 1).unwrap().to_vec::<f32>();
    let yb = b.softmax(&t, 1).unwrap().to_vec::<f32>();
    assert_close_f32(&ya, &yb, 1e-5);
}
