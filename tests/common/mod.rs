//! Shared helpers for integration tests

#![allow(dead_code)]

use kernr::dtype::DType;
use kernr::exec::{Client, Device, DeviceCaps};
use kernr::tensor::{Layout, Storage, Tensor};

/// Default device + client
pub fn client() -> (Device, Client) {
    let device = Device::new();
    let client = Client::new(device.clone());
    (device, client)
}

/// Client for a reduced-capability device: 32-lane work-groups, so rows
/// longer than 32 * inner_loop elements leave the register-resident path.
pub fn small_client() -> (Device, Client) {
    let device = Device::with_caps(DeviceCaps {
        max_work_group_size: 32,
        sub_group_sizes: vec![16, 32],
        max_work_items: 1024,
    });
    let client = Client::new(device.clone());
    (device, client)
}

/// Build a Bool tensor from a bool slice
pub fn bool_tensor(values: &[bool], shape: &[usize]) -> Tensor {
    let bytes: Vec<u8> = values.iter().map(|&b| b as u8).collect();
    let storage = Storage::from_bytes(&bytes, DType::Bool).unwrap();
    Tensor::from_parts(storage, Layout::contiguous(shape))
}

pub fn assert_close_f32(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len());
    for (i, (&a, &b)) in got.iter().zip(expected.iter()).enumerate() {
        if a.is_nan() && b.is_nan() {
            continue;
        }
        assert!(
            (a - b).abs() <= tol,
            "index {i}: {a} vs {b} (tol {tol})"
        );
    }
}

pub fn assert_close_f64(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(got.len(), expected.len());
    for (i, (&a, &b)) in got.iter().zip(expected.iter()).enumerate() {
        if a.is_nan() && b.is_nan() {
            continue;
        }
        assert!(
            (a - b).abs() <= tol,
            "index {i}: {a} vs {b} (tol {tol})"
        );
    }
}

/// Scalar reference softmax over one row
pub fn softmax_ref(row: &[f64], log: bool) -> Vec<f64> {
    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = row.iter().map(|&v| (v - max).exp()).sum();
    if log {
        row.iter().map(|&v| v - max - sum.ln()).collect()
    } else {
        row.iter().map(|&v| (v - max).exp() / sum).collect()
    }
}

/// Reference softmax over axis `dim` of a dense row-major array
pub fn softmax_ref_nd(data: &[f64], shape: &[usize], dim: usize, log: bool) -> Vec<f64> {
    let dim_size = shape[dim];
    let inner: usize = shape[dim + 1..].iter().product::<usize>().max(1);
    let outer: usize = shape[..dim].iter().product::<usize>().max(1);
    let mut out = vec![0.0f64; data.len()];
    for o in 0..outer {
        for c in 0..inner {
            let row: Vec<f64> = (0..dim_size)
                .map(|d| data[o * dim_size * inner + d * inner + c])
                .collect();
            let r = softmax_ref(&row, log);
            for d in 0..dim_size {
                out[o * dim_size * inner + d * inner + c] = r[d];
            }
        }
    }
    out
}
