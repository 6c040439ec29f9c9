//! Radial blending masks and the overlap-add normalisation derived from them.

use crate::matrix::Matrix;

/// Square weight pattern `max(0, 1 - k * (x² + y²))²` with `x, y` normalised to
/// `[-1, 1]` and `k = 1 - 1 / size`.
///
/// The center weight is 1 and weights never increase moving outward. For small
/// sizes the corners clamp to exactly zero.
pub fn build_radial_mask(size: usize) -> Matrix {
    let k = 1.0 - 1.0 / size as f32;
    let radius = (size as f32 - 1.0) * 0.5;
    let normalise = |i: usize| {
        if radius == 0.0 {
            0.0
        } else {
            (i as f32 - radius) / radius
        }
    };
    Matrix::from_fn(size, size, |i| {
        let x = normalise(i / size);
        let y = normalise(i % size);
        let weight = (1.0 - k * (x * x + y * y)).max(0.0);
        weight * weight
    })
}

/// Summed mask weight landing on each phase of a `stride` tiling, away from
/// any tiling edge. The result is `stride x stride`.
fn phase_weights(mask: &Matrix, stride: usize) -> Matrix {
    assert_eq!(mask.rows(), mask.columns(), "mask must be square");
    assert!(stride > 0, "stride must be > 0");

    let size = mask.rows();
    let strides_per_mask = size.div_ceil(stride);
    let iterations = strides_per_mask * 3;
    let width = (iterations - 1) * stride + size;

    let mut sums = Matrix::zeros(width, width);
    for i in 0..iterations {
        for j in 0..iterations {
            for row in 0..size {
                let start = (i * stride + row) * width + j * stride;
                let target = &mut sums.values_mut()[start..start + size];
                for (sum, &weight) in target.iter_mut().zip(mask.row_slice(row)) {
                    *sum += weight;
                }
            }
        }
    }

    // The middle period only sees full overlaps.
    let start = stride * strides_per_mask;
    sums.slice_get(start..start + stride, start..start + stride)
}

/// True when every phase of a `stride` tiling of `mask` receives some weight.
pub fn covers_every_phase(mask: &Matrix, stride: usize) -> bool {
    phase_weights(mask, stride).iter().all(|&weight| weight > 0.0)
}

/// Reciprocal of the summed mask weight landing on each phase of a `stride` tiling.
///
/// The result is `stride x stride`; entry `(r, c)` applies to output sample
/// `(row, column)` with `row % stride == r` and `column % stride == c`.
///
/// # Panics
///
/// Panics if some phase receives no weight at all, which means the stride outruns
/// the mask support. [`covers_every_phase`] checks this up front.
pub fn build_divisor_mask(mask: &Matrix, stride: usize) -> Matrix {
    let size = mask.rows();
    let mut divisor = phase_weights(mask, stride);
    for value in divisor.iter_mut() {
        assert!(
            *value > 0.0,
            "mask of size {size} leaves uncovered samples at stride {stride}"
        );
        *value = 1.0 / *value;
    }
    divisor
}

/// Linear indices of the nonzero mask cells.
pub fn build_useful_indices(mask: &Matrix) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter(|&(_, &weight)| weight != 0.0)
        .map(|(i, _)| i)
        .collect()
}
