//! FFT plans along the z axis of the lattice.
//!
//! A circulant matrix is diagonalised by the discrete Fourier transform, so
//! once the kernel has been embedded as a length-$2N_z$ circulant vector per
//! `(t, x, y)`, a single batched transform turns the z convolution into a
//! pointwise product. rustfft transforms are unnormalised; the inverse in
//! [`TransformPair`] divides by the transform length.

use std::sync::Arc;

use ndarray::{Array4, ArrayView1, ArrayViewMut3, Axis, Zip};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use super::try_zeros;
use crate::interaction::InteractionError;

/// Batched real-to-complex transform of the circulant kernel.
///
/// The plan is created on construction, before the kernel workspace is
/// filled, and applied once by [`SpectralDiagonalizer::execute`].
pub struct SpectralDiagonalizer {
    plan: Arc<dyn Fft<f64>>,
}

impl SpectralDiagonalizer {
    pub fn new(planner: &mut FftPlanner<f64>, len: usize) -> Self {
        Self {
            plan: planner.plan_fft_forward(len),
        }
    }

    /// Length of the transformed (doubled z) axis.
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    /// Transform every z lane of `circulant`, shape `(T, Nx, Ny, 2 Nz)`.
    ///
    /// A real signal has a conjugate-symmetric spectrum, so only the
    /// `Nz + 1` non-redundant bins are kept: the result has shape
    /// `(T, Nx, Ny, Nz + 1)`. Lanes are transformed in parallel.
    pub fn execute(&self, circulant: &Array4<f64>) -> Result<Array4<Complex64>, InteractionError> {
        let len = self.len();
        assert_eq!(
            circulant.len_of(Axis(3)),
            len,
            "Circulant lanes do not match the planned transform length"
        );

        let [t, nx, ny, _] = [0, 1, 2, 3].map(|a| circulant.len_of(Axis(a)));
        let mut spectra: Array4<Complex64> = try_zeros([t, nx, ny, len / 2 + 1], "frequency table")?;

        Zip::from(spectra.lanes_mut(Axis(3)))
            .and(circulant.lanes(Axis(3)))
            .par_for_each(|mut spectrum, signal| {
                let mut buffer: Vec<Complex64> =
                    signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
                self.plan.process(&mut buffer);
                let half = spectrum.len();
                spectrum.assign(&ArrayView1::from(&buffer[..half]));
            });

        Ok(spectra)
    }
}

/// Forward and inverse complex transforms along the last axis of a
/// `(Nx, Ny, 2 Nz)` grid, used for source densities and fields at every step.
pub struct TransformPair {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl TransformPair {
    pub fn new(planner: &mut FftPlanner<f64>, len: usize) -> Self {
        Self {
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// In-place unnormalised forward transform of every z lane.
    pub fn forward(&self, mut data: ArrayViewMut3<Complex64>) {
        process_lanes(self.forward.as_ref(), &mut data);
    }

    /// In-place inverse transform of every z lane, scaled by `1 / len`.
    pub fn inverse(&self, mut data: ArrayViewMut3<Complex64>) {
        process_lanes(self.inverse.as_ref(), &mut data);
        let scale = 1.0 / self.len() as f64;
        data.mapv_inplace(|v| v * scale);
    }
}

fn process_lanes(plan: &dyn Fft<f64>, data: &mut ArrayViewMut3<Complex64>) {
    debug_assert_eq!(data.len_of(Axis(2)), plan.len());

    // Standard layout: lanes are consecutive chunks, which rustfft batches.
    if let Some(buffer) = data.as_slice_mut() {
        plan.process(buffer);
        return;
    }

    for mut lane in data.lanes_mut(Axis(2)) {
        let mut buffer = lane.to_vec();
        plan.process(&mut buffer);
        lane.assign(&ArrayView1::from(&buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use std::f64::consts::PI;

    /// $X_k = \sum_n x_n e^{-2\pi i k n / N}$ evaluated term by term.
    fn reference_dft(signal: &[Complex64]) -> Vec<Complex64> {
        let n = signal.len();
        (0..n)
            .map(|k| {
                signal
                    .iter()
                    .enumerate()
                    .map(|(j, &x)| x * Complex64::from_polar(1.0, -2.0 * PI * (k * j) as f64 / n as f64))
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_forward_matches_closed_form_on_4x4x4() {
        let mut planner = FftPlanner::new();
        let transforms = TransformPair::new(&mut planner, 8);

        // Counting pattern in the physical half, zero padding in the other.
        let mut grid = Array3::<Complex64>::zeros((4, 4, 8));
        let mut i = 1.0;
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    grid[[x, y, z]] = Complex64::new(i, 0.0);
                    i += 1.0;
                }
            }
        }
        let input = grid.clone();
        transforms.forward(grid.view_mut());

        for x in 0..4 {
            for y in 0..4 {
                let lane: Vec<Complex64> = input.slice(ndarray::s![x, y, ..]).to_vec();
                let expected = reference_dft(&lane);
                for z in 0..8 {
                    assert!(
                        (grid[[x, y, z]] - expected[z]).norm_sqr() < 1e-16,
                        "Mismatch at ({x}, {y}, {z}): {} vs {}",
                        grid[[x, y, z]],
                        expected[z]
                    );
                }
                // DC bin is the lane sum; Nyquist bin the alternating sum
                let a = lane[0].re;
                assert_abs_diff_eq!(grid[[x, y, 0]].re, 4.0 * a + 6.0, epsilon = 1e-12);
                assert_abs_diff_eq!(grid[[x, y, 4]].re, -2.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_inverse_undoes_forward() {
        let mut planner = FftPlanner::new();
        let transforms = TransformPair::new(&mut planner, 6);

        let mut grid = Array3::<Complex64>::from_shape_fn((2, 3, 6), |(x, y, z)| {
            Complex64::new((x + 2 * y) as f64 - z as f64, 0.5 * z as f64)
        });
        let original = grid.clone();
        transforms.forward(grid.view_mut());
        transforms.inverse(grid.view_mut());

        for (a, b) in grid.iter().zip(original.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_symmetric_circulant_has_real_half_spectrum() {
        let mut planner = FftPlanner::new();
        let diagonalizer = SpectralDiagonalizer::new(&mut planner, 8);

        // First row [0, a, b, c, 0, c, b, a] of a symmetric circulant.
        let row = [0.0, 0.5, -1.25, 2.0, 0.0, 2.0, -1.25, 0.5];
        let circulant = Array4::from_shape_fn((2, 1, 1, 8), |(t, _, _, z)| (t + 1) as f64 * row[z]);

        let spectra = diagonalizer.execute(&circulant).unwrap();
        assert_eq!(spectra.shape(), &[2, 1, 1, 5]);

        for t in 0..2 {
            let lane: Vec<Complex64> = (0..8).map(|z| Complex64::new(circulant[[t, 0, 0, z]], 0.0)).collect();
            let expected = reference_dft(&lane);
            for k in 0..5 {
                let value = spectra[[t, 0, 0, k]];
                assert_abs_diff_eq!(value.re, expected[k].re, epsilon = 1e-12);
                assert_abs_diff_eq!(value.im, 0.0, epsilon = 1e-12);
            }
        }
    }
}
