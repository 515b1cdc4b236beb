//! Circulant propagation kernel.
//!
//! For every box displacement $\mathbf{R}$ relative to box 0 and every
//! retarded step $t \ge 1$, the kernel holds the weight with which the source
//! density $t$ steps in the past contributes to the present field:
//!
//! $$ G_t(\mathbf{R}) = \frac{L_{p}(u)}{\nu(\mathbf{R})}, \qquad
//!    p = \lceil t - R/(c\Delta t) \rceil, \quad
//!    u = \operatorname{frac}\bigl(R/(c\Delta t)\bigr) $$
//!
//! where $L_p$ is the Lagrange basis of [`UniformLagrangeSet`] and $\nu$ the
//! spatial [`Normalization`]. Only $0 \le p \le n$ (the interpolation order)
//! gives a nonzero weight, so the kernel has compact temporal support around
//! the light-cone arrival $t \approx R/(c\Delta t)$.
//!
//! The kernel depends only on $|\Delta x|, |\Delta y|, |\Delta z|$, so its
//! first row along z determines a symmetric Toeplitz matrix. Mirroring that
//! row into a vector of length $2N_z$ gives the circulant embedding that the
//! FFT diagonalises.

use ndarray::parallel::prelude::*;
use ndarray::{Array4, Axis};

use super::try_zeros;
use crate::interaction::{InteractionError, Normalization};
use crate::interpolation::{split_double, UniformLagrangeSet};
use crate::lattice::Lattice;
use crate::types::{norm3, sub3};

/// Allocate the zeroed workspace `(depth - 1, Nx, Ny, 2 Nz)`.
pub fn circulant_workspace(shape: [usize; 4]) -> Result<Array4<f64>, InteractionError> {
    try_zeros(shape, "circulant kernel workspace")
}

/// Fill the circulant kernel. Slice `k` along the first axis holds retarded
/// step `t = k + 1`.
///
/// Entries outside the compact temporal support are left untouched, so
/// `gmatrix` is expected to be zeroed. Planes of constant x are filled in
/// parallel; each plane is written by exactly one task.
pub fn fill_gmatrix_table(
    gmatrix: &mut Array4<f64>,
    lattice: &Lattice,
    c: f64,
    dt: f64,
    interpolation_order: usize,
    normalization: Normalization,
) {
    let [num_steps, nx, ny, len] = [0, 1, 2, 3].map(|a| gmatrix.len_of(Axis(a)));
    let nz = len / 2;
    assert_eq!(
        [nx, ny, nz],
        lattice.dimensions(),
        "Kernel workspace does not match the lattice"
    );

    let interp = UniformLagrangeSet::new(interpolation_order);
    let origin = lattice.spatial_coord_of_box(0);
    let max_idx = interpolation_order as f64;

    gmatrix
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .for_each(|(x, mut plane)| {
            for y in 0..ny {
                for z in 0..nz {
                    let box_idx = lattice.coord_to_idx(&[x as i64, y as i64, z as i64]);
                    if box_idx == 0 {
                        continue;
                    }

                    let dr = sub3(&lattice.spatial_coord_of_box(box_idx), &origin);
                    let arg = norm3(&dr) / (c * dt);
                    let (_, fraction) = split_double(arg);

                    // Shared by every time step of this displacement
                    let weights = interp.evaluate_derivative_table_at_x(fraction, dt);
                    let scale = normalization.apply(&dr);

                    for slice in 0..num_steps {
                        let t = (slice + 1) as f64;
                        let polynomial_idx = (t - arg).ceil();
                        if !(0.0..=max_idx).contains(&polynomial_idx) {
                            continue;
                        }

                        let value = weights[[0, polynomial_idx as usize]] / scale;
                        plane[[slice, y, z]] = value;
                        if z != 0 {
                            plane[[slice, y, len - z]] = value;
                        }
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ORDER: usize = 3;

    fn build(normalization: Normalization) -> (Lattice, Array4<f64>) {
        let lattice = Lattice::with_dimensions([1.0, 1.0, 1.0], [4, 4, 4], [0, 0, 0]).unwrap();
        let [depth, nx, ny, len] = lattice.circulant_shape(1.0, 1.0, ORDER).unwrap();
        let mut gmatrix = circulant_workspace([depth - 1, nx, ny, len]).unwrap();
        fill_gmatrix_table(&mut gmatrix, &lattice, 1.0, 1.0, ORDER, normalization);
        (lattice, gmatrix)
    }

    #[test]
    fn test_circulant_mirror() {
        let (_, g) = build(Normalization::Unit);
        assert_eq!(g.shape(), &[9, 4, 4, 8]);

        for ((t, x, y, z), &value) in g.indexed_iter() {
            if z > 0 && z < 4 {
                assert_eq!(value, g[[t, x, y, 8 - z]], "Mirror broken at ({t}, {x}, {y}, {z})");
            }
            if z == 4 {
                assert_eq!(value, 0.0, "The Nyquist column is never filled");
            }
        }
    }

    #[test]
    fn test_compact_temporal_support() {
        let (lattice, g) = build(Normalization::Unit);
        let interp = UniformLagrangeSet::new(ORDER);

        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    let r = ((x * x + y * y + z * z) as f64).sqrt();
                    let weights = interp.evaluate_derivative_table_at_x(r.fract(), 1.0);

                    for slice in 0..g.len_of(Axis(0)) {
                        let value = g[[slice, x, y, z]];
                        let p = ((slice + 1) as f64 - r).ceil();

                        if (x, y, z) == (0, 0, 0) || !(0.0..=ORDER as f64).contains(&p) {
                            assert_eq!(value, 0.0);
                        } else {
                            assert_eq!(value, weights[[0, p as usize]]);
                        }
                    }
                }
            }
        }
        assert_eq!(lattice.coord_to_idx(&[0, 0, 0]), 0);
    }

    #[test]
    fn test_weights_over_time_sum_to_normalization() {
        // Every displacement here has its full stencil inside the depth, so the
        // weights along t form a partition of unity scaled by 1/R.
        let (_, g) = build(Normalization::Distance);
        for x in 0..4 {
            for y in 0..4 {
                for z in 1..4 {
                    let r = ((x * x + y * y + z * z) as f64).sqrt();
                    let total: f64 = (0..g.len_of(Axis(0))).map(|t| g[[t, x, y, z]]).sum();
                    assert_relative_eq!(total, 1.0 / r, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_on_lattice_arrival_is_a_single_step() {
        // R = 2 falls exactly on a time step: only t = 2 carries weight.
        let (_, g) = build(Normalization::Unit);
        for slice in 0..g.len_of(Axis(0)) {
            let expected = if slice + 1 == 2 { 1.0 } else { 0.0 };
            assert_relative_eq!(g[[slice, 2, 0, 0]], expected, epsilon = 1e-14);
            assert_relative_eq!(g[[slice, 0, 0, 2]], expected, epsilon = 1e-14);
            assert_relative_eq!(g[[slice, 0, 0, 6]], expected, epsilon = 1e-14);
        }
    }
}
