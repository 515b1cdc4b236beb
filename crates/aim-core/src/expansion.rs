//! Projection of emitters onto lattice boxes.
//!
//! Each emitter is represented on the lattice by a stencil of
//! $(n+1)^3$ boxes ([`Lattice::expansion_box_indices`]) and one weight per
//! box. The weights are chosen so that the stencil reproduces the emitter's
//! spatial moments up to order $n$ along each axis:
//!
//! $$ \sum_{b} w_b \, (\mathbf{r}_b - \mathbf{r}_0)^{\boldsymbol\alpha}
//!    = (\mathbf{r} - \mathbf{r}_0)^{\boldsymbol\alpha},
//!    \qquad \alpha_x, \alpha_y, \alpha_z \le n $$
//!
//! On a tensor-product stencil this moment-matching (least-squares) system
//! is square and its unique solution is the product of one-dimensional
//! Lagrange weights, which is what [`get_expansions`] evaluates.
//!
//! The same weights serve both directions: scattering an emitter's source
//! density onto boxes, and gathering a box field back at the emitter.

use ndarray::Array2;

use crate::interpolation::UniformLagrangeSet;
use crate::lattice::{Lattice, LatticeError};
use crate::types::Emitter;

/// Stencil boxes and weights for every emitter.
#[derive(Debug, Clone)]
pub struct ExpansionTable {
    order: usize,
    /// Box indices, shape `(num_emitters, (order + 1)^3)`.
    indices: Array2<usize>,
    /// Stencil weights, same shape as `indices`.
    weights: Array2<f64>,
}

impl ExpansionTable {
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_emitters(&self) -> usize {
        self.indices.nrows()
    }

    pub fn stencil_size(&self) -> usize {
        self.indices.ncols()
    }

    /// `(box index, weight)` pairs of one emitter's stencil.
    pub fn stencil(&self, emitter: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices
            .row(emitter)
            .into_iter()
            .copied()
            .zip(self.weights.row(emitter).into_iter().copied())
    }
}

/// Compute the stencil weights of every emitter on `lattice`.
///
/// Fails if a stencil of the requested order does not fit inside the lattice,
/// which happens when the lattice padding is smaller than `order`.
pub fn get_expansions(
    order: usize,
    lattice: &Lattice,
    emitters: &[Emitter],
) -> Result<ExpansionTable, LatticeError> {
    let stencil_size = (order + 1).pow(3);
    let mut indices = Array2::<usize>::zeros((emitters.len(), stencil_size));
    let mut weights = Array2::<f64>::zeros((emitters.len(), stencil_size));

    let lagrange = UniformLagrangeSet::new(order);
    let spacing = lattice.spacing();

    for (e, emitter) in emitters.iter().enumerate() {
        let boxes = lattice.expansion_box_indices(&emitter.position, order)?;
        let anchor = lattice.grid_coordinate(&emitter.position);

        // One-dimensional weights along each axis, at the emitter's offset
        // from the anchor box in units of the lattice spacing.
        let axis_weights: Vec<Vec<f64>> = (0..3)
            .map(|d| {
                let offset = emitter.position[d] / spacing[d] - anchor[d] as f64;
                let table = lagrange.evaluate_derivative_table_at_x(offset, 1.0);
                table.row(0).to_vec()
            })
            .collect();

        let mut w = 0;
        for wx in &axis_weights[0] {
            for wy in &axis_weights[1] {
                for wz in &axis_weights[2] {
                    indices[[e, w]] = boxes[w];
                    weights[[e, w]] = wx * wy * wz;
                    w += 1;
                }
            }
        }
    }

    Ok(ExpansionTable {
        order,
        indices,
        weights,
    })
}
