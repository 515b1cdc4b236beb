//! Uniform Lagrange interpolation in time.
//!
//! Retarded interactions need a source's state at $t - R/c$, which in general
//! falls between stored time steps. The history is interpolated with a
//! Lagrange polynomial through `order + 1` equally spaced nodes at
//! $u = 0, 1, \ldots, n$:
//!
//! $$ L_i(u) = \prod_{j \neq i} \frac{u - j}{i - j} $$
//!
//! Node $i$ represents the sample $i$ steps further in the past than the most
//! recent node, so an offset of $u$ (the fractional part of the delay in
//! units of $\Delta t$) reconstructs the value $u$ steps behind that node.

use ndarray::Array2;

/// Number of rows of a derivative table: value, first, and second derivative.
pub const NUM_DERIVATIVES: usize = 3;

/// Lagrange basis on the uniform nodes `0..=order`.
#[derive(Debug, Clone, Copy)]
pub struct UniformLagrangeSet {
    order: usize,
}

impl UniformLagrangeSet {
    pub fn new(order: usize) -> Self {
        Self { order }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Evaluate every basis polynomial and its first two derivatives at `x`.
    ///
    /// Returns a table of shape `(NUM_DERIVATIVES, order + 1)` indexed by
    /// `[derivative][node]`. Derivatives are taken with respect to time, so
    /// row $d$ carries a factor $\Delta t^{-d}$.
    pub fn evaluate_derivative_table_at_x(&self, x: f64, dt: f64) -> Array2<f64> {
        let n = self.order + 1;
        let mut table = Array2::<f64>::zeros((NUM_DERIVATIVES, n));

        for i in 0..n {
            table[[0, i]] = self.basis(i, x, &[]);

            let mut d1 = 0.0;
            let mut d2 = 0.0;
            for m in (0..n).filter(|&m| m != i) {
                let inv_m = 1.0 / (i as f64 - m as f64);
                d1 += inv_m * self.basis(i, x, &[m]);

                for l in (0..n).filter(|&l| l != i && l != m) {
                    let inv_l = 1.0 / (i as f64 - l as f64);
                    d2 += inv_m * inv_l * self.basis(i, x, &[m, l]);
                }
            }

            table[[1, i]] = d1 / dt;
            table[[2, i]] = d2 / (dt * dt);
        }

        table
    }

    /// $\prod_{j \neq i, j \notin \text{skip}} (x - j) / (i - j)$.
    fn basis(&self, i: usize, x: f64, skip: &[usize]) -> f64 {
        (0..=self.order)
            .filter(|&j| j != i && !skip.contains(&j))
            .map(|j| (x - j as f64) / (i as f64 - j as f64))
            .product()
    }
}

/// Split a non-negative real into its integer and fractional parts.
pub fn split_double(arg: f64) -> (i64, f64) {
    let whole = arg.floor();
    (whole as i64, arg - whole)
}
