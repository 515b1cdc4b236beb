//! Adaptive Integral Method (AIM) evaluator.
//!
//! Setup happens once per emitter configuration:
//!
//! 1. The emitters are binned on a [`Lattice`] and projected onto stencils of
//!    boxes ([`get_expansions`]).
//! 2. The propagation kernel is tabulated for every box displacement and
//!    retarded step, and mirrored along z into a circulant tensor
//!    ([`kernel`]).
//! 3. Each z lane of that tensor is Fourier transformed, giving the
//!    frequency table in which the z convolution is diagonal ([`spectral`]).
//!
//! At step $n$ the field on box $(x, y, \cdot)$ is then
//!
//! $$ \hat{E}_n(x, y, k) = \sum_{t \ge 1} \sum_{x', y'}
//!    \hat{G}_t(|x - x'|, |y - y'|, k) \, \hat{\rho}_{n-t}(x', y', k) $$
//!
//! where $\hat{\rho}_{s}$ is the z-transformed, zero-padded source density
//! projected from the history at step $s$. Each density is transformed once
//! and kept in a ring of `depth - 1` slots until it falls out of the kernel's
//! reach. One inverse transform per step brings the field back to the boxes,
//! where each emitter gathers it through its stencil weights.
//!
//! An emitter whose stencil spans several boxes would also see its own
//! density through the kernel. That self term,
//!
//! $$ S_t(e) = \sum_{b, b'} w_b \, w_{b'} \, G_t(\mathbf{r}_b - \mathbf{r}_{b'}), $$
//!
//! is tabulated at setup and subtracted after the gather, so every emitter
//! only feels the others.

pub mod kernel;
pub mod spectral;

use std::sync::{Mutex, PoisonError};

use ndarray::parallel::prelude::*;
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView3, Axis};
use num_complex::Complex64;
use rustfft::FftPlanner;

use super::{check_history, validate_params, Interaction, InteractionError, Normalization, ResultArray};
use crate::expansion::{get_expansions, ExpansionTable};
use crate::history::History;
use crate::lattice::Lattice;
use crate::types::{Emitter, SimulationParams};
use spectral::{SpectralDiagonalizer, TransformPair};

/// The AIM interaction, holding the lattice and the diagonalised kernel.
pub struct AimInteraction {
    lattice: Lattice,
    expansions: ExpansionTable,
    normalization: Normalization,
    interpolation_order: usize,
    c: f64,
    dt: f64,
    /// Kernel spectra, shape `(depth - 1, Nx, Ny, Nz + 1)`; slice `k` is
    /// retarded step `k + 1`. Never mutated after construction.
    fourier_table: Array4<Complex64>,
    /// Stencil self terms, shape `(num_emitters, depth - 1)`.
    self_terms: Array2<f64>,
    transforms: TransformPair,
    /// `(x, y)` columns touched by at least one emitter stencil.
    columns: Vec<[usize; 2]>,
    sources: Mutex<SourceRing>,
}

/// Transformed source densities of recent steps.
///
/// Step `s` lives in slot `s mod (depth - 1)`. A slot is reused only if it
/// was projected from the same step and the same emitter values, so a
/// changed or different history is picked up on the next evaluation.
struct SourceRing {
    /// Shape `(depth - 1, Nx, Ny, 2 Nz)`.
    spectra: Array4<Complex64>,
    tags: Vec<Option<SlotTag>>,
}

struct SlotTag {
    step: i64,
    values: Vec<Option<Complex64>>,
}

impl SourceRing {
    fn new(shape: [usize; 4]) -> Result<Self, InteractionError> {
        Ok(Self {
            spectra: try_zeros(shape, "source spectrum ring")?,
            tags: (0..shape[0]).map(|_| None).collect(),
        })
    }
}

impl AimInteraction {
    /// Build the lattice from the emitters (padded by the expansion order)
    /// and precompute the kernel.
    pub fn new(
        emitters: &[Emitter],
        params: &SimulationParams,
        normalization: Normalization,
    ) -> Result<Self, InteractionError> {
        validate_params(params)?;
        let lattice = Lattice::new(params.spacing, emitters, params.expansion_order)?;
        Self::with_lattice(emitters, lattice, params, normalization)
    }

    /// Precompute the kernel on an existing lattice.
    ///
    /// `params.spacing` is ignored in favour of the lattice's own spacing.
    pub fn with_lattice(
        emitters: &[Emitter],
        lattice: Lattice,
        params: &SimulationParams,
        normalization: Normalization,
    ) -> Result<Self, InteractionError> {
        validate_params(params)?;
        let expansions = get_expansions(params.expansion_order, &lattice, emitters)?;

        let [_, _, nz] = lattice.dimensions();
        let mut planner = FftPlanner::new();
        let transforms = TransformPair::new(&mut planner, 2 * nz);
        let diagonalizer = SpectralDiagonalizer::new(&mut planner, 2 * nz);

        let shape = kernel_shape(&lattice, params.c, params.dt, params.interpolation_order)?;
        let mut gmatrix = kernel::circulant_workspace(shape)?;
        kernel::fill_gmatrix_table(
            &mut gmatrix,
            &lattice,
            params.c,
            params.dt,
            params.interpolation_order,
            normalization,
        );
        let self_terms = stencil_self_terms(&gmatrix, &lattice, &expansions);
        let fourier_table = diagonalizer.execute(&gmatrix)?;
        drop(gmatrix);

        let sources = SourceRing::new(shape)?;

        let mut columns: Vec<[usize; 2]> = (0..expansions.num_emitters())
            .flat_map(|e| expansions.stencil(e).collect::<Vec<_>>())
            .map(|(b, _)| {
                let [x, y, _] = lattice.idx_to_coord(b);
                [x as usize, y as usize]
            })
            .collect();
        columns.sort_unstable();
        columns.dedup();

        Ok(Self {
            lattice,
            expansions,
            normalization,
            interpolation_order: params.interpolation_order,
            c: params.c,
            dt: params.dt,
            fourier_table,
            self_terms,
            transforms,
            columns,
            sources: Mutex::new(sources),
        })
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn expansions(&self) -> &ExpansionTable {
        &self.expansions
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn interpolation_order(&self) -> usize {
        self.interpolation_order
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn fourier_table(&self) -> &Array4<Complex64> {
        &self.fourier_table
    }

    /// Number of retarded steps the kernel spans, i.e. the history depth an
    /// evaluation reads.
    pub fn temporal_depth(&self) -> usize {
        self.fourier_table.len_of(Axis(0)) + 1
    }

    /// Make sure the ring holds the transformed density of `step` and return
    /// its slot.
    fn load_sources(&self, ring: &mut SourceRing, history: &History, step: i64) -> usize {
        let slot = step.rem_euclid(ring.tags.len() as i64) as usize;
        let values: Vec<Option<Complex64>> = (0..self.expansions.num_emitters())
            .map(|e| history.value(e, step))
            .collect();

        if let Some(tag) = &ring.tags[slot] {
            if tag.step == step && tag.values == values {
                return slot;
            }
        }

        ring.tags[slot] = None;
        let mut density = ring.spectra.index_axis_mut(Axis(0), slot);
        density.fill(Complex64::new(0.0, 0.0));
        for (e, value) in values.iter().enumerate() {
            let Some(value) = *value else {
                continue;
            };
            for (b, w) in self.expansions.stencil(e) {
                let [x, y, z] = self.lattice.idx_to_coord(b);
                density[[x as usize, y as usize, z as usize]] += value * w;
            }
        }
        self.transforms.forward(density);

        ring.tags[slot] = Some(SlotTag { step, values });
        slot
    }

    /// `fields += G_t * rho` in the z frequency domain.
    ///
    /// The kernel stores only the non-redundant half of each real spectrum;
    /// the upper bins are their conjugate mirror. Each observation x-plane is
    /// accumulated by one task.
    fn accumulate(&self, fields: &mut Array3<Complex64>, kernel: ArrayView3<Complex64>, sources: ArrayView3<Complex64>) {
        let len = fields.len_of(Axis(2));
        let half = len / 2;
        let ny = fields.len_of(Axis(1));

        fields
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(ox, mut plane)| {
                for oy in 0..ny {
                    let mut out = plane.row_mut(oy);
                    for &[sx, sy] in &self.columns {
                        let g = kernel.slice(s![ox.abs_diff(sx), oy.abs_diff(sy), ..]);
                        let rho = sources.slice(s![sx, sy, ..]);
                        for k in 0..len {
                            let gk = if k <= half { g[k] } else { g[len - k].conj() };
                            out[k] += gk * rho[k];
                        }
                    }
                }
            });
    }

    /// Interpolate box fields back onto every emitter.
    fn gather(&self, fields: &Array3<Complex64>) -> ResultArray {
        Array1::from_iter((0..self.expansions.num_emitters()).map(|e| {
            self.expansions
                .stencil(e)
                .map(|(b, w)| {
                    let [x, y, z] = self.lattice.idx_to_coord(b);
                    fields[[x as usize, y as usize, z as usize]] * w
                })
                .sum::<Complex64>()
        }))
    }

    fn remove_self_terms(&self, result: &mut ResultArray, history: &History, step: i64) {
        for (e, value) in result.iter_mut().enumerate() {
            for (slice, &weight) in self.self_terms.row(e).iter().enumerate() {
                let past = step - (slice as i64 + 1);
                if past < history.first_step() {
                    break;
                }
                if let Some(source) = history.value(e, past) {
                    *value -= source * weight;
                }
            }
        }
    }
}

impl Interaction for AimInteraction {
    /// Concurrent calls on one evaluator share the source ring and are
    /// serialised on it.
    fn evaluate(&self, history: &History, step: i64) -> ResultArray {
        check_history(history, self.expansions.num_emitters(), step);

        let [nx, ny, nz] = self.lattice.dimensions();
        let mut fields = Array3::<Complex64>::zeros((nx, ny, 2 * nz));

        {
            let mut ring = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
            for (slice, kernel) in self.fourier_table.outer_iter().enumerate() {
                let past = step - (slice as i64 + 1);
                if past < history.first_step() {
                    break;
                }
                let slot = self.load_sources(&mut ring, history, past);
                self.accumulate(&mut fields, kernel, ring.spectra.index_axis(Axis(0), slot));
            }
        }

        self.transforms.inverse(fields.view_mut());
        let mut result = self.gather(&fields);
        self.remove_self_terms(&mut result, history, step);
        result
    }

    fn method_name(&self) -> &str {
        "Adaptive Integral Method (AIM)"
    }
}

/// Shape of the kernel workspace, `(depth - 1, Nx, Ny, 2 Nz)`.
///
/// The temporal depth is the transit time across the lattice plus the
/// interpolation order, so that the farthest displacement keeps every node
/// of its interpolation stencil.
fn kernel_shape(lattice: &Lattice, c: f64, dt: f64, interpolation_order: usize) -> Result<[usize; 4], InteractionError> {
    let [depth, nx, ny, len] = lattice.circulant_shape(c, dt, interpolation_order)?;
    let shape = [depth.saturating_sub(1), nx, ny, len];

    log::debug!(
        "AIM kernel: lattice {:?}, temporal depth {}, table {:?}, source ring {:?}",
        lattice.dimensions(),
        depth,
        [shape[0], nx, ny, len / 2 + 1],
        shape
    );

    Ok(shape)
}

/// $S_t(e)$ for every emitter and retarded step, read from the real-space
/// kernel before it is transformed.
fn stencil_self_terms(gmatrix: &Array4<f64>, lattice: &Lattice, expansions: &ExpansionTable) -> Array2<f64> {
    let mut terms = Array2::<f64>::zeros((expansions.num_emitters(), gmatrix.len_of(Axis(0))));

    terms
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(e, mut row)| {
            let stencil: Vec<([i64; 3], f64)> = expansions
                .stencil(e)
                .map(|(b, w)| (lattice.idx_to_coord(b), w))
                .collect();
            for (a, wa) in &stencil {
                for (b, wb) in &stencil {
                    let [dx, dy, dz] = [0, 1, 2].map(|d| a[d].abs_diff(b[d]) as usize);
                    row.scaled_add(wa * wb, &gmatrix.slice(s![.., dx, dy, dz]));
                }
            }
        });

    terms
}

/// Zero-filled 4D array, reporting allocation failure instead of aborting.
fn try_zeros<T: Clone + Default>(shape: [usize; 4], what: &'static str) -> Result<Array4<T>, InteractionError> {
    let len = shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n));
    let bytes = len.and_then(|n| n.checked_mul(std::mem::size_of::<T>()));
    let error = || InteractionError::Allocation {
        what,
        shape,
        bytes: bytes.unwrap_or(usize::MAX),
        depth: shape[0].saturating_add(1),
    };

    let len = len.ok_or_else(error)?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| error())?;
    data.resize(len, T::default());

    Array4::from_shape_vec(shape, data).map_err(|_| error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn corner_pair() -> Vec<Emitter> {
        vec![Emitter::new([0.0, 0.0, 0.0]), Emitter::new([4.0, 4.0, 4.0])]
    }

    #[test]
    fn test_frequency_table_shape() {
        let params = SimulationParams::default();
        let aim = AimInteraction::new(&corner_pair(), &params, Normalization::Unit).unwrap();

        // 5x5x5 lattice, ceil(sqrt(75)) = 9 transit steps, plus order 3
        assert_eq!(aim.lattice().dimensions(), [5, 5, 5]);
        assert_eq!(aim.temporal_depth(), 12);
        assert_eq!(aim.fourier_table().shape(), &[11, 5, 5, 6]);
        assert_eq!(aim.method_name(), "Adaptive Integral Method (AIM)");
    }

    #[test]
    fn test_no_history_means_no_interaction() {
        let params = SimulationParams::default();
        let aim = AimInteraction::new(&corner_pair(), &params, Normalization::Unit).unwrap();

        let mut history = History::new(2, 0, 8);
        history.fill_with(0, |_| Complex64::new(1.0, 0.0));
        history.fill_with(1, |_| Complex64::new(1.0, 0.0));

        // Step 0 has nothing before it
        let result = aim.evaluate(&history, 0);
        assert!(result.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn test_invalid_propagation_parameters() {
        let params = SimulationParams {
            c: 0.0,
            ..Default::default()
        };
        let err = AimInteraction::new(&corner_pair(), &params, Normalization::Unit)
            .err()
            .unwrap();
        assert!(matches!(err, InteractionError::InvalidParameter { name: "c", .. }));
    }

    #[test]
    fn test_allocation_overflow_is_reported() {
        let err = try_zeros::<f64>([usize::MAX, 2, 2, 2], "test table").unwrap_err();
        match err {
            InteractionError::Allocation { shape, bytes, .. } => {
                assert_eq!(shape[0], usize::MAX);
                assert_eq!(bytes, usize::MAX);
            }
            other => panic!("Unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lone_emitter_feels_no_self_field() {
        let emitters = vec![Emitter::new([0.3, 0.4, 0.2])];
        let mut history = History::new(1, 0, 48);
        history.fill_with(0, |s| Complex64::new(1.0 + 0.1 * s as f64, -0.5));

        for order in 0..=2 {
            let params = SimulationParams {
                expansion_order: order,
                ..Default::default()
            };
            let aim = AimInteraction::new(&emitters, &params, Normalization::Distance).unwrap();
            if order > 0 {
                assert!(aim.self_terms.iter().any(|&s| s != 0.0));
            }
            for step in [5_i64, 20, 47] {
                let field = aim.evaluate(&history, step)[0];
                assert!(field.norm() < 1e-12, "order {order}, step {step}: {field}");
            }
        }
    }

    fn drifting_history(num_emitters: usize) -> History {
        let mut history = History::new(num_emitters, 16, 32);
        for e in 0..num_emitters {
            history.fill_with(e, move |s| {
                let t = s as f64 + 3.0 * e as f64;
                Complex64::new((0.2 * t).cos(), 0.1 * t)
            });
        }
        history
    }

    #[test]
    fn test_sequential_steps_match_fresh_evaluators() {
        let emitters = vec![Emitter::new([0.2, 0.7, 0.1]), Emitter::new([3.6, 2.2, 1.9])];
        let params = SimulationParams {
            expansion_order: 1,
            ..Default::default()
        };
        let history = drifting_history(2);
        let warm = AimInteraction::new(&emitters, &params, Normalization::Distance).unwrap();

        for step in -4..32_i64 {
            let reused = warm.evaluate(&history, step);
            let cold = AimInteraction::new(&emitters, &params, Normalization::Distance)
                .unwrap()
                .evaluate(&history, step);
            for (a, b) in reused.iter().zip(cold.iter()) {
                assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
                assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_cached_sources_follow_history_changes() {
        let emitters = corner_pair();
        let params = SimulationParams::default();
        let aim = AimInteraction::new(&emitters, &params, Normalization::Unit).unwrap();

        let first = drifting_history(2);
        let mut second = drifting_history(2);
        second.fill_with(0, |s| Complex64::new(2.0, s as f64));

        let before = aim.evaluate(&first, 25);
        let changed = aim.evaluate(&second, 25);
        let expected = AimInteraction::new(&emitters, &params, Normalization::Unit)
            .unwrap()
            .evaluate(&second, 25);
        let after = aim.evaluate(&first, 25);

        assert!((changed[1] - before[1]).norm() > 1e-3);
        for e in 0..2 {
            assert_abs_diff_eq!(changed[e].re, expected[e].re, epsilon = 1e-12);
            assert_abs_diff_eq!(changed[e].im, expected[e].im, epsilon = 1e-12);
            assert_abs_diff_eq!(after[e].re, before[e].re, epsilon = 1e-12);
            assert_abs_diff_eq!(after[e].im, before[e].im, epsilon = 1e-12);
        }
    }

    #[test]
    #[should_panic(expected = "outside history window")]
    fn test_step_past_history_panics() {
        let params = SimulationParams::default();
        let aim = AimInteraction::new(&corner_pair(), &params, Normalization::Unit).unwrap();
        let history = History::new(2, 0, 4);
        aim.evaluate(&history, 4);
    }
}
