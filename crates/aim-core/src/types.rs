//! Core types shared across the AIM framework.
//!
//! This module defines the point emitters that source the interaction and the
//! numerical parameters that control its discretisation in space and time.

use serde::{Deserialize, Serialize};

/// A single point emitter (e.g. a quantum dot) in the simulation domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    /// Position in 3D space.
    pub position: [f64; 3],
}

impl Emitter {
    pub fn new(position: [f64; 3]) -> Self {
        Self { position }
    }
}

/// Parameters defining the space-time discretisation of an interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Lattice pitch along each axis.
    pub spacing: [f64; 3],
    /// Propagation speed of the interaction.
    pub c: f64,
    /// Time step of the driving integrator.
    pub dt: f64,
    /// Order of the Lagrange polynomial used to interpolate in time.
    pub interpolation_order: usize,
    /// Order of the spatial stencil projecting emitters onto the lattice.
    /// Also used as the lattice padding so stencils never leave the bounds.
    pub expansion_order: usize,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            spacing: [1.0, 1.0, 1.0],
            c: 1.0,
            dt: 1.0,
            interpolation_order: 3,
            expansion_order: 0,
        }
    }
}

/// Euclidean norm of a 3-vector.
pub(crate) fn norm3(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Component-wise difference `a - b`.
pub(crate) fn sub3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
