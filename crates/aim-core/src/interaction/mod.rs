//! Retarded interaction abstraction and implementations.
//!
//! The [`Interaction`] trait defines the per-step evaluation hook that a time
//! integrator calls once per step. Two implementations are provided:
//!
//! - [`aim::AimInteraction`]: the Adaptive Integral Method. Setup builds a
//!   circulant kernel on a lattice and diagonalises it with an FFT; each step
//!   then costs pointwise products in frequency space.
//! - [`direct::DirectInteraction`]: the brute-force $O(N^2)$ pairwise sum,
//!   used as a reference.

pub mod aim;
pub mod direct;
pub mod normalization;

use ndarray::Array1;
use num_complex::Complex64;
use thiserror::Error;

use crate::history::History;
use crate::lattice::LatticeError;
use crate::types::SimulationParams;

pub use normalization::Normalization;

/// One complex value per emitter.
pub type ResultArray = Array1<Complex64>;

/// Errors that can occur while setting up an interaction.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("Invalid parameter {name} = {value}: must be positive and finite")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error(
        "Failed to allocate {what} of shape {shape:?} ({bytes} bytes, temporal depth {depth})"
    )]
    Allocation {
        what: &'static str,
        shape: [usize; 4],
        bytes: usize,
        depth: usize,
    },

    #[error("Lattice error: {0}")]
    Lattice(#[from] LatticeError),
}

/// A retarded interaction between emitters, evaluated one step at a time.
pub trait Interaction {
    /// Interaction felt by every emitter at `step`, given the source history.
    ///
    /// History steps earlier than `history.first_step()` are treated as
    /// absent and contribute nothing.
    ///
    /// # Panics
    /// Panics if `step` is not inside the stored history, or if the history
    /// does not hold one series per emitter.
    fn evaluate(&self, history: &History, step: i64) -> ResultArray;

    /// Human-readable name of the method.
    fn method_name(&self) -> &str;
}

/// Check the propagation speed and time step shared by every interaction.
pub(crate) fn validate_params(params: &SimulationParams) -> Result<(), InteractionError> {
    for (name, value) in [("c", params.c), ("dt", params.dt)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(InteractionError::InvalidParameter { name, value });
        }
    }
    Ok(())
}

pub(crate) fn check_history(history: &History, num_emitters: usize, step: i64) {
    assert_eq!(
        history.num_emitters(),
        num_emitters,
        "History holds {} series but the interaction has {} emitters",
        history.num_emitters(),
        num_emitters
    );
    assert!(
        history.first_step() <= step && step < history.end_step(),
        "Step {} outside history window [{}, {})",
        step,
        history.first_step(),
        history.end_step()
    );
}
