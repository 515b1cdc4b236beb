//! Per-emitter source history.
//!
//! The retarded interaction at step $n$ depends on every emitter's source
//! quantity (e.g. the coherence $\rho_{01}$) at earlier steps. [`History`]
//! stores one complex value per emitter and step over the window
//! `-window .. num_steps`; the negative part holds initial conditions that
//! precede the first simulated step.

use ndarray::Array2;
use num_complex::Complex64;

/// Complex time series for a set of emitters.
#[derive(Debug, Clone)]
pub struct History {
    first_step: i64,
    /// Shape `(num_emitters, window + num_steps)`.
    values: Array2<Complex64>,
}

impl History {
    /// Zero-initialised history covering steps `-window .. num_steps`.
    pub fn new(num_emitters: usize, window: usize, num_steps: usize) -> Self {
        Self {
            first_step: -(window as i64),
            values: Array2::zeros((num_emitters, window + num_steps)),
        }
    }

    pub fn num_emitters(&self) -> usize {
        self.values.nrows()
    }

    /// First stored step (inclusive).
    pub fn first_step(&self) -> i64 {
        self.first_step
    }

    /// One past the last stored step.
    pub fn end_step(&self) -> i64 {
        self.first_step + self.values.ncols() as i64
    }

    /// Value of `emitter` at `step`, or `None` outside the stored window.
    pub fn value(&self, emitter: usize, step: i64) -> Option<Complex64> {
        let col = self.column(step)?;
        self.values.get([emitter, col]).copied()
    }

    /// Overwrite the value of `emitter` at `step`.
    ///
    /// # Panics
    /// Panics if `step` lies outside the stored window.
    pub fn set(&mut self, emitter: usize, step: i64, value: Complex64) {
        let col = self.column(step).unwrap_or_else(|| {
            panic!(
                "Step {} outside history window [{}, {})",
                step,
                self.first_step,
                self.end_step()
            )
        });
        self.values[[emitter, col]] = value;
    }

    /// Fill every stored step of `emitter` from a function of the step.
    pub fn fill_with<F>(&mut self, emitter: usize, f: F)
    where
        F: Fn(i64) -> Complex64,
    {
        let first = self.first_step;
        for (col, v) in self.values.row_mut(emitter).iter_mut().enumerate() {
            *v = f(first + col as i64);
        }
    }

    fn column(&self, step: i64) -> Option<usize> {
        if step < self.first_step || step >= self.end_step() {
            None
        } else {
            Some((step - self.first_step) as usize)
        }
    }
}
