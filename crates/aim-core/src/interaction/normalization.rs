//! Spatial normalisation of the propagation kernel.
//!
//! The retarded kernel $\delta(t - R/c)$ is divided by a function of the
//! displacement $\mathbf{R}$ that depends on what the interaction carries:
//! nothing for a bare delay, $R$ for a spherical wave, or $4\pi R$ for the
//! retarded Poisson (scalar potential) kernel.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// No spatial decay.
    #[default]
    Unit,
    /// $1/R$.
    Distance,
    /// $1/(4\pi R)$.
    Poisson,
}

impl Normalization {
    /// Denominator applied to the kernel at displacement `dr`.
    pub fn apply(&self, dr: &[f64; 3]) -> f64 {
        let r = crate::types::norm3(dr);
        match self {
            Normalization::Unit => 1.0,
            Normalization::Distance => r,
            Normalization::Poisson => 4.0 * std::f64::consts::PI * r,
        }
    }
}
