//! # AIM Core
//!
//! The numerical backbone of the AIM framework. This crate accelerates
//! time-retarded, distance-decaying interactions between many point emitters
//! with the Adaptive Integral Method: emitters are projected onto a regular
//! lattice, the shift-invariant propagation kernel is built once per retarded
//! time step, extended to a circulant tensor, and diagonalised with an FFT so
//! that each step of the simulation costs pointwise products instead of an
//! $O(N^2)$ pairwise sum.
//!
//! ## Architecture
//!
//! All evaluators implement the [`interaction::Interaction`] trait, which
//! maps a source [`history::History`] and a time step to one complex result
//! per emitter. The accelerated implementation is
//! [`interaction::aim::AimInteraction`]; [`interaction::direct::DirectInteraction`]
//! is the brute-force reference used for validation.
//!
//! ## Modules
//!
//! - [`types`]: Emitters and simulation parameters.
//! - [`lattice`]: Spatial lattice, box indexing, and emitter binning.
//! - [`interpolation`]: Uniform Lagrange interpolation in time.
//! - [`expansion`]: Stencil weights projecting emitters onto lattice boxes.
//! - [`history`]: Per-emitter complex time series.
//! - [`interaction`]: Interaction trait, AIM and direct evaluators.

pub mod expansion;
pub mod history;
pub mod interaction;
pub mod interpolation;
pub mod lattice;
pub mod types;
