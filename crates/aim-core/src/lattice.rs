//! Regular spatial lattice onto which emitters are binned.
//!
//! The lattice divides space into axis-aligned boxes of pitch `spacing`. A
//! position $\mathbf{r}$ belongs to the box with integer coordinate
//! $\lfloor \mathbf{r} / \mathbf{h} \rfloor$ (component-wise, rounding toward
//! $-\infty$ so negative positions land in the lower box).
//!
//! # Index convention
//!
//! Box coordinates relative to the lower bound map to a linear index in
//! x-major order with z running fastest:
//!
//! $$ \text{idx} = z + N_z (y + N_y x) $$
//!
//! The same convention is used for the kernel tensor storage, the batched
//! transforms along z, and every index computation in the crate.

use std::ops::Range;

use thiserror::Error;

use crate::types::{norm3, Emitter};

/// Errors raised while constructing or querying a lattice.
#[derive(Debug, Error)]
pub enum LatticeError {
    #[error("Invalid lattice spacing {spacing:?}: every component must be positive and finite")]
    InvalidSpacing { spacing: [f64; 3] },

    #[error("Invalid lattice dimensions {dimensions:?}: every axis needs at least one box")]
    InvalidDimensions { dimensions: [usize; 3] },

    #[error("Stencil of order {order} anchored at {anchor:?} leaves the lattice bounds {bounds:?}")]
    StencilOutOfBounds {
        anchor: [i64; 3],
        order: usize,
        bounds: Bounds,
    },

    #[error("Invalid propagation c = {c}, dt = {dt}: the product c * dt must be positive and finite")]
    InvalidPropagation { c: f64, dt: f64 },
}

/// Inclusive lower and exclusive upper box coordinate along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl Bounds {
    /// Number of boxes along each axis.
    pub fn extent(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| (self.max[d] - self.min[d]) as usize)
    }

    /// Whether an absolute box coordinate lies inside the bounds.
    pub fn contains(&self, coord: &[i64; 3]) -> bool {
        (0..3).all(|d| self.min[d] <= coord[d] && coord[d] < self.max[d])
    }
}

/// A lattice of boxes covering a set of emitters.
///
/// Emitters are not moved: the lattice keeps a list of emitter indices stably
/// sorted on their box index, and every box owns a contiguous half-open range
/// of that list.
#[derive(Debug, Clone)]
pub struct Lattice {
    spacing: [f64; 3],
    bounds: Bounds,
    dimensions: [usize; 3],
    num_boxes: usize,
    max_diagonal: f64,
    sorted: Vec<usize>,
    boxes: Vec<Range<usize>>,
}

impl Lattice {
    /// Build a lattice covering `emitters`, padded by `padding` boxes on every side.
    ///
    /// The upper bound receives one extra box so that the lattice fully
    /// contains every emitter coordinate rather than touching its boundary.
    pub fn new(spacing: [f64; 3], emitters: &[Emitter], padding: usize) -> Result<Self, LatticeError> {
        validate_spacing(&spacing)?;
        if emitters.is_empty() {
            log::warn!("Building a lattice without emitters; anchoring it at the origin");
        }

        let bounds = Self::calculate_bounds(&spacing, emitters, padding);
        let mut lattice = Self::from_bounds(spacing, bounds);
        lattice.assign_boxes(emitters);

        log::debug!(
            "Lattice: {} emitters in {:?} boxes (padding {}), max diagonal {:.3}",
            emitters.len(),
            lattice.dimensions,
            padding,
            lattice.max_diagonal
        );

        Ok(lattice)
    }

    /// Build an empty lattice with explicit dimensions, whose lower corner
    /// sits at box coordinate `origin`.
    pub fn with_dimensions(
        spacing: [f64; 3],
        dimensions: [usize; 3],
        origin: [i64; 3],
    ) -> Result<Self, LatticeError> {
        validate_spacing(&spacing)?;
        if dimensions.iter().any(|&n| n == 0) {
            return Err(LatticeError::InvalidDimensions { dimensions });
        }

        let bounds = Bounds {
            min: origin,
            max: [0, 1, 2].map(|d| origin[d] + dimensions[d] as i64),
        };
        let mut lattice = Self::from_bounds(spacing, bounds);
        lattice.assign_boxes(&[]);
        Ok(lattice)
    }

    fn from_bounds(spacing: [f64; 3], bounds: Bounds) -> Self {
        let dimensions = bounds.extent();
        let num_boxes = dimensions.iter().product();
        let diagonal = [0, 1, 2].map(|d| dimensions[d] as f64 * spacing[d]);

        Self {
            spacing,
            bounds,
            dimensions,
            num_boxes,
            max_diagonal: norm3(&diagonal),
            sorted: Vec::new(),
            boxes: Vec::new(),
        }
    }

    /// Compute padded bounds for a set of emitters.
    ///
    /// Tracks the component-wise minimum and maximum grid coordinate, then
    /// subtracts `padding` from the minimum and adds `padding + 1` to the
    /// maximum. An empty emitter set is anchored at the origin box.
    pub fn calculate_bounds(spacing: &[f64; 3], emitters: &[Emitter], padding: usize) -> Bounds {
        let mut coords = emitters.iter().map(|e| grid_coordinate(spacing, &e.position));

        let first = coords.next().unwrap_or([0, 0, 0]);
        let (mut min, mut max) = (first, first);
        for c in coords {
            for d in 0..3 {
                min[d] = min[d].min(c[d]);
                max[d] = max[d].max(c[d]);
            }
        }

        let pad = padding as i64;
        Bounds {
            min: min.map(|m| m - pad),
            max: max.map(|m| m + pad + 1),
        }
    }

    /// Stable-sort emitter indices on box index and record each box's range.
    ///
    /// The ranges are built from a single counting pass rather than one scan
    /// per box.
    fn assign_boxes(&mut self, emitters: &[Emitter]) {
        let box_of: Vec<usize> = emitters
            .iter()
            .map(|e| self.associated_box(&e.position))
            .collect();

        let mut sorted: Vec<usize> = (0..emitters.len()).collect();
        sorted.sort_by_key(|&i| box_of[i]);

        let mut counts = vec![0usize; self.num_boxes];
        for &b in &box_of {
            counts[b] += 1;
        }

        let mut start = 0;
        self.boxes = counts
            .iter()
            .map(|&n| {
                let range = start..start + n;
                start += n;
                range
            })
            .collect();
        self.sorted = sorted;
    }

    /// Integer box coordinate containing `pos`.
    pub fn grid_coordinate(&self, pos: &[f64; 3]) -> [i64; 3] {
        grid_coordinate(&self.spacing, pos)
    }

    /// Linear index of a box coordinate given relative to the lower bound.
    pub fn coord_to_idx(&self, coord: &[i64; 3]) -> usize {
        let [_, ny, nz] = self.dimensions;
        debug_assert!(
            (0..3).all(|d| 0 <= coord[d] && (coord[d] as usize) < self.dimensions[d]),
            "Box coordinate {:?} outside lattice of dimensions {:?}",
            coord,
            self.dimensions
        );
        let [x, y, z] = coord.map(|c| c as usize);
        z + nz * (y + ny * x)
    }

    /// Box coordinate (relative to the lower bound) of a linear index.
    pub fn idx_to_coord(&self, idx: usize) -> [i64; 3] {
        let [_, ny, nz] = self.dimensions;
        debug_assert!(idx < self.num_boxes, "Box index {} out of range", idx);
        let nynz = ny * nz;
        let x = idx / nynz;
        let rem = idx - x * nynz;
        let y = rem / nz;
        let z = rem % nz;
        [x as i64, y as i64, z as i64]
    }

    /// Linear index of the box containing `pos`.
    pub fn associated_box(&self, pos: &[f64; 3]) -> usize {
        let c = self.grid_coordinate(pos);
        self.coord_to_idx(&[0, 1, 2].map(|d| c[d] - self.bounds.min[d]))
    }

    /// Spatial position of the lower corner of a box.
    pub fn spatial_coord_of_box(&self, idx: usize) -> [f64; 3] {
        let c = self.idx_to_coord(idx);
        [0, 1, 2].map(|d| (c[d] + self.bounds.min[d]) as f64 * self.spacing[d])
    }

    /// Linear indices of the `(order + 1)^3` boxes of the interpolation
    /// stencil anchored at the box containing `pos`.
    ///
    /// Offsets run `0..=order` along each axis; the loops nest x outermost
    /// and z innermost.
    pub fn expansion_box_indices(&self, pos: &[f64; 3], order: usize) -> Result<Vec<usize>, LatticeError> {
        let anchor = self.grid_coordinate(pos);
        let far = anchor.map(|a| a + order as i64);
        if !self.bounds.contains(&anchor) || !self.bounds.contains(&far) {
            return Err(LatticeError::StencilOutOfBounds {
                anchor,
                order,
                bounds: self.bounds,
            });
        }

        let origin = [0, 1, 2].map(|d| anchor[d] - self.bounds.min[d]);
        let n = order as i64;
        let mut indices = Vec::with_capacity((order + 1).pow(3));
        for dx in 0..=n {
            for dy in 0..=n {
                for dz in 0..=n {
                    indices.push(self.coord_to_idx(&[origin[0] + dx, origin[1] + dy, origin[2] + dz]));
                }
            }
        }

        Ok(indices)
    }

    /// Number of time steps a signal needs to cross the whole lattice,
    /// $\lceil d_{\max} / (c \, \Delta t) \rceil$.
    ///
    /// Fails unless `c * dt` is positive and finite, or if the step count
    /// does not fit in a `usize`.
    pub fn max_transit_steps(&self, c: f64, dt: f64) -> Result<usize, LatticeError> {
        let step = c * dt;
        let steps = (self.max_diagonal / step).ceil();
        if !(step.is_finite() && step > 0.0 && steps < usize::MAX as f64) {
            return Err(LatticeError::InvalidPropagation { c, dt });
        }
        Ok(steps as usize)
    }

    /// Shape of the circulant kernel tensor: temporal depth (transit steps
    /// plus `pad`), then x, y, and the doubled z axis.
    pub fn circulant_shape(&self, c: f64, dt: f64, pad: usize) -> Result<[usize; 4], LatticeError> {
        let [nx, ny, nz] = self.dimensions;
        let depth = self
            .max_transit_steps(c, dt)?
            .checked_add(pad)
            .ok_or(LatticeError::InvalidPropagation { c, dt })?;
        Ok([depth, nx, ny, 2 * nz])
    }

    /// Indices of the emitters inside box `idx`, in input order.
    pub fn box_contents(&self, idx: usize) -> &[usize] {
        &self.sorted[self.boxes[idx].clone()]
    }

    /// Range of each box into [`Lattice::sorted_emitters`].
    pub fn box_ranges(&self) -> &[Range<usize>] {
        &self.boxes
    }

    /// Emitter indices stably sorted on their box index.
    pub fn sorted_emitters(&self) -> &[usize] {
        &self.sorted
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    pub fn num_boxes(&self) -> usize {
        self.num_boxes
    }

    pub fn max_diagonal(&self) -> f64 {
        self.max_diagonal
    }
}

fn grid_coordinate(spacing: &[f64; 3], pos: &[f64; 3]) -> [i64; 3] {
    [0, 1, 2].map(|d| (pos[d] / spacing[d]).floor() as i64)
}

fn validate_spacing(spacing: &[f64; 3]) -> Result<(), LatticeError> {
    if spacing.iter().all(|&h| h.is_finite() && h > 0.0) {
        Ok(())
    } else {
        Err(LatticeError::InvalidSpacing { spacing: *spacing })
    }
}
