//! Parallel tiled overlap-add reconstruction of the upsampled grid.
//!
//! Tiles are processed one row-band per task. A band writes `patch * factor` output
//! rows starting at `band * stride * factor`, so neighbouring bands overlap. The
//! output is cut into stripes of `stride * factor` rows, each behind its own mutex,
//! and a band holds every stripe it touches while it runs.
//!
//! Locking order: a band only ever acquires stripes in ascending index order, so
//! no two bands can wait on each other in a cycle.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use tracing::{trace, warn};

use crate::matching::Coefficients;
use crate::matrix::Matrix;
use crate::tiles::TileGrid;


/// Largest quantised output sample.
pub const OUTPUT_MAX: f32 = 65535.0;

/// Read-only inputs of one synthesis run.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    /// Tile grid at input resolution.
    pub grid: &'a TileGrid,
    pub factor: usize,
    pub output_rows: usize,
    pub output_columns: usize,
    pub coefficients: &'a Coefficients,
    /// High-frequency banks by dictionary index, one atom per row.
    pub high_banks: &'a [&'a Matrix],
    pub index_mask: &'a [usize],
    /// Per-tile means, `grid.rows x grid.columns`.
    pub means: &'a Matrix,
    /// Radial mask of side `patch_size * factor`.
    pub mask: &'a Matrix,
    /// Divisor mask of side `stride * factor`.
    pub divisor: &'a Matrix,
}

/// Accumulated output and the extrema of every value written during accumulation.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub grid: Matrix,
    pub min: f32,
    pub max: f32,
}

impl Synthesized {
    /// `(min, scale)` mapping the synthesized range onto `[0, OUTPUT_MAX]`.
    ///
    /// A flat or empty output has no usable range; it maps with `min = 0` and
    /// `scale = 1` instead.
    pub fn normalization(&self) -> (f32, f32) {
        let range = self.max - self.min;
        if range > 0.0 && range.is_finite() {
            (self.min, OUTPUT_MAX / range)
        } else {
            warn!(
                min = self.min,
                max = self.max,
                "Synthesized output has no value range, normalizing with min 0 and scale 1"
            );
            (0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Extrema {
    min: f32,
    max: f32,
}

impl Extrema {
    const EMPTY: Self = Self {
        min: f32::MAX,
        max: -f32::MAX,
    };

    #[inline]
    fn include(&mut self, value: f32) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Locks every mutex in `locks`, lowest index first.
///
/// Each attempt waits at most `timeout`. On a timeout every guard taken so far is
/// released and the whole sequence starts over.
fn lock_ascending<T>(locks: &[Mutex<T>], timeout: Duration) -> Vec<MutexGuard<'_, T>> {
    'retry: loop {
        let mut guards = Vec::with_capacity(locks.len());
        for (index, lock) in locks.iter().enumerate() {
            match lock.try_lock_for(timeout) {
                Some(guard) => guards.push(guard),
                None => {
                    trace!(index, "Stripe lock timed out, retrying");
                    continue 'retry;
                }
            }
        }
        return guards;
    }
}

/// Overlap-adds every tile into a fresh `output_rows x output_columns` grid.
///
/// For each tile and each position where the mask is nonzero, adds
/// `coefficient * atom + mask * mean * divisor`. Tiles without a match contribute
/// only the mean term.
pub fn synthesize(input: &SynthesisInput<'_>, lock_timeout: Duration) -> Synthesized {
    let grid = input.grid;
    let high_patch = grid.patch_size * input.factor;
    let high_stride = grid.stride * input.factor;

    assert_eq!(input.mask.rows(), high_patch, "mask side must be patch_size * factor");
    assert_eq!(input.divisor.rows(), high_stride, "divisor side must be stride * factor");
    assert_eq!(
        (input.means.rows(), input.means.columns()),
        (grid.rows, grid.columns),
        "one mean per tile required"
    );
    assert_eq!(input.index_mask.len(), grid.len(), "one dictionary index per tile required");
    assert_eq!(input.coefficients.len(), grid.len(), "one coefficient per tile required");

    let mut output = Matrix::zeros(input.output_rows, input.output_columns);
    if grid.is_empty() {
        return Synthesized {
            grid: output,
            min: Extrema::EMPTY.min,
            max: Extrema::EMPTY.max,
        };
    }
    assert!(
        (grid.rows - 1) * high_stride + high_patch <= input.output_rows
            && (grid.columns - 1) * high_stride + high_patch <= input.output_columns,
        "tile grid exceeds the {}x{} output",
        input.output_rows,
        input.output_columns
    );

    let span = high_patch.div_ceil(high_stride);
    let stripe_len = high_stride * input.output_columns;
    let stripe_count = grid.rows + span - 1;

    let extrema = {
        let len = output.len();
        let (head, _) = output
            .values_mut()
            .split_at_mut((stripe_count * stripe_len).min(len));
        let stripes: Vec<Mutex<&mut [f32]>> = head.chunks_mut(stripe_len).map(Mutex::new).collect();

        (0..grid.rows)
            .into_par_iter()
            .map(|band| {
                let end = (band + span).min(stripes.len());
                let mut guards = lock_ascending(&stripes[band..end], lock_timeout);
                synthesize_band(input, band, &mut guards)
            })
            .reduce(|| Extrema::EMPTY, Extrema::merge)
    };

    Synthesized {
        grid: output,
        min: extrema.min,
        max: extrema.max,
    }
}

/// Writes all tiles of tile row `band`. `stripes[0]` starts at the band's first row.
fn synthesize_band(
    input: &SynthesisInput<'_>,
    band: usize,
    stripes: &mut [MutexGuard<'_, &mut [f32]>],
) -> Extrema {
    let grid = input.grid;
    let high_patch = grid.patch_size * input.factor;
    let high_stride = grid.stride * input.factor;
    let columns = input.output_columns;

    let mut extrema = Extrema::EMPTY;
    for j in 0..grid.columns {
        let tile = grid.tile(band, j);
        let high = input.high_banks[input.index_mask[tile]];
        let mean = input.means.get(band, j);
        let tile_columns = grid.span(j, input.factor);

        for local_row in 0..high_patch {
            let phase = local_row % high_stride;
            let stripe: &mut [f32] = &mut stripes[local_row / high_stride];
            let row_offset = phase * columns;
            let mask_row = input.mask.row_slice(local_row);
            let divisor_row = input.divisor.row_slice(phase);

            for (local_column, column) in tile_columns.clone().enumerate() {
                let weight = mask_row[local_column];
                if weight == 0.0 {
                    continue;
                }
                let element = local_column * high_patch + local_row;
                let value = &mut stripe[row_offset + column];
                *value += input.coefficients.contribution(tile, element, high)
                    + weight * mean * divisor_row[column % high_stride];
                extrema.include(*value);
            }
        }
    }
    extrema
}
