//! Per-tile dictionary selection from a per-sample hint grid.

use std::ops::Range;

use rayon::prelude::*;

use crate::matrix::Matrix;
use crate::tiles::TileGrid;

/// Reduces the hint grid to one dictionary index per tile.
///
/// Each tile takes the largest hint value found in its footprint that is still a
/// valid dictionary index. Values at or above `dictionary_count` are ignored, and a
/// tile with no usable value selects dictionary 0. This is a capped maximum, not a
/// majority vote.
///
/// `hint` must be padded the same way as the terrain the `grid` was laid over.
pub fn build_index_mask(hint: &Matrix<u8>, grid: &TileGrid, dictionary_count: usize) -> Vec<usize> {
    assert!(dictionary_count > 0, "dictionary_count must be > 0");

    let mut indices = vec![0usize; grid.len()];
    if indices.is_empty() {
        return indices;
    }

    indices
        .par_chunks_mut(grid.columns)
        .enumerate()
        .for_each(|(row, tile_row)| {
            let rows = grid.span(row, 1);
            for (column, index) in tile_row.iter_mut().enumerate() {
                *index = capped_max(hint, rows.clone(), grid.span(column, 1), dictionary_count);
            }
        });

    indices
}

fn capped_max(hint: &Matrix<u8>, rows: Range<usize>, columns: Range<usize>, cap: usize) -> usize {
    let mut max = 0usize;
    let mut count = 0usize;
    for row in rows {
        for &value in &hint.row_slice(row)[columns.clone()] {
            let value = value as usize;
            if value > max && value < cap {
                max = value;
                count += 1;
            }
        }
    }
    if count == 0 {
        0
    } else {
        max
    }
}
