//! Single-atom matching of tile queries against low-frequency atom banks.
//!
//! Every tile is reduced to a mean-subtracted, mask-weighted query vector and
//! projected onto every atom of the dictionary selected for it. Only the best
//! projection survives, so each tile carries at most one atom.

use rayon::prelude::*;

use crate::config::AmplifyConfig;
use crate::matrix::Matrix;
use crate::tiles::TileGrid;

/// One selected atom and its projection score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomMatch {
    pub atom: usize,
    pub coefficient: f32,
}

/// Per-tile matching result plus the atom -> tiles reverse index.
#[derive(Debug, Clone)]
pub struct Coefficients {
    matches: Vec<Option<AtomMatch>>,
    reverse_index: Vec<Vec<usize>>,
}

impl Coefficients {
    /// Builds the table and its reverse index. `atom_count` bounds every atom index.
    pub fn from_matches(matches: Vec<Option<AtomMatch>>, atom_count: usize) -> Self {
        let mut reverse_index = vec![Vec::new(); atom_count];
        for (tile, m) in matches.iter().enumerate() {
            if let Some(m) = m {
                assert!(
                    m.atom < atom_count,
                    "atom {} out of range for {atom_count} atoms",
                    m.atom
                );
                reverse_index[m.atom].push(tile);
            }
        }
        Self {
            matches,
            reverse_index,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    #[inline]
    pub fn get(&self, tile: usize) -> Option<AtomMatch> {
        self.matches[tile]
    }

    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_some()).count()
    }

    /// Tiles that selected each atom, in ascending tile order.
    pub fn reverse_index(&self) -> &[Vec<usize>] {
        &self.reverse_index
    }

    /// Scaled sample `element` of the tile's atom in `high`, whose rows are atoms.
    /// Zero for unmatched tiles.
    #[inline]
    pub fn contribution(&self, tile: usize, element: usize, high: &Matrix) -> f32 {
        match self.matches[tile] {
            Some(m) => m.coefficient * high.get(m.atom, element),
            None => 0.0,
        }
    }
}

/// Mean of every tile footprint, laid out `grid.rows x grid.columns`.
pub fn build_means(terrain: &Matrix, grid: &TileGrid) -> Matrix {
    let mut means = Matrix::zeros(grid.rows, grid.columns);
    if means.is_empty() {
        return means;
    }
    means
        .values_mut()
        .par_chunks_mut(grid.columns)
        .enumerate()
        .for_each(|(row, tile_row)| {
            let rows = grid.span(row, 1);
            for (column, mean) in tile_row.iter_mut().enumerate() {
                *mean = terrain.mean_range(rows.clone(), grid.span(column, 1));
            }
        });
    means
}

/// One query per tile: footprint minus its mean, weighted by `mask`.
///
/// Row `tile` of the result holds the query, enumerated column-major over the patch
/// (`element = column * patch_size + row`) to line up with the low-frequency atoms.
pub fn build_query_atoms(terrain: &Matrix, grid: &TileGrid, mask: &Matrix, means: &Matrix) -> Matrix {
    let size = grid.patch_size;
    assert_eq!(mask.rows(), size, "mask size must equal the patch size");

    let mut queries = Matrix::zeros(grid.len(), size * size);
    if queries.is_empty() {
        return queries;
    }
    queries
        .values_mut()
        .par_chunks_mut(size * size)
        .enumerate()
        .for_each(|(tile, query)| {
            let (i, j) = (tile / grid.columns, tile % grid.columns);
            let mean = means.get(i, j);
            let rows = grid.span(i, 1);
            for (column_index, column) in grid.span(j, 1).enumerate() {
                for (row_index, row) in rows.clone().enumerate() {
                    let element = column_index * size + row_index;
                    query[element] = (terrain.get(row, column) - mean) * mask[element];
                }
            }
        });
    queries
}

/// Highest projection of `query` onto the columns of `low`, restricted to `useful`
/// elements. Scores start at zero and only a strictly greater score replaces the
/// current best, so the first atom reaching the maximum wins and negative
/// projections are never selected.
fn best_atom(low: &Matrix, query: &[f32], useful: &[usize], scores: &mut Vec<f32>) -> (usize, f32) {
    scores.clear();
    scores.resize(low.columns(), 0.0);
    for &element in useful {
        let q = query[element];
        if q == 0.0 {
            continue;
        }
        for (score, &a) in scores.iter_mut().zip(low.row_slice(element)) {
            *score += a * q;
        }
    }

    let mut best = (0, 0.0f32);
    for (atom, &score) in scores.iter().enumerate() {
        if score > best.1 {
            best = (atom, score);
        }
    }
    best
}

/// Matches every tile against the bank its index mask entry selects.
///
/// `queries` has one row per tile; `low_banks[d]` has one atom per column. Tiles are
/// split into `config.matching_chunks` independent partitions.
pub fn match_tiles(
    low_banks: &[&Matrix],
    index_mask: &[usize],
    queries: &Matrix,
    useful: &[usize],
    config: &AmplifyConfig,
) -> Coefficients {
    assert_eq!(
        index_mask.len(),
        queries.rows(),
        "index mask must hold one entry per tile"
    );

    let mut matches: Vec<Option<AtomMatch>> = vec![None; queries.rows()];
    if !matches.is_empty() {
        let chunk = common::parallel::chunk_len(matches.len(), config.matching_chunks);
        matches
            .par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(chunk_index, slots)| {
                let first = chunk_index * chunk;
                let mut scores = Vec::new();
                for (offset, slot) in slots.iter_mut().enumerate() {
                    let tile = first + offset;
                    let low = low_banks[index_mask[tile]];
                    let (atom, score) =
                        best_atom(low, queries.row_slice(tile), useful, &mut scores);
                    if score >= config.match_threshold {
                        *slot = Some(AtomMatch {
                            atom,
                            coefficient: score,
                        });
                    }
                }
            });
    }

    let atom_count = low_banks.iter().map(|bank| bank.columns()).max().unwrap_or(0);
    Coefficients::from_matches(matches, atom_count)
}

/// [`match_tiles`] with every tile using the same bank.
pub fn match_single_dictionary(
    low: &Matrix,
    queries: &Matrix,
    useful: &[usize],
    config: &AmplifyConfig,
) -> Coefficients {
    let index_mask = vec![0; queries.rows()];
    match_tiles(&[low], &index_mask, queries, useful, config)
}
