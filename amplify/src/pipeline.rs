//! The amplification run: pad, select, match, synthesize, normalize.

use std::time::Instant;

use tracing::{debug, info};

use crate::config::AmplifyConfig;
use crate::dictionary::DictionarySet;
use crate::error::{Error, Result};
use crate::index_mask::build_index_mask;
use crate::mask::{build_divisor_mask, build_radial_mask, build_useful_indices};
use crate::matching::{build_means, build_query_atoms, match_tiles};
use crate::matrix::Matrix;
use crate::synthesis::{synthesize, SynthesisInput, OUTPUT_MAX};
use crate::tiles::TileGrid;

/// Synthesized grid of one run together with its normalization.
///
/// The grid still carries the padding margin. [`AmplifiedTerrain::normalized`]
/// crops it to `rows x columns`.
#[derive(Debug, Clone)]
pub struct AmplifiedTerrain {
    grid: Matrix,
    min: f32,
    scale: f32,
    margin: usize,
    rows: usize,
    columns: usize,
}

impl AmplifiedTerrain {
    /// Padded synthesized grid before normalization.
    pub fn grid(&self) -> &Matrix {
        &self.grid
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Padding on every side of [`AmplifiedTerrain::grid`], in output samples.
    pub fn margin(&self) -> usize {
        self.margin
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Cropped output mapped by `(v - min) * scale` and clamped to `[0, 65535]`.
    pub fn normalized(&self) -> Matrix {
        let columns = self.columns;
        Matrix::from_fn(self.rows, columns, |i| {
            let value = self.grid.get(self.margin + i / columns, self.margin + i % columns);
            ((value - self.min) * self.scale).clamp(0.0, OUTPUT_MAX)
        })
    }

    /// [`AmplifiedTerrain::normalized`] truncated to 16-bit samples.
    pub fn to_u16(&self) -> Matrix<u16> {
        let normalized = self.normalized();
        Matrix::new(
            normalized.rows(),
            normalized.columns(),
            normalized.iter().map(|&v| v as u16).collect(),
        )
    }
}

fn timed<T>(stage: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    info!("{stage}: {:.3}s", start.elapsed().as_secs_f64());
    result
}

/// Amplifies `terrain` by the factor `dictionaries` is bound to.
///
/// `hint` selects a dictionary per sample and must match `terrain` in shape. Every
/// tile uses the largest valid index found under it.
pub fn amplify(
    terrain: &Matrix,
    hint: &Matrix<u8>,
    dictionaries: &DictionarySet,
    config: &AmplifyConfig,
) -> Result<AmplifiedTerrain> {
    if (hint.rows(), hint.columns()) != (terrain.rows(), terrain.columns()) {
        return Err(Error::HintShapeMismatch {
            rows: terrain.rows(),
            columns: terrain.columns(),
            hint_rows: hint.rows(),
            hint_columns: hint.columns(),
        });
    }
    if terrain.is_empty() {
        return Err(Error::InvalidGeometry("heightmap is empty".to_string()));
    }

    let patch_size = dictionaries.patch_size();
    let stride = dictionaries.stride();
    let factor = dictionaries.factor().scale();
    let start = Instant::now();

    // Step 1: pad both grids by one patch so border samples get full tile coverage.
    let (padded, padded_hint) = timed("pad", || (terrain.padded(patch_size), hint.padded(patch_size)));
    let grid = TileGrid::new(padded.rows(), padded.columns(), patch_size, stride)?;
    debug!(
        rows = terrain.rows(),
        columns = terrain.columns(),
        patch_size,
        stride,
        factor,
        tile_rows = grid.rows,
        tile_columns = grid.columns,
        "Tile grid"
    );

    // Step 2: blending masks at both resolutions.
    let (mask, mask_high, useful) = timed("masks", || {
        let mask = build_radial_mask(patch_size);
        let useful = build_useful_indices(&mask);
        (mask, build_radial_mask(patch_size * factor), useful)
    });
    let divisor = timed("divisor", || build_divisor_mask(&mask_high, stride * factor));

    // Step 3: per-tile dictionary choice and best atom.
    let (index_mask, means, coefficients) = timed("optimization", || {
        let index_mask = build_index_mask(&padded_hint, &grid, dictionaries.len());
        let means = build_means(&padded, &grid);
        let queries = build_query_atoms(&padded, &grid, &mask, &means);
        let coefficients = match_tiles(&dictionaries.low_banks(), &index_mask, &queries, &useful, config);
        (index_mask, means, coefficients)
    });
    debug!(
        tiles = coefficients.len(),
        matched = coefficients.matched_count(),
        "Matched tiles"
    );

    // Step 4: overlap-add at output resolution.
    let high_banks = dictionaries.high_banks();
    let synthesized = timed("synthesis", || {
        synthesize(
            &SynthesisInput {
                grid: &grid,
                factor,
                output_rows: padded.rows() * factor,
                output_columns: padded.columns() * factor,
                coefficients: &coefficients,
                high_banks: &high_banks,
                index_mask: &index_mask,
                means: &means,
                mask: &mask_high,
                divisor: &divisor,
            },
            config.lock_timeout,
        )
    });

    let (min, scale) = synthesized.normalization();
    info!(
        min,
        max = synthesized.max,
        scale,
        "Amplified {}x{} to {}x{} in {:.3}s",
        terrain.rows(),
        terrain.columns(),
        terrain.rows() * factor,
        terrain.columns() * factor,
        start.elapsed().as_secs_f64()
    );

    Ok(AmplifiedTerrain {
        grid: synthesized.grid,
        min,
        scale,
        margin: patch_size * factor,
        rows: terrain.rows() * factor,
        columns: terrain.columns() * factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpsampleFactor;
    use crate::dictionary::Dictionary;

    fn zero_dictionary(patch_size: usize, stride: usize) -> Dictionary {
        let side = |factor: usize| (patch_size * factor).pow(2);
        Dictionary::new(
            patch_size,
            stride,
            Matrix::zeros(patch_size * patch_size, 2),
            Matrix::zeros(2, side(2)),
            Matrix::zeros(2, side(4)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_hint_shape_must_match() {
        let set = DictionarySet::new(vec![zero_dictionary(4, 2)], UpsampleFactor::X2).unwrap();
        let terrain = Matrix::zeros(8, 8);
        let hint: Matrix<u8> = Matrix::new_default(8, 9);
        assert!(matches!(
            amplify(&terrain, &hint, &set, &AmplifyConfig::default()),
            Err(Error::HintShapeMismatch { hint_columns: 9, .. })
        ));
    }

    #[test]
    fn test_empty_heightmap_is_rejected() {
        let set = DictionarySet::new(vec![zero_dictionary(4, 2)], UpsampleFactor::X2).unwrap();
        let terrain = Matrix::zeros(0, 0);
        let hint: Matrix<u8> = Matrix::new_default(0, 0);
        assert!(matches!(
            amplify(&terrain, &hint, &set, &AmplifyConfig::default()),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_output_shape_and_margin() {
        common::log_setup::init_test_tracing();
        let set = DictionarySet::new(vec![zero_dictionary(4, 2)], UpsampleFactor::X4).unwrap();
        let terrain = Matrix::from_fn(10, 6, |i| (i % 7) as f32 * 0.1);
        let hint: Matrix<u8> = Matrix::new_default(10, 6);
        let amplified = amplify(&terrain, &hint, &set, &AmplifyConfig::default()).unwrap();

        assert_eq!((amplified.rows(), amplified.columns()), (40, 24));
        assert_eq!(amplified.margin(), 16);
        assert_eq!((amplified.grid().rows(), amplified.grid().columns()), (72, 56));
        let output = amplified.to_u16();
        assert_eq!((output.rows(), output.columns()), (40, 24));
    }

    #[test]
    fn test_normalized_is_clamped_crop() {
        let grid = Matrix::from_fn(6, 6, |i| i as f32);
        let amplified = AmplifiedTerrain {
            grid,
            min: 10.0,
            scale: 10_000.0,
            margin: 1,
            rows: 4,
            columns: 4,
        };
        let normalized = amplified.normalized();
        // (1, 1) holds 7: below min, clamps to zero.
        assert_eq!(normalized.get(0, 0), 0.0);
        // (2, 2) holds 14: 4 * 10000.
        assert_eq!(normalized.get(1, 1), 40_000.0);
        // (4, 4) holds 28: saturates.
        assert_eq!(normalized.get(3, 3), OUTPUT_MAX);
        assert_eq!(amplified.to_u16().get(3, 3), u16::MAX);
    }
}
