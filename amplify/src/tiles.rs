//! Tile lattice over a padded grid.

use std::ops::Range;

use crate::error::{Error, Result};
use crate::mask::{build_radial_mask, covers_every_phase};

/// Square tiles of `patch_size` samples placed every `stride` samples.
///
/// Tiles are numbered row-major: `tile = row * columns + column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub rows: usize,
    pub columns: usize,
    pub patch_size: usize,
    pub stride: usize,
}

impl TileGrid {
    /// Lays `(len - patch_size) / stride` tiles along each axis of a
    /// `grid_rows x grid_columns` area. A tile flush with the far edge is not laid.
    pub fn new(grid_rows: usize, grid_columns: usize, patch_size: usize, stride: usize) -> Result<Self> {
        validate_geometry(patch_size, stride)?;
        let fit = |len: usize| len.saturating_sub(patch_size) / stride;
        Ok(Self {
            rows: fit(grid_rows),
            columns: fit(grid_columns),
            patch_size,
            stride,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.columns
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn tile(&self, row: usize, column: usize) -> usize {
        row * self.columns + column
    }

    /// Sample range covered by tile row or column `i` at `scale` times the grid resolution.
    #[inline]
    pub fn span(&self, i: usize, scale: usize) -> Range<usize> {
        let start = i * self.stride * scale;
        start..start + self.patch_size * scale
    }
}

/// Rejects empty patches and strides that skip samples between tiles.
pub fn validate_geometry(patch_size: usize, stride: usize) -> Result<()> {
    if patch_size == 0 {
        return Err(Error::InvalidGeometry("patch size must be > 0".to_string()));
    }
    if stride == 0 {
        return Err(Error::InvalidGeometry("stride must be > 0".to_string()));
    }
    if stride > patch_size {
        return Err(Error::InvalidGeometry(format!(
            "stride {stride} exceeds patch size {patch_size}"
        )));
    }
    Ok(())
}

/// Rejects geometries whose blending masks at `scale` times the resolution leave
/// some output phase without weight.
pub fn validate_coverage(patch_size: usize, stride: usize, scale: usize) -> Result<()> {
    validate_geometry(patch_size, stride)?;
    let mask = build_radial_mask(patch_size * scale);
    if !covers_every_phase(&mask, stride * scale) {
        return Err(Error::InvalidGeometry(format!(
            "patch size {patch_size} with stride {stride} leaves uncovered samples at {scale}x"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_counts_whole_tiles() {
        // (20 - 8) / 4 = 3 tile rows at origins 0, 4 and 8.
        let grid = TileGrid::new(20, 12, 8, 4).unwrap();
        assert_eq!(grid.rows, 3);
        assert_eq!(grid.columns, 1);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.tile(2, 0), 2);
    }

    #[test]
    fn test_grid_smaller_than_patch_is_empty() {
        let grid = TileGrid::new(5, 5, 8, 4).unwrap();
        assert!(grid.is_empty());
    }

    #[test]
    fn test_span_scales_with_resolution() {
        let grid = TileGrid::new(32, 32, 8, 4).unwrap();
        assert_eq!(grid.span(0, 1), 0..8);
        assert_eq!(grid.span(3, 1), 12..20);
        assert_eq!(grid.span(3, 2), 24..40);
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(matches!(
            TileGrid::new(10, 10, 0, 1),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            TileGrid::new(10, 10, 4, 0),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            TileGrid::new(10, 10, 4, 5),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_coverage_accepts_overlapping_tilings() {
        for (patch_size, stride, scale) in [(4, 2, 2), (4, 2, 4), (8, 4, 4), (2, 1, 2), (16, 8, 2)] {
            assert!(
                validate_coverage(patch_size, stride, scale).is_ok(),
                "patch {patch_size} stride {stride} scale {scale}"
            );
        }
    }

    #[test]
    fn test_coverage_rejects_gapped_tilings() {
        for (patch_size, stride, scale) in [(4, 4, 2), (1, 1, 2), (8, 7, 2), (8, 8, 4)] {
            assert!(
                matches!(
                    validate_coverage(patch_size, stride, scale),
                    Err(Error::InvalidGeometry(_))
                ),
                "patch {patch_size} stride {stride} scale {scale}"
            );
        }
        assert!(matches!(validate_coverage(4, 5, 2), Err(Error::InvalidGeometry(_))));
    }
}
