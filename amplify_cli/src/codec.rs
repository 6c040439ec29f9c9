use std::path::Path;

use amplify::Matrix;
use anyhow::{Context, Result};
use image as image_lib;

/// Divisor applied to 16-bit grey samples to obtain heights.
const HEIGHT_SCALE: f32 = 255.0;

/// Reads any supported image as 16-bit grey heights scaled by `1 / 255`.
pub fn load_heightmap(path: &Path) -> Result<Matrix> {
    let img = image_lib::open(path)
        .with_context(|| format!("Failed to read heightmap '{}'", path.display()))?
        .to_luma16();
    let (width, height) = img.dimensions();
    let values = img
        .into_raw()
        .into_iter()
        .map(|sample| sample as f32 / HEIGHT_SCALE)
        .collect();
    Ok(Matrix::new(height as usize, width as usize, values))
}

/// Reads any supported image as raw 8-bit grey dictionary indices.
pub fn load_hint(path: &Path) -> Result<Matrix<u8>> {
    let img = image_lib::open(path)
        .with_context(|| format!("Failed to read selection hint '{}'", path.display()))?
        .to_luma8();
    let (width, height) = img.dimensions();
    Ok(Matrix::new(height as usize, width as usize, img.into_raw()))
}

/// Writes 16-bit grey samples as a PNG.
pub fn save_heightmap(samples: &Matrix<u16>, path: &Path) -> Result<()> {
    let width = u32::try_from(samples.columns()).context("Output is too wide")?;
    let height = u32::try_from(samples.rows()).context("Output is too tall")?;
    let buffer = image_lib::ImageBuffer::<image_lib::Luma<u16>, Vec<u16>>::from_raw(
        width,
        height,
        samples.values().to_vec(),
    )
    .context("Output samples do not fill the image")?;
    buffer
        .save_with_format(path, image_lib::ImageFormat::Png)
        .with_context(|| format!("Failed to write heightmap '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heightmap_samples_are_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("height.png");
        let img = image_lib::ImageBuffer::<image_lib::Luma<u16>, Vec<u16>>::from_raw(
            3,
            2,
            vec![0, 255, 510, 1000, 65535, 2],
        )
        .unwrap();
        img.save(&path).unwrap();

        let terrain = load_heightmap(&path).unwrap();
        assert_eq!((terrain.rows(), terrain.columns()), (2, 3));
        assert_eq!(terrain.get(0, 1), 1.0);
        assert_eq!(terrain.get(0, 2), 2.0);
        assert!((terrain.get(1, 1) - 257.0).abs() < 1e-4);
    }

    #[test]
    fn test_hint_samples_are_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hint.png");
        image_lib::GrayImage::from_raw(2, 2, vec![0, 1, 2, 200])
            .unwrap()
            .save(&path)
            .unwrap();

        let hint = load_hint(&path).unwrap();
        assert_eq!(hint.values(), &[0, 1, 2, 200]);
    }

    #[test]
    fn test_saved_heightmap_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let samples = Matrix::new(2, 2, vec![0u16, 100, 40_000, u16::MAX]);
        save_heightmap(&samples, &path).unwrap();

        let img = image_lib::open(&path).unwrap().to_luma16();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.into_raw(), vec![0, 100, 40_000, u16::MAX]);
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.png");
        let error = load_heightmap(&path).unwrap_err();
        assert!(format!("{error:#}").contains("absent.png"));
    }
}
