//! Trained atom dictionaries: the gzip file format and the validated set used by a run.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use crate::config::UpsampleFactor;
use crate::error::{Error, Result};
use crate::matrix::{read_bool, read_dimension, write_bool, write_i32, Matrix};
use crate::tiles::{validate_coverage, validate_geometry};

/// Dictionary files read at the same time while loading a set.
const MAX_CONCURRENT_LOADS: usize = 4;

/// One trained dictionary.
///
/// `low` holds one atom per column over a `patch_size²` column-major patch.
/// Each high bank holds the same atoms one per row over a `(patch_size * F)²` patch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    pub patch_size: usize,
    pub stride: usize,
    pub low: Matrix,
    pub high2: Matrix,
    pub high4: Matrix,
    pub high8: Option<Matrix>,
}

impl Dictionary {
    pub fn new(
        patch_size: usize,
        stride: usize,
        low: Matrix,
        high2: Matrix,
        high4: Matrix,
        high8: Option<Matrix>,
    ) -> Result<Self> {
        let dictionary = Self {
            patch_size,
            stride,
            low,
            high2,
            high4,
            high8,
        };
        dictionary.validate()?;
        Ok(dictionary)
    }

    pub fn atom_count(&self) -> usize {
        self.low.columns()
    }

    pub fn high_bank(&self, factor: UpsampleFactor) -> Option<&Matrix> {
        match factor {
            UpsampleFactor::X2 => Some(&self.high2),
            UpsampleFactor::X4 => Some(&self.high4),
            UpsampleFactor::X8 => self.high8.as_ref(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_geometry(self.patch_size, self.stride)?;

        let elements = self.patch_size * self.patch_size;
        if self.low.rows() != elements {
            return Err(Error::Format(format!(
                "low-frequency bank has {} rows, expected {elements} for patch size {}",
                self.low.rows(),
                self.patch_size
            )));
        }

        let atoms = self.atom_count();
        if atoms == 0 {
            return Err(Error::Format("low-frequency bank has no atoms".to_string()));
        }
        for factor in [UpsampleFactor::X2, UpsampleFactor::X4, UpsampleFactor::X8] {
            let Some(bank) = self.high_bank(factor) else {
                continue;
            };
            let side = self.patch_size * factor.scale();
            if bank.rows() != atoms || bank.columns() != side * side {
                return Err(Error::Format(format!(
                    "{factor} bank is {}x{}, expected {atoms}x{}",
                    bank.rows(),
                    bank.columns(),
                    side * side
                )));
            }
        }
        Ok(())
    }

    /// Reads the uncompressed dictionary layout.
    pub fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        let patch_size = read_dimension(input)?;
        let stride = read_dimension(input)?;
        let low = Matrix::read_from(input)?;
        let high2 = Matrix::read_from(input)?;
        let high4 = Matrix::read_from(input)?;
        let high8 = if read_bool(input)? {
            Some(Matrix::read_from(input)?)
        } else {
            None
        };
        Self::new(patch_size, stride, low, high2, high4, high8)
    }

    /// Writes the uncompressed dictionary layout.
    pub fn write_to<W: Write>(&self, output: &mut W) -> io::Result<()> {
        write_i32(output, self.patch_size)?;
        write_i32(output, self.stride)?;
        self.low.write_to(output)?;
        self.high2.write_to(output)?;
        self.high4.write_to(output)?;
        write_bool(output, self.high8.is_some())?;
        if let Some(high8) = &self.high8 {
            high8.write_to(output)?;
        }
        Ok(())
    }

    /// Reads a gzip-compressed dictionary file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        Self::read_from(&mut decoder).map_err(|e| match e {
            Error::Stream(source) => Error::io(path, source),
            other => other,
        })
    }

    /// Writes a gzip-compressed dictionary file, replacing any existing one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        self.write_to(&mut encoder)
            .and_then(|()| encoder.finish())
            .and_then(|mut writer| writer.flush())
            .map_err(|e| Error::io(path, e))
    }
}

/// Dictionaries of one run, checked for shared geometry and bound to one factor.
#[derive(Debug, Clone)]
pub struct DictionarySet {
    patch_size: usize,
    stride: usize,
    factor: UpsampleFactor,
    dictionaries: Vec<Dictionary>,
}

impl DictionarySet {
    /// Fails on an empty list, on any geometry differing from the first dictionary,
    /// on any dictionary without a bank for `factor`, and on a geometry whose
    /// tiling at `factor` leaves output samples uncovered.
    pub fn new(dictionaries: Vec<Dictionary>, factor: UpsampleFactor) -> Result<Self> {
        let first = dictionaries.first().ok_or(Error::NoDictionaries)?;
        let expected = (first.patch_size, first.stride);

        for (index, dictionary) in dictionaries.iter().enumerate() {
            let actual = (dictionary.patch_size, dictionary.stride);
            if actual != expected {
                return Err(Error::IncompatibleDictionaries {
                    index,
                    expected,
                    actual,
                });
            }
            if dictionary.high_bank(factor).is_none() {
                return Err(Error::MissingFactorBank {
                    index,
                    factor: factor.value(),
                });
            }
        }
        validate_coverage(expected.0, expected.1, factor.scale())?;

        Ok(Self {
            patch_size: expected.0,
            stride: expected.1,
            factor,
            dictionaries,
        })
    }

    /// Loads every file, a few at a time, then validates them in the given order.
    pub fn load<P>(paths: &[P], factor: UpsampleFactor) -> Result<Self>
    where
        P: AsRef<Path> + Sync,
    {
        if paths.is_empty() {
            return Err(Error::NoDictionaries);
        }

        let dictionaries =
            common::parallel::try_par_map_limited(paths, MAX_CONCURRENT_LOADS, |path| {
                let path = path.as_ref();
                debug!(path = %path.display(), "Loading dictionary");
                Dictionary::load(path)
            })?;

        let set = Self::new(dictionaries, factor)?;
        info!(
            count = set.len(),
            patch_size = set.patch_size,
            stride = set.stride,
            %factor,
            "Loaded dictionaries"
        );
        Ok(set)
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn factor(&self) -> UpsampleFactor {
        self.factor
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }

    pub fn dictionaries(&self) -> &[Dictionary] {
        &self.dictionaries
    }

    pub fn low_banks(&self) -> Vec<&Matrix> {
        self.dictionaries.iter().map(|d| &d.low).collect()
    }

    /// Banks for the bound factor, one per dictionary.
    pub fn high_banks(&self) -> Vec<&Matrix> {
        self.dictionaries
            .iter()
            .filter_map(|d| d.high_bank(self.factor))
            .collect()
    }
}
