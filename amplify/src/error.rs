//! Error types for dictionary loading and amplification.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions of an amplification run.
///
/// None of these are retried: the remedy is to rerun with corrected inputs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("At least one dictionary is required")]
    NoDictionaries,

    #[error(
        "Input dictionaries are not compatible: dictionary {index} has patch size {} and stride {}, expected patch size {} and stride {}",
        .actual.0, .actual.1, .expected.0, .expected.1
    )]
    IncompatibleDictionaries {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Dictionary {index} has no atom bank for upsample factor {factor}")]
    MissingFactorBank { index: usize, factor: u32 },

    #[error("Invalid upsample factor {0}, expected 2, 4 or 8")]
    InvalidFactor(u32),

    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Dictionary stream error: {0}")]
    Stream(#[source] io::Error),

    #[error("Malformed dictionary data: {0}")]
    Format(String),

    #[error(
        "Selection hint is {hint_rows}x{hint_columns} but the heightmap is {rows}x{columns}"
    )]
    HintShapeMismatch {
        rows: usize,
        columns: usize,
        hint_rows: usize,
        hint_columns: usize,
    },

    #[error("Invalid tile geometry: {0}")]
    InvalidGeometry(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Stream-level read failures: truncation is a format problem, anything else is IO.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Format("unexpected end of stream".to_string())
        } else {
            Error::Stream(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_message_names_both_geometries() {
        let err = Error::IncompatibleDictionaries {
            index: 1,
            expected: (16, 8),
            actual: (12, 6),
        };
        let msg = err.to_string();
        assert!(msg.contains("not compatible"));
        assert!(msg.contains("dictionary 1"));
        assert!(msg.contains("16"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_missing_factor_bank_message() {
        let err = Error::MissingFactorBank {
            index: 0,
            factor: 8,
        };
        assert_eq!(
            err.to_string(),
            "Dictionary 0 has no atom bank for upsample factor 8"
        );
    }

    #[test]
    fn test_unexpected_eof_maps_to_format() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_other_stream_errors_map_to_stream() {
        let err: Error = io::Error::other("broken pipe").into();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as StdError;

        let err = Error::io(
            "/missing/dictionary.bin",
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        assert!(err.to_string().contains("/missing/dictionary.bin"));
        assert!(err.source().is_some());
    }
}
