//! Dictionary-driven terrain amplification.
//!
//! A low-resolution heightmap is cut into overlapping tiles. Each tile is matched
//! to the single best atom of a trained dictionary, and the atom's high-frequency
//! counterpart is overlap-added into an upsampled grid.

pub mod config;
pub mod dictionary;
pub mod error;
pub mod index_mask;
pub mod mask;
pub mod matching;
pub mod matrix;
pub mod pipeline;
pub mod synthesis;
pub mod tiles;

pub use config::{AmplifyConfig, UpsampleFactor};
pub use dictionary::{Dictionary, DictionarySet};
pub use error::{Error, Result};
pub use matching::{AtomMatch, Coefficients};
pub use matrix::Matrix;
pub use pipeline::{amplify, AmplifiedTerrain};
pub use synthesis::OUTPUT_MAX;
pub use tiles::TileGrid;
