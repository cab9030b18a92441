//! Core data types and format readers for the DEM terrain rendering
//! pipeline: longitude/meridian bookkeeping (C1), the elevation grid type,
//! the polymorphic single-file DEM reader (C2), the tile catalog (C3), and
//! the crate-wide error taxonomy.

pub mod catalog;
pub mod error;
pub mod grid;
pub mod meridian;
pub mod reader;

pub use catalog::{Catalog, TileRecord};
pub use error::Error;
pub use grid::ElevationGrid;
pub use reader::DemReader;
